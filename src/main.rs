use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wow_auctions::config::Config;
use wow_auctions::db::Store;
use wow_auctions::directory::BattleNetDirectory;
use wow_auctions::error::Result;
use wow_auctions::pipeline::{CancelFlag, Coordinator};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = Store::connect(&cfg.db_path, cfg.db_max_connections).await?;

    // --- Cancellation: Ctrl-C stops scheduling new work ---
    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    info!(
        regions = ?cfg.regions,
        stages = ?cfg.stages,
        workers = cfg.worker_concurrency,
        "Starting ingestion run",
    );

    let directory = BattleNetDirectory::new(&cfg)?;
    let coordinator = Coordinator::new(cfg, store, directory, cancel)?;
    let summary = coordinator.run().await?;
    summary.log();

    Ok(())
}
