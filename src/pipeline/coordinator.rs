use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ProcessTarget, Stage};
use crate::db::Store;
use crate::directory::{sync_realms, DirectoryService};
use crate::error::{AppError, Result};
use crate::folders::FolderResolver;
use crate::pipeline::latency::TransferStats;
use crate::pipeline::{
    Acquired, CancelFlag, ChangeDetector, Decision, FileAcquirer, Processed, RealmReport,
    RunSummary, SnapshotProcessor,
};
use crate::types::{AuctionFile, Realm, Region};

type Reports = DashMap<i64, RealmReport>;

/// Drives one batch run: sync → change detection + acquisition → processing.
///
/// Realms of a region are handled by at most `worker_concurrency` workers at a
/// time. Per-realm and per-file failures end up in the run summary; storage
/// failures abort the run.
pub struct Coordinator<D> {
    cfg: Config,
    store: Store,
    directory: D,
    folders: FolderResolver,
    detector: ChangeDetector,
    acquirer: FileAcquirer,
    processor: SnapshotProcessor,
    cancel: CancelFlag,
}

impl<D: DirectoryService> Coordinator<D> {
    pub fn new(cfg: Config, store: Store, directory: D, cancel: CancelFlag) -> Result<Self> {
        let folders = FolderResolver::new(store.clone(), cfg.data_root.clone());
        let acquirer = FileAcquirer::new(&cfg, store.clone(), folders.clone(), cancel.clone())?;
        let processor = SnapshotProcessor::new(&cfg, store.clone(), folders.clone(), cancel.clone());
        Ok(Self {
            detector: ChangeDetector::new(store.clone()),
            acquirer,
            processor,
            folders,
            directory,
            store,
            cfg,
            cancel,
        })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let transfers = TransferStats::new()?;
        let reports = Reports::new();

        if self.cfg.runs(Stage::Sync) && !self.cancel.is_cancelled() {
            let report =
                sync_realms(&self.directory, &self.store, &self.folders, &self.cfg.regions).await?;
            summary.sync = Some(report);
        }

        if self.cfg.runs(Stage::Process) {
            let lease = self.cfg.claim_lease.as_secs() as i64;
            summary.released_claims = self.store.release_stale_claims(lease).await?;
            if summary.released_claims > 0 {
                warn!(files = summary.released_claims, "Released abandoned processing claims");
            }
        }

        let scan_regions = self.cfg.runs(Stage::Files)
            || (self.cfg.runs(Stage::Process) && self.cfg.process_target.is_none());
        if scan_regions {
            for &region in &self.cfg.regions {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.run_region(region, &transfers, &reports).await?;
            }
        }

        if let (true, Some(target)) = (self.cfg.runs(Stage::Process), self.cfg.process_target) {
            if !self.cancel.is_cancelled() {
                self.run_target(target, &reports).await?;
            }
        }

        let mut realms: Vec<RealmReport> = reports.into_iter().map(|(_, r)| r).collect();
        realms.sort_by_key(|r| r.realm_id);
        summary.realms = realms;
        summary.transfers = transfers.percentiles();
        summary.cancelled = self.cancel.is_cancelled();
        Ok(summary)
    }

    async fn run_region(&self, region: Region, transfers: &TransferStats, reports: &Reports) -> Result<()> {
        let realms = self.store.list_realms_in(region).await?;
        for realm in &realms {
            reports.entry(realm.id).or_insert_with(|| RealmReport::new(realm));
        }
        info!(region = %region, realms = realms.len(), "Starting region");

        if self.cfg.runs(Stage::Files) {
            let mut checks = stream::iter(&realms)
                .map(|realm| self.detect_realm(realm, reports))
                .buffer_unordered(self.cfg.worker_concurrency);
            while let Some(res) = checks.next().await {
                abort_on(res)?;
            }
        }

        let mut pending: HashMap<i64, Vec<AuctionFile>> = HashMap::new();
        if self.cfg.runs(Stage::Files) {
            for file in self.store.files_to_download(region).await? {
                pending.entry(file.realm_id).or_default().push(file);
            }
        }
        let work: Vec<(&Realm, Vec<AuctionFile>)> = realms
            .iter()
            .map(|realm| (realm, pending.remove(&realm.id).unwrap_or_default()))
            .collect();

        let mut workers = stream::iter(work)
            .map(|(realm, files)| self.ingest_realm(realm, files, transfers, reports))
            .buffer_unordered(self.cfg.worker_concurrency);
        while let Some(res) = workers.next().await {
            abort_on(res)?;
        }
        Ok(())
    }

    /// Compare each remote descriptor with what is stored and register new
    /// versions as PENDING.
    async fn detect_realm(&self, realm: &Realm, reports: &Reports) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let descriptors = match self.directory.auction_files(realm).await {
            Ok(d) => d,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(realm = %realm.name, region = %realm.region, "Descriptor lookup failed: {e}");
                update(reports, realm, |r| r.fail(realm.slug.as_str(), e.to_string()));
                return Ok(());
            }
        };

        let mut skipped = 0;
        for desc in &descriptors {
            match self.detector.check(realm.id, desc).await? {
                Decision::Skip { stored } => {
                    debug!(realm = %realm.name, stored, remote = desc.last_modified, "Snapshot unchanged");
                    skipped += 1;
                }
                Decision::Resume { file_id } => {
                    debug!(realm = %realm.name, file_id, "Resuming interrupted download");
                }
                Decision::Acquire => {
                    self.acquirer.register(realm, desc).await?;
                }
            }
        }
        update(reports, realm, |r| r.skipped += skipped);
        Ok(())
    }

    /// Download this realm's pending files, then process whatever is
    /// DOWNLOADED for it.
    async fn ingest_realm(
        &self,
        realm: &Realm,
        pending: Vec<AuctionFile>,
        transfers: &TransferStats,
        reports: &Reports,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let started = Instant::now();
        let mut report = RealmReport::new(realm);

        for file in &pending {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.acquirer.download(file).await? {
                Acquired::Downloaded { elapsed, .. } => {
                    report.downloaded += 1;
                    transfers.record(elapsed);
                }
                Acquired::Failed { reason, .. } => report.fail(file.url.as_str(), reason),
                Acquired::Cancelled => break,
                Acquired::Superseded => {}
            }
        }

        if self.cfg.runs(Stage::Process) && self.cfg.process_target.is_none() {
            for file in self.store.files_to_process(realm.id).await? {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.process_one(&file, &mut report).await?;
            }
        }

        report.touch(started, Instant::now());
        update(reports, realm, |r| {
            r.merge(report);
            info!(
                realm = %r.realm,
                region = %r.region,
                skipped = r.skipped,
                downloaded = r.downloaded,
                processed = r.processed,
                failed = r.failed,
                records = r.records,
                "Realm done",
            );
        });
        Ok(())
    }

    async fn run_target(&self, target: ProcessTarget, reports: &Reports) -> Result<()> {
        let realm = self.store.find_realm(target.realm_id).await?;
        let file = self.store.find_auction_file(target.file_id).await?;
        if file.realm_id != realm.id {
            return Err(AppError::NotFound(format!(
                "auction file {} for realm {}",
                target.file_id, target.realm_id
            )));
        }

        info!(realm = %realm.name, file_id = file.id, status = %file.status, "Targeted process run");
        let started = Instant::now();
        let mut report = RealmReport::new(&realm);
        self.process_one(&file, &mut report).await?;
        report.touch(started, Instant::now());
        update(reports, &realm, |r| r.merge(report));
        Ok(())
    }

    async fn process_one(&self, file: &AuctionFile, report: &mut RealmReport) -> Result<()> {
        match self.processor.process(file).await? {
            Processed::Committed { records } => {
                report.processed += 1;
                report.records += records;
            }
            Processed::Failed { reason } => report.fail(file.file_name.as_str(), reason),
            Processed::NotClaimed | Processed::Cancelled => {}
        }
        Ok(())
    }
}

fn update(reports: &Reports, realm: &Realm, f: impl FnOnce(&mut RealmReport)) {
    let mut entry = reports.entry(realm.id).or_insert_with(|| RealmReport::new(realm));
    f(&mut entry);
}

fn abort_on(res: Result<()>) -> Result<()> {
    if let Err(e) = &res {
        error!("Run aborted: {e}");
    }
    res
}
