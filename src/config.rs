use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Region;

pub const DIRECTORY_API_URL: &str = "https://{region}.api.battle.net";

/// Default size of the realm worker pool.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Maximum auction rows per multi-row INSERT. SQLite caps bound parameters
/// at 32766; each row binds 10.
pub const RECORD_INSERT_CHUNK: usize = 1000;

/// Suffix of in-flight downloads. Renamed away once the body is complete.
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Realm directory synchronisation.
    Sync,
    /// Change detection + file acquisition.
    Files,
    /// Snapshot parsing + record materialisation.
    Process,
}

impl std::str::FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "prepare" => Ok(Stage::Sync),
            "files" => Ok(Stage::Files),
            "process" => Ok(Stage::Process),
            other => Err(AppError::Config(format!("unknown stage '{other}'"))),
        }
    }
}

/// Scope a process run to a single file of a single realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTarget {
    pub realm_id: i64,
    pub file_id: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub db_max_connections: u32,
    /// Root under which realm folders are provisioned (DATA_ROOT)
    pub data_root: PathBuf,
    /// Base URL of the directory service; `{region}` is substituted (DIRECTORY_API_URL)
    pub directory_api_url: String,
    pub directory_api_key: String,
    pub directory_locale: String,
    pub regions: Vec<Region>,
    pub stages: Vec<Stage>,
    /// Bounded realm worker pool (WORKER_CONCURRENCY, min 1)
    pub worker_concurrency: usize,
    pub download_timeout: Duration,
    pub parse_timeout: Duration,
    pub directory_timeout: Duration,
    /// Age after which a PROCESSING claim is treated as abandoned (CLAIM_LEASE_SECS)
    pub claim_lease: Duration,
    pub process_target: Option<ProcessTarget>,
    pub archive_processed: bool,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "auctions.db".to_string(),
            db_max_connections: 8,
            data_root: PathBuf::from("data"),
            directory_api_url: DIRECTORY_API_URL.to_string(),
            directory_api_key: String::new(),
            directory_locale: "en_GB".to_string(),
            regions: vec![Region::Eu, Region::Us],
            stages: vec![Stage::Sync, Stage::Files, Stage::Process],
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            download_timeout: Duration::from_secs(120),
            parse_timeout: Duration::from_secs(120),
            directory_timeout: Duration::from_secs(30),
            claim_lease: Duration::from_secs(900),
            process_target: None,
            archive_processed: true,
            api_port: 3000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();

        let process_target = match (
            parse_opt::<i64>(&lookup, "PROCESS_REALM_ID")?,
            parse_opt::<i64>(&lookup, "PROCESS_FILE_ID")?,
        ) {
            (Some(realm_id), Some(file_id)) => Some(ProcessTarget { realm_id, file_id }),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "PROCESS_REALM_ID and PROCESS_FILE_ID must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(d.log_level),
            db_path: lookup("DB_PATH").unwrap_or(d.db_path),
            db_max_connections: parse_opt(&lookup, "DB_MAX_CONNECTIONS")?
                .unwrap_or(d.db_max_connections)
                .max(1),
            data_root: lookup("DATA_ROOT").map(PathBuf::from).unwrap_or(d.data_root),
            directory_api_url: lookup("DIRECTORY_API_URL").unwrap_or(d.directory_api_url),
            directory_api_key: lookup("DIRECTORY_API_KEY").unwrap_or(d.directory_api_key),
            directory_locale: lookup("DIRECTORY_LOCALE").unwrap_or(d.directory_locale),
            regions: match lookup("REGIONS") {
                Some(raw) => parse_list(&raw)?,
                None => d.regions,
            },
            stages: match lookup("STAGES") {
                Some(raw) => parse_list(&raw)?,
                None => d.stages,
            },
            worker_concurrency: parse_opt(&lookup, "WORKER_CONCURRENCY")?
                .unwrap_or(d.worker_concurrency)
                .max(1),
            download_timeout: parse_secs(&lookup, "DOWNLOAD_TIMEOUT_SECS")?
                .unwrap_or(d.download_timeout),
            parse_timeout: parse_secs(&lookup, "PARSE_TIMEOUT_SECS")?.unwrap_or(d.parse_timeout),
            directory_timeout: parse_secs(&lookup, "DIRECTORY_TIMEOUT_SECS")?
                .unwrap_or(d.directory_timeout),
            claim_lease: parse_secs(&lookup, "CLAIM_LEASE_SECS")?.unwrap_or(d.claim_lease),
            process_target,
            archive_processed: parse_opt(&lookup, "ARCHIVE_PROCESSED")?
                .unwrap_or(d.archive_processed),
            api_port: parse_opt(&lookup, "API_PORT")?.unwrap_or(d.api_port),
        })
    }

    pub fn runs(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Directory base URL for one region.
    pub fn directory_base_url(&self, region: Region) -> String {
        self.directory_api_url
            .replace("{region}", region.as_str())
            .trim_end_matches('/')
            .to_string()
    }
}

fn parse_opt<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} has an invalid value '{raw}'"))),
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>> {
    Ok(parse_opt::<u64>(lookup, key)?.map(Duration::from_secs))
}

fn parse_list<T>(raw: &str) -> Result<Vec<T>>
where
    T: std::str::FromStr<Err = AppError> + PartialEq,
{
    let mut out = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let value = item.parse::<T>()?;
        if !out.contains(&value) {
            out.push(value);
        }
    }
    Ok(out)
}
