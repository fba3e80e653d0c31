use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::folders::FolderResolver;
use crate::pipeline::snapshot::{self, Snapshot};
use crate::pipeline::CancelFlag;
use crate::types::{AuctionFile, FailureKind, FileStatus, FolderKind};

#[derive(Debug, PartialEq, Eq)]
pub enum Processed {
    /// Every record committed together with PROCESSED.
    Committed { records: usize },
    /// Row is now FAILED(parse); nothing was written.
    Failed { reason: String },
    /// Another worker holds or already finished the file.
    NotClaimed,
    /// Claim released back to DOWNLOADED before the commit.
    Cancelled,
}

/// Parses downloaded snapshots into auction records.
#[derive(Clone)]
pub struct SnapshotProcessor {
    store: Store,
    folders: FolderResolver,
    parse_timeout: Duration,
    archive: bool,
    cancel: CancelFlag,
}

impl SnapshotProcessor {
    pub fn new(cfg: &Config, store: Store, folders: FolderResolver, cancel: CancelFlag) -> Self {
        Self {
            store,
            folders,
            parse_timeout: cfg.parse_timeout,
            archive: cfg.archive_processed,
            cancel,
        }
    }

    /// Claim, decode and commit one DOWNLOADED file. Only storage errors are
    /// returned as `Err`.
    pub async fn process(&self, file: &AuctionFile) -> Result<Processed> {
        if self.cancel.is_cancelled() {
            return Ok(Processed::Cancelled);
        }
        if !self.store.claim_for_processing(file.id).await? {
            debug!(file_id = file.id, "Snapshot already claimed");
            return Ok(Processed::NotClaimed);
        }

        let snapshot = match self.load(file).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return self.fail(file, e).await,
        };

        if self.cancel.is_cancelled() {
            self.store.release_claim(file.id).await?;
            info!(file_id = file.id, "Processing cancelled, claim released");
            return Ok(Processed::Cancelled);
        }

        if !self.store.commit_records(file.id, &snapshot.records).await? {
            warn!(file_id = file.id, "Claim lost before commit, records discarded");
            return Ok(Processed::NotClaimed);
        }

        info!(
            file_id = file.id,
            status = %FileStatus::Processed,
            records = snapshot.records.len(),
            realms = ?snapshot.realm_slugs,
            "Snapshot processed: {}",
            file.file_name,
        );

        if self.archive {
            self.archive(file).await;
        }

        Ok(Processed::Committed { records: snapshot.records.len() })
    }

    async fn load(&self, file: &AuctionFile) -> Result<Snapshot> {
        let path = self
            .folders
            .file_path(file.realm_id, FolderKind::FilesIn, &file.file_name)
            .await?;

        let work = async {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                AppError::ParseFailed(format!("cannot read {}: {e}", path.display()))
            })?;
            let owned = file.clone();
            tokio::task::spawn_blocking(move || snapshot::decode(&bytes, &owned))
                .await
                .map_err(|e| AppError::ParseFailed(format!("decoder task failed: {e}")))?
        };

        tokio::time::timeout(self.parse_timeout, work)
            .await
            .map_err(|_| {
                AppError::ParseFailed(format!("timed out after {}s", self.parse_timeout.as_secs()))
            })?
    }

    async fn fail(&self, file: &AuctionFile, err: AppError) -> Result<Processed> {
        let reason = match err {
            AppError::ParseFailed(msg) => msg,
            other => other.to_string(),
        };
        warn!(file_id = file.id, "Snapshot rejected: {reason}");
        if self
            .store
            .mark_failed(file.id, FileStatus::Processing, FailureKind::Parse, &reason)
            .await?
        {
            Ok(Processed::Failed { reason })
        } else {
            Ok(Processed::NotClaimed)
        }
    }

    /// Best effort: the records are already committed.
    async fn archive(&self, file: &AuctionFile) {
        let moved = async {
            let from = self
                .folders
                .file_path(file.realm_id, FolderKind::FilesIn, &file.file_name)
                .await?;
            let to = self
                .folders
                .file_path(file.realm_id, FolderKind::FilesArchive, &file.file_name)
                .await?;
            tokio::fs::rename(&from, &to).await?;
            Ok::<_, AppError>(())
        };
        if let Err(e) = moved.await {
            warn!(file_id = file.id, "Could not archive {}: {e}", file.file_name);
        }
    }
}
