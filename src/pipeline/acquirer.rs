use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::folders::{partial_path, snapshot_file_name, FolderResolver};
use crate::pipeline::CancelFlag;
use crate::types::{AuctionFile, FailureKind, FileDescriptor, FileStatus, FolderKind, Realm};

/// Outcome of one download attempt. Storage failures are returned as `Err`
/// instead and abort the run.
#[derive(Debug)]
pub enum Acquired {
    Downloaded {
        file: AuctionFile,
        bytes: u64,
        elapsed: Duration,
    },
    /// Row is now FAILED(download) with this reason.
    Failed { file_id: i64, reason: String },
    /// Stopped at a chunk boundary. The row stays PENDING.
    Cancelled,
    /// The row left PENDING under us; someone else owns it.
    Superseded,
}

/// Fetches stale snapshots into the realm's incoming folder.
///
/// Ordering per file: PENDING row exists → body streamed to `<name>.part` →
/// rename to `<name>` → PENDING→DOWNLOADED. A crash anywhere leaves a PENDING
/// row that a later run resumes; a DOWNLOADED row always has its file.
#[derive(Clone)]
pub struct FileAcquirer {
    client: reqwest::Client,
    store: Store,
    folders: FolderResolver,
    timeout: Duration,
    cancel: CancelFlag,
}

impl FileAcquirer {
    pub fn new(cfg: &Config, store: Store, folders: FolderResolver, cancel: CancelFlag) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.directory_timeout)
            .build()?;
        Ok(Self {
            client,
            store,
            folders,
            timeout: cfg.download_timeout,
            cancel,
        })
    }

    /// Register a PENDING row for a new version, retiring older versions of
    /// the same URL that never got their bytes. `None` if the version is
    /// already registered.
    pub async fn register(&self, realm: &Realm, descriptor: &FileDescriptor) -> Result<Option<AuctionFile>> {
        let retired = self
            .store
            .supersede_pending(realm.id, &descriptor.url, descriptor.last_modified)
            .await?;
        if retired > 0 {
            info!(realm = %realm.name, files = retired, last_modified = descriptor.last_modified, "Superseded stale pending snapshots");
        }

        let file_name = snapshot_file_name(realm, descriptor.last_modified);
        let file = self
            .store
            .create_auction_file(realm.id, descriptor, &file_name, FileStatus::Pending)
            .await?;
        if let Some(f) = &file {
            debug!(realm = %realm.name, file_id = f.id, last_modified = f.last_modified, "Snapshot registered");
        }
        Ok(file)
    }

    /// Register and download in one step.
    pub async fn acquire(&self, realm: &Realm, descriptor: &FileDescriptor) -> Result<Acquired> {
        let file = match self.register(realm, descriptor).await? {
            Some(file) => file,
            None => match self.store.latest_known_file(realm.id, &descriptor.url).await? {
                Some(f) if f.status == FileStatus::Pending && f.last_modified == descriptor.last_modified => f,
                _ => return Ok(Acquired::Superseded),
            },
        };
        self.download(&file).await
    }

    /// Download a PENDING file. Never retried here: a failure is recorded and
    /// the version becomes eligible again on the next run.
    pub async fn download(&self, file: &AuctionFile) -> Result<Acquired> {
        if self.cancel.is_cancelled() {
            return Ok(Acquired::Cancelled);
        }

        let final_path = match self
            .folders
            .file_path(file.realm_id, FolderKind::FilesIn, &file.file_name)
            .await
        {
            Ok(p) => p,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return self.fail(file, e.to_string()).await,
        };
        let part = partial_path(&final_path);

        let started = Instant::now();
        let fetched = tokio::time::timeout(self.timeout, self.fetch_to(&file.url, &part)).await;

        let bytes = match fetched {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(AppError::Cancelled)) => {
                discard(&part).await;
                info!(file_id = file.id, url = %file.url, "Download cancelled, left pending");
                return Ok(Acquired::Cancelled);
            }
            Ok(Err(e)) => {
                discard(&part).await;
                return self.fail(file, e.to_string()).await;
            }
            Err(_) => {
                discard(&part).await;
                let reason = format!("timed out after {}s", self.timeout.as_secs());
                return self.fail(file, reason).await;
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &final_path).await {
            discard(&part).await;
            return self.fail(file, format!("cannot move snapshot into place: {e}")).await;
        }

        if !self.store.mark_downloaded(file.id).await? {
            return Ok(Acquired::Superseded);
        }

        let elapsed = started.elapsed();
        info!(
            file_id = file.id,
            status = %FileStatus::Downloaded,
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Snapshot downloaded: {}",
            file.file_name,
        );

        let mut file = file.clone();
        file.status = FileStatus::Downloaded;
        Ok(Acquired::Downloaded { file, bytes, elapsed })
    }

    /// Stream the body of `url` into `dest`, checking cancellation between
    /// chunks. Returns the number of bytes written.
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::DownloadFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::DownloadFailed(format!("HTTP {status}")));
        }

        let expected = resp.content_length();
        let mut out = tokio::fs::File::create(dest).await?;
        let mut body = resp.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            if self.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let chunk = chunk.map_err(|e| AppError::DownloadFailed(format!("transfer interrupted: {e}")))?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        out.sync_all().await?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(AppError::DownloadFailed(format!(
                    "truncated transfer: {written} of {expected} bytes"
                )));
            }
        }

        Ok(written)
    }

    async fn fail(&self, file: &AuctionFile, reason: String) -> Result<Acquired> {
        warn!(file_id = file.id, url = %file.url, "Download failed: {reason}");
        if self
            .store
            .mark_failed(file.id, FileStatus::Pending, FailureKind::Download, &reason)
            .await?
        {
            Ok(Acquired::Failed { file_id: file.id, reason })
        } else {
            Ok(Acquired::Superseded)
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial download {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::pipeline::detector::{ChangeDetector, Decision};
    use crate::testing::serve;
    use crate::types::{RealmDescriptor, Region};
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;

    const SAMPLE: &str = include_str!("../../tests/fixtures/auction-data-sample.json");

    struct Harness {
        dir: TempDir,
        store: Store,
        folders: FolderResolver,
        realm: Realm,
        base: String,
    }

    async fn harness() -> Harness {
        let (dir, store) = temp_store().await;
        let folders = FolderResolver::new(store.clone(), dir.path().join("data"));
        let desc = RealmDescriptor { name: "Hellscream".into(), slug: "hellscream".into() };
        let (realm, _) = store.upsert_realm(Region::Eu, &desc).await.unwrap();
        folders.provision(&realm).await.unwrap();

        let router = Router::new()
            .route("/auctions.json", get(|| async { SAMPLE }))
            .route("/broken.json", get(|| async { StatusCode::BAD_GATEWAY }))
            .route(
                "/slow.json",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    SAMPLE
                }),
            );
        let base = serve(router).await;
        Harness { dir, store, folders, realm, base }
    }

    fn acquirer(h: &Harness, timeout: Duration) -> FileAcquirer {
        let cfg = Config { download_timeout: timeout, ..Config::default() };
        FileAcquirer::new(&cfg, h.store.clone(), h.folders.clone(), CancelFlag::new()).unwrap()
    }

    fn incoming(h: &Harness) -> std::path::PathBuf {
        h.dir.path().join("data/eu/hellscream/files-in")
    }

    #[tokio::test]
    async fn downloads_once_per_marker() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_secs(10));
        let detector = ChangeDetector::new(h.store.clone());
        let d1 = FileDescriptor { url: format!("{}/auctions.json", h.base), last_modified: 1_428_883_200 };

        assert_eq!(detector.check(h.realm.id, &d1).await.unwrap(), Decision::Acquire);
        let file = match acq.acquire(&h.realm, &d1).await.unwrap() {
            Acquired::Downloaded { file, bytes, .. } => {
                assert_eq!(bytes, SAMPLE.len() as u64);
                file
            }
            other => panic!("expected download, got {other:?}"),
        };
        assert_eq!(file.status, FileStatus::Downloaded);
        assert_eq!(file.last_modified, 1_428_883_200);

        let on_disk = incoming(&h).join(&file.file_name);
        assert_eq!(std::fs::read_to_string(&on_disk).unwrap(), SAMPLE);
        assert!(!partial_path(&on_disk).exists());

        // Same marker again: skipped, no new row.
        assert_eq!(
            detector.check(h.realm.id, &d1).await.unwrap(),
            Decision::Skip { stored: 1_428_883_200 }
        );
        assert!(matches!(acq.acquire(&h.realm, &d1).await.unwrap(), Acquired::Superseded));
        assert_eq!(h.store.list_files_for_realm(h.realm.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn http_error_marks_failed_and_leaves_no_file() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_secs(10));
        let d = FileDescriptor { url: format!("{}/broken.json", h.base), last_modified: 3 };

        let outcome = acq.acquire(&h.realm, &d).await.unwrap();
        let Acquired::Failed { file_id, reason } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("502"), "{reason}");

        let stored = h.store.find_auction_file(file_id).await.unwrap();
        assert_eq!(stored.status, FileStatus::Failed);
        assert_eq!(stored.failure_kind, Some(FailureKind::Download));
        assert_eq!(std::fs::read_dir(incoming(&h)).unwrap().count(), 0);

        // Eligible again on the next run.
        let detector = ChangeDetector::new(h.store.clone());
        assert_eq!(detector.check(h.realm.id, &d).await.unwrap(), Decision::Acquire);
    }

    #[tokio::test]
    async fn slow_transfer_times_out() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_millis(200));
        let d = FileDescriptor { url: format!("{}/slow.json", h.base), last_modified: 4 };

        match acq.acquire(&h.realm, &d).await.unwrap() {
            Acquired::Failed { reason, .. } => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(std::fs::read_dir(incoming(&h)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn interrupted_pending_row_is_resumed() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_secs(10));
        let d = FileDescriptor { url: format!("{}/auctions.json", h.base), last_modified: 8 };

        // A previous run registered the version and crashed mid-transfer.
        let pending = acq.register(&h.realm, &d).await.unwrap().unwrap();
        std::fs::write(incoming(&h).join(format!("{}.part", pending.file_name)), b"{\"realm").unwrap();

        let detector = ChangeDetector::new(h.store.clone());
        assert_eq!(
            detector.check(h.realm.id, &d).await.unwrap(),
            Decision::Resume { file_id: pending.id }
        );
        let queued = h.store.files_to_download(Region::Eu).await.unwrap();
        assert_eq!(queued.len(), 1);

        let outcome = acq.download(&queued[0]).await.unwrap();
        assert!(matches!(outcome, Acquired::Downloaded { .. }), "{outcome:?}");
        let done = incoming(&h).join(&pending.file_name);
        assert_eq!(std::fs::read_to_string(done).unwrap(), SAMPLE);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_row_pending() {
        let h = harness().await;
        let cancel = CancelFlag::new();
        let cfg = Config::default();
        let acq = FileAcquirer::new(&cfg, h.store.clone(), h.folders.clone(), cancel.clone()).unwrap();
        let d = FileDescriptor { url: format!("{}/auctions.json", h.base), last_modified: 9 };
        let file = acq.register(&h.realm, &d).await.unwrap().unwrap();

        cancel.cancel();
        assert!(matches!(acq.download(&file).await.unwrap(), Acquired::Cancelled));
        let stored = h.store.find_auction_file(file.id).await.unwrap();
        assert_eq!(stored.status, FileStatus::Pending);
    }

    /// Answers every connection with a header promising more body than it sends.
    async fn short_body_server() -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\n{\"realm\":{\"slug\"")
                    .await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn truncated_body_fails_and_leaves_no_file() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_secs(10));
        let base = short_body_server().await;
        let d = FileDescriptor { url: format!("{base}/auctions.json"), last_modified: 11 };

        let outcome = acq.acquire(&h.realm, &d).await.unwrap();
        let Acquired::Failed { file_id, reason } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(
            reason.contains("truncated") || reason.contains("interrupted"),
            "{reason}"
        );
        let stored = h.store.find_auction_file(file_id).await.unwrap();
        assert_eq!(stored.failure_kind, Some(FailureKind::Download));
        assert_eq!(std::fs::read_dir(incoming(&h)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn crash_after_rename_is_resumed_cleanly() {
        let h = harness().await;
        let acq = acquirer(&h, Duration::from_secs(10));
        let d = FileDescriptor { url: format!("{}/auctions.json", h.base), last_modified: 12 };

        // Bytes were moved into place but the row never left PENDING.
        let pending = acq.register(&h.realm, &d).await.unwrap().unwrap();
        let final_path = incoming(&h).join(&pending.file_name);
        std::fs::write(&final_path, b"{\"auctions\":[").unwrap();

        let queued = h.store.files_to_download(Region::Eu).await.unwrap();
        assert_eq!(queued.len(), 1);
        let outcome = acq.download(&queued[0]).await.unwrap();
        assert!(matches!(outcome, Acquired::Downloaded { .. }), "{outcome:?}");

        assert_eq!(std::fs::read_to_string(&final_path).unwrap(), SAMPLE);
        assert!(!partial_path(&final_path).exists());
        let stored = h.store.find_auction_file(pending.id).await.unwrap();
        assert_eq!(stored.status, FileStatus::Downloaded);
        assert_eq!(h.store.list_files_for_realm(h.realm.id, 10).await.unwrap().len(), 1);
    }
}
