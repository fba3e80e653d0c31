use tracing::{info, warn};

use crate::db::Store;
use crate::directory::DirectoryService;
use crate::error::Result;
use crate::folders::FolderResolver;
use crate::types::Region;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub regions: usize,
    /// Realm descriptors returned by the directory.
    pub seen: usize,
    /// Realms that were not known before this sync.
    pub added: usize,
    /// Slugs whose folders could not be created. The realm row is kept.
    pub unprovisioned: Vec<String>,
}

/// Bring the realm directory in line with the remote service.
///
/// Upserts by (slug, region) and provisions folders; realms missing from the
/// remote list are kept. A realm whose folders cannot be created is reported
/// and skipped. A region whose realm list cannot be fetched aborts
/// the sync with `DirectoryUnavailable`. Re-running with an unchanged remote
/// list adds nothing.
pub async fn sync_realms<D>(
    directory: &D,
    store: &Store,
    folders: &FolderResolver,
    regions: &[Region],
) -> Result<SyncReport>
where
    D: DirectoryService + ?Sized,
{
    let mut report = SyncReport::default();

    for &region in regions {
        let remote = directory.realms(region).await?;
        report.regions += 1;

        let mut added = 0usize;
        for desc in &remote {
            if desc.slug.trim().is_empty() {
                warn!(region = %region, name = %desc.name, "Skipping realm without slug");
                continue;
            }
            let (realm, inserted) = store.upsert_realm(region, desc).await?;
            match folders.provision(&realm).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(region = %region, realm = %realm.name, "Folder provisioning failed: {e}");
                    report.unprovisioned.push(realm.slug.clone());
                }
            }
            if inserted {
                added += 1;
                info!(region = %region, realm = %realm.name, "Realm added");
            }
        }

        report.seen += remote.len();
        report.added += added;
        info!(
            region = %region,
            seen = remote.len(),
            added,
            "Realm sync complete for {region}: {} listed, +{added} new",
            remote.len(),
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::error::AppError;
    use crate::types::{FileDescriptor, FolderKind, Realm, RealmDescriptor};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ListDirectory {
        eu: Mutex<Vec<RealmDescriptor>>,
    }

    #[async_trait]
    impl DirectoryService for ListDirectory {
        async fn realms(&self, region: Region) -> Result<Vec<RealmDescriptor>> {
            match region {
                Region::Eu => Ok(self.eu.lock().unwrap().clone()),
                _ => Err(AppError::DirectoryUnavailable(format!("{region} is down"))),
            }
        }

        async fn auction_files(&self, _realm: &Realm) -> Result<Vec<FileDescriptor>> {
            Ok(Vec::new())
        }
    }

    fn desc(name: &str, slug: &str) -> RealmDescriptor {
        RealmDescriptor { name: name.to_string(), slug: slug.to_string() }
    }

    #[tokio::test]
    async fn second_sync_with_same_list_is_a_no_op() {
        let (dir, store) = temp_store().await;
        let folders = FolderResolver::new(store.clone(), dir.path().join("data"));
        let directory = ListDirectory {
            eu: Mutex::new(vec![desc("Hellscream", "hellscream"), desc("Outland", "outland")]),
        };

        let first = sync_realms(&directory, &store, &folders, &[Region::Eu]).await.unwrap();
        let second = sync_realms(&directory, &store, &folders, &[Region::Eu]).await.unwrap();

        assert_eq!(first, SyncReport { regions: 1, seen: 2, added: 2, unprovisioned: vec![] });
        assert_eq!(second, SyncReport { regions: 1, seen: 2, added: 0, unprovisioned: vec![] });
        assert_eq!(store.list_realms().await.unwrap().len(), 2);

        let hellscream = store.find_realm_by_name_or_slug("Hellscream", Region::Eu).await.unwrap();
        let incoming = store.find_realm_folder(hellscream.id, FolderKind::FilesIn).await.unwrap();
        assert!(incoming.path.is_dir());
    }

    #[tokio::test]
    async fn realms_are_never_removed_by_sync() {
        let (dir, store) = temp_store().await;
        let folders = FolderResolver::new(store.clone(), dir.path().join("data"));
        let directory = ListDirectory { eu: Mutex::new(vec![desc("Hellscream", "hellscream")]) };
        sync_realms(&directory, &store, &folders, &[Region::Eu]).await.unwrap();

        *directory.eu.lock().unwrap() = vec![desc("Outland", "outland"), desc("", " ")];
        let report = sync_realms(&directory, &store, &folders, &[Region::Eu]).await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(store.list_realms().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn folder_failure_skips_only_that_realm() {
        let (dir, store) = temp_store().await;
        let root = dir.path().join("data");
        // A plain file where the realm directory should go.
        std::fs::create_dir_all(root.join("eu")).unwrap();
        std::fs::write(root.join("eu/outland"), b"").unwrap();
        let folders = FolderResolver::new(store.clone(), &root);
        let directory = ListDirectory {
            eu: Mutex::new(vec![desc("Outland", "outland"), desc("Hellscream", "hellscream")]),
        };

        let report = sync_realms(&directory, &store, &folders, &[Region::Eu]).await.unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.unprovisioned, vec!["outland".to_string()]);
        assert_eq!(store.list_realms().await.unwrap().len(), 2);
        assert!(root.join("eu/hellscream/files-in").is_dir());
    }

    #[tokio::test]
    async fn unavailable_region_aborts_the_sync() {
        let (dir, store) = temp_store().await;
        let folders = FolderResolver::new(store.clone(), dir.path().join("data"));
        let directory = ListDirectory { eu: Mutex::new(vec![desc("Hellscream", "hellscream")]) };

        let err = sync_realms(&directory, &store, &folders, &[Region::Eu, Region::Us])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DirectoryUnavailable(_)));
    }
}
