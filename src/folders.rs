//! Maps (realm, folder kind) to the directory holding that realm's snapshots.
//!
//! Paths come from the `realm_folders` table; `DATA_ROOT` is only used to
//! provision folders for realms that have none yet. File names handed to the
//! resolver are single path components, so nothing is ever written outside the
//! realm's folder.

use std::path::{Component, Path, PathBuf};

use crate::config::PARTIAL_SUFFIX;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::types::{FolderKind, Realm, RealmFolder};

#[derive(Clone)]
pub struct FolderResolver {
    store: Store,
    data_root: PathBuf,
}

impl FolderResolver {
    pub fn new(store: Store, data_root: impl Into<PathBuf>) -> Self {
        Self { store, data_root: data_root.into() }
    }

    /// Default location for a realm folder: `{root}/{region}/{slug}/{kind}`.
    pub fn default_path(&self, realm: &Realm, kind: FolderKind) -> PathBuf {
        self.data_root
            .join(realm.region.as_str())
            .join(safe_slug(&realm.slug))
            .join(kind.as_str())
    }

    /// Register every folder kind for the realm and create the directories.
    pub async fn provision(&self, realm: &Realm) -> Result<Vec<RealmFolder>> {
        let mut folders = Vec::with_capacity(FolderKind::ALL.len());
        for kind in FolderKind::ALL {
            let folder = self
                .store
                .ensure_realm_folder(realm.id, kind, &self.default_path(realm, kind))
                .await?;
            tokio::fs::create_dir_all(&folder.path).await?;
            folders.push(folder);
        }
        Ok(folders)
    }

    /// Directory for (realm, kind), created on demand.
    pub async fn folder(&self, realm_id: i64, kind: FolderKind) -> Result<PathBuf> {
        let folder = self.store.find_realm_folder(realm_id, kind).await?;
        tokio::fs::create_dir_all(&folder.path).await?;
        Ok(folder.path)
    }

    /// Full path of `file_name` inside (realm, kind).
    pub async fn file_path(&self, realm_id: i64, kind: FolderKind, file_name: &str) -> Result<PathBuf> {
        let dir = self.folder(realm_id, kind).await?;
        join_checked(&dir, file_name)
    }
}

/// Join a bare file name onto `dir`, rejecting anything that would escape it.
pub fn join_checked(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(file_name)),
        _ => Err(AppError::InvalidPath(format!(
            "'{file_name}' is not a plain file name"
        ))),
    }
}

/// Deterministic snapshot file name for one realm version. Distinct realms and
/// versions never collide: `{region}-{slug}-{last_modified}.json`.
pub fn snapshot_file_name(realm: &Realm, last_modified: i64) -> String {
    format!("{}-{}-{}.json", realm.region, safe_slug(&realm.slug), last_modified)
}

/// Slugs come from the remote directory and end up in paths.
fn safe_slug(slug: &str) -> String {
    slug.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Sibling path used while a download is in flight.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
