//! Remote directory service: which realms exist per region and where each
//! realm's current auction snapshot lives.

pub mod battlenet;
pub mod sync;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FileDescriptor, Realm, RealmDescriptor, Region};

pub use battlenet::BattleNetDirectory;
pub use sync::{sync_realms, SyncReport};

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Every realm currently published for `region`.
    async fn realms(&self, region: Region) -> Result<Vec<RealmDescriptor>>;

    /// Current snapshot descriptors for one realm.
    async fn auction_files(&self, realm: &Realm) -> Result<Vec<FileDescriptor>>;
}
