use crate::db::Store;
use crate::error::Result;
use crate::types::{AuctionFile, FileDescriptor, FileStatus};

/// What to do with a remote snapshot descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing known for this URL, or the remote marker moved forward.
    Acquire,
    /// This exact version is already registered but its bytes never landed.
    Resume { file_id: i64 },
    /// The stored version is the same or newer. No network I/O.
    Skip { stored: i64 },
}

/// Decide against the latest known row for (realm, url). Download failures are
/// not "known": they must be filtered out by the caller's query.
pub fn decide(latest: Option<&AuctionFile>, remote: &FileDescriptor) -> Decision {
    match latest {
        None => Decision::Acquire,
        Some(stored) if remote.last_modified > stored.last_modified => Decision::Acquire,
        Some(stored)
            if remote.last_modified == stored.last_modified
                && stored.status == FileStatus::Pending =>
        {
            Decision::Resume { file_id: stored.id }
        }
        Some(stored) => Decision::Skip { stored: stored.last_modified },
    }
}

#[derive(Clone)]
pub struct ChangeDetector {
    store: Store,
}

impl ChangeDetector {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// One indexed lookup per descriptor.
    pub async fn check(&self, realm_id: i64, remote: &FileDescriptor) -> Result<Decision> {
        let latest = self.store.latest_known_file(realm_id, &remote.url).await?;
        Ok(decide(latest.as_ref(), remote))
    }
}
