//! The three ingestion stages and the coordinator that drives them.

pub mod acquirer;
pub mod coordinator;
pub mod detector;
pub mod latency;
pub mod processor;
pub mod snapshot;
pub mod summary;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use acquirer::{Acquired, FileAcquirer};
pub use coordinator::Coordinator;
pub use detector::{ChangeDetector, Decision};
pub use processor::{Processed, SnapshotProcessor};
pub use summary::{RealmReport, RunSummary};

/// Run-level cancellation signal. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
