use std::time::Instant;

use tracing::{info, warn};

use crate::directory::SyncReport;
use crate::pipeline::latency::Percentiles;
use crate::types::{Realm, Region};

/// Something that went wrong for one file or one descriptor lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureNote {
    /// URL or file name the failure is about.
    pub target: String,
    pub reason: String,
}

/// Per-realm outcome of one run.
#[derive(Debug, Clone)]
pub struct RealmReport {
    pub realm_id: i64,
    pub realm: String,
    pub region: Region,
    /// Descriptors whose version was already known.
    pub skipped: usize,
    pub downloaded: usize,
    pub processed: usize,
    pub failed: usize,
    pub records: usize,
    pub failures: Vec<FailureNote>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl RealmReport {
    pub fn new(realm: &Realm) -> Self {
        Self {
            realm_id: realm.id,
            realm: realm.name.clone(),
            region: realm.region,
            skipped: 0,
            downloaded: 0,
            processed: 0,
            failed: 0,
            records: 0,
            failures: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn fail(&mut self, target: impl Into<String>, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(FailureNote { target: target.into(), reason: reason.into() });
    }

    /// Widen the active interval to cover one more unit of work.
    pub fn touch(&mut self, started: Instant, finished: Instant) {
        self.started_at = Some(self.started_at.map_or(started, |s| s.min(started)));
        self.finished_at = Some(self.finished_at.map_or(finished, |f| f.max(finished)));
    }

    pub fn merge(&mut self, other: RealmReport) {
        self.skipped += other.skipped;
        self.downloaded += other.downloaded;
        self.processed += other.processed;
        self.failed += other.failed;
        self.records += other.records;
        self.failures.extend(other.failures);
        if let (Some(s), Some(f)) = (other.started_at, other.finished_at) {
            self.touch(s, f);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub realms: usize,
    pub skipped: usize,
    pub downloaded: usize,
    pub processed: usize,
    pub failed: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sync: Option<SyncReport>,
    /// Ordered by realm id.
    pub realms: Vec<RealmReport>,
    pub released_claims: u64,
    pub transfers: Option<Percentiles>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn totals(&self) -> Totals {
        self.realms.iter().fold(
            Totals { realms: self.realms.len(), ..Totals::default() },
            |mut t, r| {
                t.skipped += r.skipped;
                t.downloaded += r.downloaded;
                t.processed += r.processed;
                t.failed += r.failed;
                t.records += r.records;
                t
            },
        )
    }

    pub fn log(&self) {
        for r in &self.realms {
            for note in &r.failures {
                warn!(region = %r.region, realm = %r.realm, about = %note.target, "Failed: {}", note.reason);
            }
        }

        let t = self.totals();
        info!(
            realms = t.realms,
            skipped = t.skipped,
            downloaded = t.downloaded,
            processed = t.processed,
            failed = t.failed,
            records = t.records,
            released_claims = self.released_claims,
            cancelled = self.cancelled,
            "Run finished: {} downloaded, {} processed, {} failed, {} records",
            t.downloaded,
            t.processed,
            t.failed,
            t.records,
        );

        if let Some(p) = self.transfers {
            info!(
                samples = p.samples,
                "Transfer latency: p50={}ms p95={}ms p99={}ms",
                p.p50_ms,
                p.p95_ms,
                p.p99_ms,
            );
        }
    }
}
