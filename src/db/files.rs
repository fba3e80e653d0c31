//! Auction files and auction records.
//!
//! Status changes are compare-and-set updates guarded by the expected current
//! status; a `false` return means another worker (or an earlier run) got there
//! first and the caller must not proceed.

use sqlx::{QueryBuilder, Sqlite};

use crate::config::RECORD_INSERT_CHUNK;
use crate::db::models::{
    into_files, AuctionFileRow, AuctionRow, StatusCountRow, AUCTION_FILE_COLUMNS,
};
use crate::db::{unix_now, Store};
use crate::error::{AppError, Result};
use crate::types::{AuctionFile, AuctionRecord, FailureKind, FileDescriptor, FileStatus, Region};

impl Store {
    pub async fn find_auction_file(&self, file_id: i64) -> Result<AuctionFile> {
        sqlx::query_as::<_, AuctionFileRow>(&format!(
            "SELECT {AUCTION_FILE_COLUMNS} FROM auction_files WHERE id = ?"
        ))
        .bind(file_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("auction file {file_id}")))?
        .try_into()
    }

    /// Most recent version of `url` for the realm that still counts as known:
    /// every row except download failures.
    pub async fn latest_known_file(&self, realm_id: i64, url: &str) -> Result<Option<AuctionFile>> {
        sqlx::query_as::<_, AuctionFileRow>(&format!(
            r#"
            SELECT {AUCTION_FILE_COLUMNS} FROM auction_files
            WHERE realm_id = ? AND url = ?
              AND NOT (status = 'failed' AND failure_kind = 'download')
            ORDER BY last_modified DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(realm_id)
        .bind(url)
        .fetch_optional(self.pool())
        .await?
        .map(AuctionFile::try_from)
        .transpose()
    }

    /// Insert a row for a new snapshot version. Returns `None` when a live row
    /// for (realm, url, last_modified) already exists.
    pub async fn create_auction_file(
        &self,
        realm_id: i64,
        descriptor: &FileDescriptor,
        file_name: &str,
        status: FileStatus,
    ) -> Result<Option<AuctionFile>> {
        let now = unix_now();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO auction_files
                (realm_id, url, last_modified, file_name, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(realm_id)
        .bind(&descriptor.url)
        .bind(descriptor.last_modified)
        .bind(file_name)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_auction_file(result.last_insert_rowid()).await.map(Some)
    }

    /// Retire PENDING rows of `url` older than `marker`: the remote only
    /// serves the newest version, so their bytes can no longer be fetched.
    pub async fn supersede_pending(&self, realm_id: i64, url: &str, marker: i64) -> Result<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'failed', failure_kind = 'download', failure_reason = ?,
                updated_at = ?
            WHERE realm_id = ? AND url = ? AND status = 'pending' AND last_modified < ?
            "#,
        )
        .bind(format!("superseded by {marker}"))
        .bind(unix_now())
        .bind(realm_id)
        .bind(url)
        .bind(marker)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Files of a region still waiting for their bytes, oldest first.
    pub async fn files_to_download(&self, region: Region) -> Result<Vec<AuctionFile>> {
        let rows = sqlx::query_as::<_, AuctionFileRow>(
            r#"
            SELECT f.id, f.realm_id, f.url, f.last_modified, f.file_name, f.status,
                   f.failure_kind, f.failure_reason, f.created_at
            FROM auction_files f
            JOIN realms r ON r.id = f.realm_id
            WHERE r.region = ? AND f.status = 'pending'
            ORDER BY f.realm_id, f.last_modified, f.id
            "#,
        )
        .bind(region.as_str())
        .fetch_all(self.pool())
        .await?;
        into_files(rows)
    }

    /// Files of a realm whose bytes are on disk and not yet parsed.
    pub async fn files_to_process(&self, realm_id: i64) -> Result<Vec<AuctionFile>> {
        let rows = sqlx::query_as::<_, AuctionFileRow>(&format!(
            r#"
            SELECT {AUCTION_FILE_COLUMNS} FROM auction_files
            WHERE realm_id = ? AND status = 'downloaded'
            ORDER BY last_modified, id
            "#
        ))
        .bind(realm_id)
        .fetch_all(self.pool())
        .await?;
        into_files(rows)
    }

    pub async fn list_files_for_realm(&self, realm_id: i64, limit: i64) -> Result<Vec<AuctionFile>> {
        let rows = sqlx::query_as::<_, AuctionFileRow>(&format!(
            r#"
            SELECT {AUCTION_FILE_COLUMNS} FROM auction_files
            WHERE realm_id = ?
            ORDER BY last_modified DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(realm_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        into_files(rows)
    }

    /// `PENDING → DOWNLOADED`.
    pub async fn mark_downloaded(&self, file_id: i64) -> Result<bool> {
        self.transition(file_id, FileStatus::Pending, FileStatus::Downloaded).await
    }

    /// Move a file into FAILED from `from`, recording why.
    pub async fn mark_failed(
        &self,
        file_id: i64,
        from: FileStatus,
        kind: FailureKind,
        reason: &str,
    ) -> Result<bool> {
        debug_assert!(from.can_transition_to(FileStatus::Failed));
        let affected = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'failed', failure_kind = ?, failure_reason = ?,
                claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(reason)
        .bind(unix_now())
        .bind(file_id)
        .bind(from.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// `DOWNLOADED → PROCESSING`. Only one caller can win the claim.
    pub async fn claim_for_processing(&self, file_id: i64) -> Result<bool> {
        let now = unix_now();
        let affected = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'processing', claimed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'downloaded'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(file_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// Commit every record of a claimed file together with `PROCESSING →
    /// PROCESSED` in one transaction. Returns `false` (and writes nothing) if
    /// the file is no longer claimed.
    pub async fn commit_records(&self, file_id: i64, records: &[AuctionRecord]) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'processed', claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(unix_now())
        .bind(file_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            return Ok(false);
        }

        for chunk in records.chunks(RECORD_INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO auctions (auction_file_id, realm_id, auction_id, item_id, owner, \
                 owner_realm, quantity, bid, buyout, time_left) ",
            );
            qb.push_values(chunk, |mut row, r| {
                row.push_bind(r.auction_file_id)
                    .push_bind(r.realm_id)
                    .push_bind(r.auction_id)
                    .push_bind(r.item_id)
                    .push_bind(r.owner.clone())
                    .push_bind(r.owner_realm.clone())
                    .push_bind(i64::from(r.quantity))
                    .push_bind(r.bid as i64)
                    .push_bind(r.buyout as i64)
                    .push_bind(r.time_left.as_str());
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// `PROCESSING → DOWNLOADED` for a claim given up before its commit.
    pub async fn release_claim(&self, file_id: i64) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'downloaded', claimed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(unix_now())
        .bind(file_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// Return claims older than `lease_secs` to DOWNLOADED. Their commit never
    /// happened, so they own no records.
    pub async fn release_stale_claims(&self, lease_secs: i64) -> Result<u64> {
        let now = unix_now();
        let affected = sqlx::query(
            r#"
            UPDATE auction_files
            SET status = 'downloaded', claimed_at = NULL, updated_at = ?
            WHERE status = 'processing' AND claimed_at <= ?
            "#,
        )
        .bind(now)
        .bind(now - lease_secs)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn count_records_for_file(&self, file_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auctions WHERE auction_file_id = ?")
            .bind(file_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_records(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM auctions")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_realms(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM realms")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn file_status_counts(&self) -> Result<Vec<StatusCountRow>> {
        let rows = sqlx::query_as::<_, StatusCountRow>(
            "SELECT status, COUNT(*) AS files FROM auction_files GROUP BY status ORDER BY status",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Records of the realm's most recently processed snapshot.
    pub async fn latest_auctions_for_realm(
        &self,
        realm_id: i64,
        item_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AuctionRow>> {
        let rows = sqlx::query_as::<_, AuctionRow>(
            r#"
            SELECT a.id, a.auction_file_id, a.realm_id, a.auction_id, a.item_id, a.owner,
                   a.owner_realm, a.quantity, a.bid, a.buyout, a.time_left
            FROM auctions a
            WHERE a.auction_file_id = (
                SELECT id FROM auction_files
                WHERE realm_id = ? AND status = 'processed'
                ORDER BY last_modified DESC, id DESC
                LIMIT 1
            )
              AND (? IS NULL OR a.item_id = ?)
            ORDER BY a.id
            LIMIT ?
            "#,
        )
        .bind(realm_id)
        .bind(item_id)
        .bind(item_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    async fn transition(&self, file_id: i64, from: FileStatus, to: FileStatus) -> Result<bool> {
        debug_assert!(from.can_transition_to(to));
        let affected = sqlx::query(
            "UPDATE auction_files SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(unix_now())
        .bind(file_id)
        .bind(from.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(affected == 1)
    }
}
