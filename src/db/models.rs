//! Database row types matching `migrations/0001_init.sql`.
//! Enumerated columns are TEXT and are checked when converted to domain types.
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::types::{AuctionFile, FailureKind, FileStatus, Realm, RealmFolder};

#[derive(Debug, sqlx::FromRow)]
pub struct RealmRow {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub region: String,
}

impl TryFrom<RealmRow> for Realm {
    type Error = AppError;

    fn try_from(row: RealmRow) -> Result<Self> {
        Ok(Realm {
            id: row.id,
            name: row.name,
            slug: row.slug,
            region: row.region.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RealmFolderRow {
    pub id: i64,
    pub realm_id: i64,
    pub kind: String,
    pub path: String,
}

impl TryFrom<RealmFolderRow> for RealmFolder {
    type Error = AppError;

    fn try_from(row: RealmFolderRow) -> Result<Self> {
        Ok(RealmFolder {
            id: row.id,
            realm_id: row.realm_id,
            kind: row.kind.parse()?,
            path: PathBuf::from(row.path),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AuctionFileRow {
    pub id: i64,
    pub realm_id: i64,
    pub url: String,
    pub last_modified: i64,
    pub file_name: String,
    pub status: String,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
}

impl TryFrom<AuctionFileRow> for AuctionFile {
    type Error = AppError;

    fn try_from(row: AuctionFileRow) -> Result<Self> {
        let status: FileStatus = row.status.parse()?;
        let failure_kind = row
            .failure_kind
            .as_deref()
            .map(str::parse::<FailureKind>)
            .transpose()?;
        Ok(AuctionFile {
            id: row.id,
            realm_id: row.realm_id,
            url: row.url,
            last_modified: row.last_modified,
            file_name: row.file_name,
            status,
            failure_kind,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
        })
    }
}

/// Auction record as served by the query API.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuctionRow {
    pub id: i64,
    pub auction_file_id: i64,
    pub realm_id: i64,
    pub auction_id: Option<i64>,
    pub item_id: i64,
    pub owner: Option<String>,
    pub owner_realm: Option<String>,
    pub quantity: i64,
    pub bid: i64,
    pub buyout: i64,
    pub time_left: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub files: i64,
}

pub(crate) const AUCTION_FILE_COLUMNS: &str = "id, realm_id, url, last_modified, file_name, status, \
     failure_kind, failure_reason, created_at";

pub(crate) fn into_files(rows: Vec<AuctionFileRow>) -> Result<Vec<AuctionFile>> {
    rows.into_iter().map(AuctionFile::try_from).collect()
}
