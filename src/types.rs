use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Eu,
    Us,
    Kr,
    Tw,
    Cn,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Eu => "eu",
            Region::Us => "us",
            Region::Kr => "kr",
            Region::Tw => "tw",
            Region::Cn => "cn",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eu" => Ok(Region::Eu),
            "us" => Ok(Region::Us),
            "kr" => Ok(Region::Kr),
            "tw" => Ok(Region::Tw),
            "cn" => Ok(Region::Cn),
            other => Err(AppError::Config(format!("unknown region '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Realm + folders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Realm {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub region: Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FolderKind {
    /// Incoming downloads waiting to be processed.
    #[serde(rename = "files-in")]
    FilesIn,
    /// Snapshots that reached PROCESSED.
    #[serde(rename = "files-archive")]
    FilesArchive,
}

impl FolderKind {
    pub const ALL: [FolderKind; 2] = [FolderKind::FilesIn, FolderKind::FilesArchive];

    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::FilesIn => "files-in",
            FolderKind::FilesArchive => "files-archive",
        }
    }
}

impl std::fmt::Display for FolderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FolderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "files-in" => Ok(FolderKind::FilesIn),
            "files-archive" => Ok(FolderKind::FilesArchive),
            other => Err(AppError::Config(format!("unknown folder kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmFolder {
    pub id: i64,
    pub realm_id: i64,
    pub kind: FolderKind,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Auction files
// ---------------------------------------------------------------------------

/// Lifecycle of one downloaded snapshot version.
///
/// `Pending → Downloaded → Processing → Processed`, with `Failed` reachable from
/// `Pending` (download) and `Processing` (parse). Nothing leaves `Processed` or
/// `Failed`. `Processing → Downloaded` exists only for abandoned claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Downloaded,
    Processing,
    Processed,
    Failed,
}

impl FileStatus {
    pub const ALL: [FileStatus; 5] = [
        FileStatus::Pending,
        FileStatus::Downloaded,
        FileStatus::Processing,
        FileStatus::Processed,
        FileStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Downloaded => "downloaded",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        use FileStatus::*;
        matches!(
            (self, next),
            (Pending, Downloaded)
                | (Pending, Failed)
                | (Downloaded, Processing)
                | (Downloaded, Failed)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Downloaded)
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| AppError::Config(format!("unknown file status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network or write failure. The same version may be fetched again next run.
    Download,
    /// Structurally invalid snapshot. Terminal for that version.
    Parse,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Download => "download",
            FailureKind::Parse => "parse",
        }
    }
}

impl FromStr for FailureKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(FailureKind::Download),
            "parse" => Ok(FailureKind::Parse),
            other => Err(AppError::Config(format!("unknown failure kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuctionFile {
    pub id: i64,
    pub realm_id: i64,
    pub url: String,
    /// Remote last-modified marker, opaque and monotonic per URL.
    pub last_modified: i64,
    pub file_name: String,
    pub status: FileStatus,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
}

/// What the directory service reports for one realm's current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDescriptor {
    pub url: String,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealmDescriptor {
    pub name: String,
    pub slug: String,
}

// ---------------------------------------------------------------------------
// Auction records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeLeft {
    #[serde(rename = "SHORT", alias = "short")]
    Short,
    #[serde(rename = "MEDIUM", alias = "medium")]
    Medium,
    #[serde(rename = "LONG", alias = "long")]
    Long,
    #[serde(rename = "VERY_LONG", alias = "very_long")]
    VeryLong,
}

impl TimeLeft {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeLeft::Short => "short",
            TimeLeft::Medium => "medium",
            TimeLeft::Long => "long",
            TimeLeft::VeryLong => "very_long",
        }
    }
}

impl FromStr for TimeLeft {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(TimeLeft::Short),
            "medium" => Ok(TimeLeft::Medium),
            "long" => Ok(TimeLeft::Long),
            "very_long" => Ok(TimeLeft::VeryLong),
            other => Err(AppError::ParseFailed(format!("unknown time-left '{other}'"))),
        }
    }
}

/// One listing decoded from a snapshot. Amounts are in copper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuctionRecord {
    pub auction_id: Option<i64>,
    pub item_id: i64,
    pub owner: Option<String>,
    pub owner_realm: Option<String>,
    pub quantity: u32,
    pub bid: u64,
    pub buyout: u64,
    pub time_left: TimeLeft,
    pub auction_file_id: i64,
    pub realm_id: i64,
}
