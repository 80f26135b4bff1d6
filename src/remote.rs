//! Remote file service abstraction
//!
//! The sync engine and the single-step operations only talk to the device
//! through [`RemoteFileService`]. The RepRapFirmware HTTP implementation
//! lives in [`crate::rrf`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a remote file service
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("device returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("device reported error {code} for {context}")]
    Firmware { code: i64, context: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// A single entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            modified_at,
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified_at,
            is_dir: true,
        }
    }
}

/// Contents of one remote directory
///
/// `subdirs` is only populated by recursive listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filelist {
    pub dir: String,
    pub files: Vec<RemoteEntry>,
    pub subdirs: Vec<Filelist>,
}

impl Filelist {
    /// Sum of all file sizes at this level
    pub fn total_size(&self) -> u64 {
        self.files.iter().filter(|f| !f.is_dir).map(|f| f.size).sum()
    }

    /// Full remote path of a direct child
    pub fn child_path(&self, name: &str) -> String {
        join_remote(&self.dir, name)
    }
}

/// Append `name` to the remote directory `dir`
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// File content returned by [`RemoteFileService::fetch_file`]
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub elapsed: Duration,
}

impl FetchedFile {
    /// Transfer rate in KiB/s, zero when the duration is not measurable
    pub fn kib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes.len() as f64 / secs) / 1024.0
    }
}

/// Listing and transfer operations consumed by the sync engine
#[async_trait]
pub trait RemoteFileService: Send + Sync {
    /// List a remote directory, descending into subdirectories when `recursive`
    async fn list_directory(&self, path: &str, recursive: bool) -> Result<Filelist, RemoteError>;

    /// Download a remote file
    async fn fetch_file(&self, path: &str) -> Result<FetchedFile, RemoteError>;
}

/// Metadata of a single remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Mutating operations used by the single-step commands
#[async_trait]
pub trait RemoteFileManager: RemoteFileService {
    /// Store `content` at `path`, stamping it with `modified`
    async fn upload(
        &self,
        path: &str,
        content: Vec<u8>,
        modified: DateTime<Utc>,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    async fn mkdir(&self, path: &str) -> Result<(), RemoteError>;

    /// Rename or move within a drive
    async fn move_entry(
        &self,
        old_path: &str,
        new_path: &str,
        delete_existing: bool,
    ) -> Result<(), RemoteError>;

    async fn fileinfo(&self, path: &str) -> Result<FileInfo, RemoteError>;
}
