//! Staleness check between a remote file entry and its local copy

use crate::remote::RemoteEntry;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;

/// State of a local file relative to its remote counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// No local file exists yet
    Missing,
    /// The local file is older than the remote one
    Stale,
    /// The local file is at least as new as the remote one
    Current,
}

impl LocalState {
    pub fn needs_download(self) -> bool {
        !matches!(self, LocalState::Current)
    }
}

/// Compare the local file at `local_path` against `entry`
///
/// Only modification times are compared; contents are never hashed.
pub fn local_state(entry: &RemoteEntry, local_path: &Path) -> io::Result<LocalState> {
    let meta = match fs::metadata(local_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalState::Missing),
        Err(e) => return Err(e),
    };

    let local_mtime: DateTime<Utc> = meta.modified()?.into();
    if local_mtime < entry.modified_at {
        Ok(LocalState::Stale)
    } else {
        Ok(LocalState::Current)
    }
}

/// True when the local file is missing or older than the remote entry
pub fn needs_download(entry: &RemoteEntry, local_path: &Path) -> io::Result<bool> {
    local_state(entry, local_path).map(LocalState::needs_download)
}
