//! Sync Engine - Mirrors a remote directory tree onto the local filesystem
//!
//! The engine walks the remote tree depth-first. For every directory it
//! lists the remote contents, downloads files that are missing or stale
//! locally, optionally prunes local entries that vanished remotely, and then
//! descends into the remote subdirectories. Local directories created by the
//! engine carry an ownership marker; only those are ever pruned.

use crate::compare::{local_state, LocalState};
use crate::excludes::Excludes;
use crate::marker::{ensure_owned, is_owned, DEFAULT_MARKER};
use crate::remote::{join_remote, RemoteEntry, RemoteError, RemoteFileService};
use filetime::{set_file_times, FileTime};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of the sibling file a download is written to before it replaces
/// the target
pub const PARTIAL_SUFFIX: &str = ".rfmpart";

/// Errors that abort a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch {path}")]
    Remote {
        path: String,
        #[source]
        source: RemoteError,
    },
    #[error("local I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    fn remote(path: &str, source: RemoteError) -> Self {
        SyncError::Remote {
            path: path.to_string(),
            source,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        SyncError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Paired remote and local directory visited by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub remote: String,
    pub local: PathBuf,
}

impl SyncTarget {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
        }
    }

    /// Descend one level on both sides at once
    pub fn child(&self, name: &str) -> Self {
        Self {
            remote: join_remote(&self.remote, name),
            local: self.local.join(name),
        }
    }
}

/// Options of a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub excludes: Excludes,
    /// Remove local entries that no longer exist remotely
    pub prune: bool,
    pub marker_name: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            excludes: Excludes::default(),
            prune: false,
            marker_name: DEFAULT_MARKER.to_string(),
        }
    }
}

/// Counters collected during a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub directories: usize,
    pub added: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub excluded: usize,
    pub removed: usize,
    pub bytes_downloaded: u64,
    pub duration: Duration,
}

impl SyncSummary {
    pub fn downloads(&self) -> usize {
        self.added + self.updated
    }
}

/// One-way mirror from a remote file service to a local directory
pub struct SyncEngine<'a, R: RemoteFileService + ?Sized> {
    remote: &'a R,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl<'a, R: RemoteFileService + ?Sized> SyncEngine<'a, R> {
    pub fn new(remote: &'a R, options: SyncOptions) -> Self {
        Self {
            remote,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run at the next entry once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Mirror `remote_dir` into `local_dir`
    ///
    /// Stops at the first error. A partial run leaves a consistent tree and
    /// can simply be repeated.
    pub async fn sync(&self, remote_dir: &str, local_dir: &Path) -> Result<SyncSummary, SyncError> {
        let start_time = Instant::now();
        let mut summary = SyncSummary::default();

        self.sync_dir(SyncTarget::new(remote_dir, local_dir), &mut summary)
            .await?;

        summary.duration = start_time.elapsed();
        info!(
            "Backup of {} completed in {:.2}s: {} added, {} updated, {} up to date, {} removed",
            remote_dir,
            summary.duration.as_secs_f64(),
            summary.added,
            summary.updated,
            summary.up_to_date,
            summary.removed
        );
        Ok(summary)
    }

    fn sync_dir<'s>(
        &'s self,
        target: SyncTarget,
        summary: &'s mut SyncSummary,
    ) -> BoxFuture<'s, Result<(), SyncError>> {
        async move {
            self.check_cancelled()?;

            // An excluded directory hides its whole subtree
            if self.options.excludes.contains(&target.remote) {
                info!("Excluding {}", target.remote);
                return Ok(());
            }

            info!("Fetching filelist for {}", target.remote);
            let listing = self
                .remote
                .list_directory(&target.remote, false)
                .await
                .map_err(|e| SyncError::remote(&target.remote, e))?;

            if target.local.exists() && !target.local.is_dir() {
                warn!(
                    "{} is a directory on the device but {} is not a local directory",
                    target.remote,
                    target.local.display()
                );
                return Err(SyncError::io(&target.local, type_conflict("directory")));
            }
            ensure_owned(&target.local, &self.options.marker_name)
                .map_err(|e| SyncError::io(&target.local, e))?;
            summary.directories += 1;

            info!(
                "Downloading new/changed files from {} to {}",
                target.remote,
                target.local.display()
            );
            for entry in listing.files.iter().filter(|f| !f.is_dir) {
                self.check_cancelled()?;
                self.update_file(&target, entry, summary).await?;
            }

            if self.options.prune {
                info!("Removing no longer existing files in {}", target.local.display());
                self.remove_deleted(&target, &listing.files, summary)?;
            }

            for entry in listing.files.iter().filter(|f| f.is_dir) {
                self.sync_dir(target.child(&entry.name), summary).await?;
            }

            Ok(())
        }
        .boxed()
    }

    async fn update_file(
        &self,
        target: &SyncTarget,
        entry: &RemoteEntry,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let file = target.child(&entry.name);

        if self.options.excludes.contains(&file.remote) {
            debug!("  Excluding:  {}", file.remote);
            summary.excluded += 1;
            return Ok(());
        }

        if file.local.is_dir() {
            warn!(
                "{} is a file on the device but {} is a local directory",
                file.remote,
                file.local.display()
            );
            return Err(SyncError::io(&file.local, type_conflict("file")));
        }

        let state = local_state(entry, &file.local).map_err(|e| SyncError::io(&file.local, e))?;
        if !state.needs_download() {
            debug!("  Up-to-date: {}", file.remote);
            summary.up_to_date += 1;
            return Ok(());
        }

        let fetched = self
            .remote
            .fetch_file(&file.remote)
            .await
            .map_err(|e| SyncError::remote(&file.remote, e))?;

        let mtime = FileTime::from_unix_time(
            entry.modified_at.timestamp(),
            entry.modified_at.timestamp_subsec_nanos(),
        );
        let partial = partial_path(&file.local);
        if let Err(e) = install_file(&partial, &file.local, &fetched.bytes, mtime).await {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", partial.display(), cleanup);
                }
            }
            return Err(SyncError::io(&file.local, e));
        }

        summary.bytes_downloaded += fetched.bytes.len() as u64;
        if state == LocalState::Missing {
            summary.added += 1;
            info!("  Added:      {} ({:.1} KiB/s)", file.remote, fetched.kib_per_sec());
        } else {
            summary.updated += 1;
            info!("  Updated:    {} ({:.1} KiB/s)", file.remote, fetched.kib_per_sec());
        }

        Ok(())
    }

    fn remove_deleted(
        &self,
        target: &SyncTarget,
        remote_entries: &[RemoteEntry],
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let marker = OsStr::new(self.options.marker_name.as_str());
        let existing: HashSet<&OsStr> = remote_entries
            .iter()
            .map(|e| OsStr::new(e.name.as_str()))
            .collect();

        let dir_entries =
            std::fs::read_dir(&target.local).map_err(|e| SyncError::io(&target.local, e))?;

        for dir_entry in dir_entries {
            self.check_cancelled()?;

            let dir_entry = dir_entry.map_err(|e| SyncError::io(&target.local, e))?;
            let name = dir_entry.file_name();
            if existing.contains(name.as_os_str()) || name.as_os_str() == marker {
                continue;
            }
            if name.to_str().is_none() {
                debug!("  Name of {} is not valid UTF-8", dir_entry.path().display());
            }

            let path = dir_entry.path();
            let is_dir = dir_entry
                .file_type()
                .map_err(|e| SyncError::io(&path, e))?
                .is_dir();

            if is_dir {
                if !is_owned(&target.local, &name, &self.options.marker_name) {
                    debug!("  Keeping unmanaged directory {}", path.display());
                    continue;
                }
                std::fs::remove_dir_all(&path).map_err(|e| SyncError::io(&path, e))?;
                info!("  Removed:    [d] {}", name.to_string_lossy());
            } else {
                std::fs::remove_file(&path).map_err(|e| SyncError::io(&path, e))?;
                info!("  Removed:    [f] {}", name.to_string_lossy());
            }
            summary.removed += 1;
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

/// Sibling of `target` that a download is staged in
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

/// Write `bytes` to `partial`, stamp it with `mtime` and move it over `target`
///
/// `target` is either left untouched or replaced by a complete file that
/// already carries the remote timestamp.
async fn install_file(
    partial: &Path,
    target: &Path,
    bytes: &[u8],
    mtime: FileTime,
) -> io::Result<()> {
    tokio::fs::write(partial, bytes).await?;
    set_file_times(partial, mtime, mtime)?;
    tokio::fs::rename(partial, target).await
}

fn type_conflict(remote_kind: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("local path conflicts with a remote {}", remote_kind),
    )
}

/// Mirror `remote_dir` into `local_dir` with the default marker name
pub async fn sync<R: RemoteFileService + ?Sized>(
    remote: &R,
    remote_dir: &str,
    local_dir: &Path,
    excludes: Excludes,
    prune: bool,
) -> Result<SyncSummary, SyncError> {
    let options = SyncOptions {
        excludes,
        prune,
        ..Default::default()
    };
    SyncEngine::new(remote, options).sync(remote_dir, local_dir).await
}
