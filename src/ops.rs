//! Single-step file operations on a device
//!
//! Thin compositions of [`RemoteFileManager`] calls used by the `download`,
//! `upload`, `rm` and `mv` commands.

use crate::excludes::Excludes;
use crate::paths::clean_remote_path;
use crate::remote::{join_remote, Filelist, RemoteFileManager, RemoteFileService};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Download a single remote file to `local_path`
pub async fn download_file<R: RemoteFileService + ?Sized>(
    remote: &R,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64> {
    let fetched = remote
        .fetch_file(remote_path)
        .await
        .with_context(|| format!("Failed to download {}", remote_path))?;

    tokio::fs::write(local_path, &fetched.bytes)
        .await
        .with_context(|| format!("Failed to write {}", local_path.display()))?;

    info!(
        "Downloaded: {} to {} ({:.1} KiB/s)",
        remote_path,
        local_path.display(),
        fetched.kib_per_sec()
    );
    Ok(fetched.bytes.len() as u64)
}

/// A local file scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local: PathBuf,
    pub remote: String,
}

/// Walk `local_root` and pair every file with its remote destination
///
/// Excluded paths are skipped; an excluded directory is not descended into.
/// A single file uploads to `remote_root/<file name>`.
pub fn plan_upload(local_root: &Path, remote_root: &str, excludes: &Excludes) -> Result<Vec<UploadItem>> {
    let mut items = Vec::new();
    walk(local_root, local_root, remote_root, excludes, &mut items)?;
    Ok(items)
}

fn walk(
    root: &Path,
    path: &Path,
    remote_root: &str,
    excludes: &Excludes,
    items: &mut Vec<UploadItem>,
) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if excludes.contains(&path.to_string_lossy()) {
        if metadata.is_dir() {
            debug!("Skipping directory {}", path.display());
        } else {
            debug!("Skipping {}", path.display());
        }
        return Ok(());
    }

    if metadata.is_dir() {
        let mut children: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .with_context(|| format!("Failed to read directory {}", path.display()))?;
        children.sort();

        for child in children {
            walk(root, &child, remote_root, excludes, items)?;
        }
        return Ok(());
    }

    let relative = match path.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    items.push(UploadItem {
        local: path.to_path_buf(),
        remote: clean_remote_path(&format!("{}/{}", remote_root, relative)),
    });
    Ok(())
}

/// Upload a file or directory tree, preserving local modification times
///
/// Remote directories are created implicitly by the device.
pub async fn upload_tree<R: RemoteFileManager + ?Sized>(
    remote: &R,
    local_root: &Path,
    remote_root: &str,
    excludes: &Excludes,
) -> Result<usize> {
    let items = plan_upload(local_root, remote_root, excludes)?;

    for item in &items {
        let content = tokio::fs::read(&item.local)
            .await
            .with_context(|| format!("Failed to read {}", item.local.display()))?;
        let modified: DateTime<Utc> = std::fs::metadata(&item.local)
            .and_then(|m| m.modified())
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        debug!("Uploading {} to {}", item.local.display(), item.remote);
        remote
            .upload(&item.remote, content, modified)
            .await
            .with_context(|| format!("Failed to upload {}", item.remote))?;
    }

    info!("Uploaded {} file(s) to {}", items.len(), remote_root);
    Ok(items.len())
}

/// Delete a remote file or directory
///
/// Directories are only removed by the device when empty unless
/// `recursive` is set, in which case all contents go first.
pub async fn remove<R: RemoteFileManager + ?Sized>(remote: &R, path: &str, recursive: bool) -> Result<()> {
    if !recursive {
        debug!("Deleting {}", path);
        return remote
            .delete(path)
            .await
            .with_context(|| format!("Failed to delete {}", path));
    }

    let list = remote
        .list_directory(path, true)
        .await
        .with_context(|| format!("Failed to list {}", path))?;
    delete_contents(remote, &list).await?;

    debug!("Deleting {}", list.dir);
    remote
        .delete(&list.dir)
        .await
        .with_context(|| format!("Failed to delete {}", list.dir))
}

fn delete_contents<'a, R: RemoteFileManager + ?Sized>(
    remote: &'a R,
    list: &'a Filelist,
) -> BoxFuture<'a, Result<()>> {
    async move {
        for sub in &list.subdirs {
            delete_contents(remote, sub).await?;
        }

        // Subdirectory entries are deleted last, once they are empty
        let (dirs, files): (Vec<_>, Vec<_>) = list.files.iter().partition(|f| f.is_dir);
        for entry in files.into_iter().chain(dirs) {
            let path = join_remote(&list.dir, &entry.name);
            debug!("Deleting {}", path);
            remote
                .delete(&path)
                .await
                .with_context(|| format!("Failed to delete {}", path))?;
        }
        Ok(())
    }
    .boxed()
}

/// Move `old_path` to `new_path`, deleting an existing target when `force`
pub async fn move_entry<R: RemoteFileManager + ?Sized>(
    remote: &R,
    old_path: &str,
    new_path: &str,
    force: bool,
) -> Result<()> {
    if force {
        debug!("Checking existence of {}", new_path);
        if remote.fileinfo(new_path).await.is_ok() {
            debug!("Deleting {}", new_path);
            remote
                .delete(new_path)
                .await
                .with_context(|| format!("Failed to delete {}", new_path))?;
        }
    }

    remote
        .move_entry(old_path, new_path, false)
        .await
        .with_context(|| format!("Failed to move {} to {}", old_path, new_path))
}
