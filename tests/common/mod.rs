//! Common test utilities and helpers for rfm-sync tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rfm_sync::remote::join_remote;
use rfm_sync::{
    FetchedFile, FileInfo, Filelist, RemoteEntry, RemoteError, RemoteFileManager,
    RemoteFileService,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Test workspace with a local backup directory and a config file location
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub backup_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backup_dir = temp_dir.path().join("backup");
        let config_path = temp_dir.path().join("rfm").join("config.yml");

        Self {
            temp_dir,
            backup_dir,
            config_path,
        }
    }

    pub fn local(&self, relative: &str) -> PathBuf {
        self.backup_dir.join(relative)
    }

    pub fn create_test_config(&self, content: &str) -> PathBuf {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create config dir");
        }
        std::fs::write(&self.config_path, content).expect("Failed to write test config");
        self.config_path.clone()
    }
}

/// Fixed reference time for remote entries
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

pub fn later(seconds: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(seconds)
}

#[derive(Debug, Clone)]
enum FakeNode {
    File {
        content: Vec<u8>,
        modified: DateTime<Utc>,
    },
    Dir {
        modified: DateTime<Utc>,
    },
}

/// In-memory remote file store keyed by full remote path
#[derive(Default)]
pub struct FakeDevice {
    nodes: Mutex<BTreeMap<String, FakeNode>>,
    fetches: Mutex<Vec<String>>,
    listings: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory (and its ancestors below the drive root)
    pub fn with_dir(self, path: &str) -> Self {
        self.add_dir(path);
        self
    }

    pub fn with_file(self, path: &str, content: &str, modified: DateTime<Utc>) -> Self {
        self.put_file(path, content, modified);
        self
    }

    pub fn add_dir(&self, path: &str) {
        let mut nodes = self.nodes.lock().unwrap();
        let mut current = String::new();
        for (i, part) in path.split('/').enumerate() {
            current = if i == 0 {
                part.to_string()
            } else {
                join_remote(&current, part)
            };
            // Skip the drive itself, e.g. "0:"
            if i > 0 && !part.is_empty() {
                nodes.entry(current.clone()).or_insert(FakeNode::Dir {
                    modified: base_time(),
                });
            }
        }
    }

    pub fn put_file(&self, path: &str, content: &str, modified: DateTime<Utc>) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent);
        }
        self.nodes.lock().unwrap().insert(
            path.to_string(),
            FakeNode::File {
                content: content.as_bytes().to_vec(),
                modified,
            },
        );
    }

    /// Remove a file or a directory with everything below it
    pub fn remove(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.nodes
            .lock()
            .unwrap()
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    /// Make every access to `path` fail
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn listings(&self) -> Vec<String> {
        self.listings.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(path)
    }

    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().unwrap().get(path) {
            Some(FakeNode::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    fn check_failing(&self, path: &str) -> Result<(), RemoteError> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(RemoteError::Firmware {
                code: 1,
                context: path.to_string(),
            });
        }
        Ok(())
    }

    fn list_level(&self, path: &str) -> Result<Filelist, RemoteError> {
        self.listings.lock().unwrap().push(path.to_string());
        self.check_failing(path)?;

        let nodes = self.nodes.lock().unwrap();
        let is_root = path.ends_with(":/") || path.ends_with(':');
        if !is_root && !matches!(nodes.get(path), Some(FakeNode::Dir { .. })) {
            return Err(RemoteError::NotFound(path.to_string()));
        }

        let files = nodes
            .iter()
            .filter_map(|(key, node)| {
                let name = key.strip_prefix(path)?;
                let name = name.strip_prefix('/').unwrap_or(name);
                if name.is_empty() || name.contains('/') || join_remote(path, name) != *key {
                    return None;
                }
                Some(match node {
                    FakeNode::File { content, modified } => {
                        RemoteEntry::file(name, content.len() as u64, *modified)
                    }
                    FakeNode::Dir { modified } => RemoteEntry::dir(name, *modified),
                })
            })
            .collect();

        Ok(Filelist {
            dir: path.to_string(),
            files,
            subdirs: Vec::new(),
        })
    }

    fn list_tree(&self, path: &str) -> Result<Filelist, RemoteError> {
        let mut list = self.list_level(path)?;
        let dirs: Vec<String> = list
            .files
            .iter()
            .filter(|f| f.is_dir)
            .map(|f| list.child_path(&f.name))
            .collect();
        for dir in dirs {
            list.subdirs.push(self.list_tree(&dir)?);
        }
        Ok(list)
    }
}

#[async_trait]
impl RemoteFileService for FakeDevice {
    async fn list_directory(&self, path: &str, recursive: bool) -> Result<Filelist, RemoteError> {
        if recursive {
            self.list_tree(path)
        } else {
            self.list_level(path)
        }
    }

    async fn fetch_file(&self, path: &str) -> Result<FetchedFile, RemoteError> {
        self.fetches.lock().unwrap().push(path.to_string());
        self.check_failing(path)?;

        match self.nodes.lock().unwrap().get(path) {
            Some(FakeNode::File { content, .. }) => Ok(FetchedFile {
                bytes: content.clone(),
                elapsed: std::time::Duration::from_millis(1),
            }),
            _ => Err(RemoteError::NotFound(path.to_string())),
        }
    }
}

#[async_trait]
impl RemoteFileManager for FakeDevice {
    async fn upload(
        &self,
        path: &str,
        content: Vec<u8>,
        modified: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        self.check_failing(path)?;
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent);
        }
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), FakeNode::File { content, modified });
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.deletes.lock().unwrap().push(path.to_string());
        self.check_failing(path)?;

        let mut nodes = self.nodes.lock().unwrap();
        let prefix = format!("{}/", path);
        if nodes.keys().any(|k| k.starts_with(&prefix)) {
            return Err(RemoteError::Firmware {
                code: 1,
                context: format!("{} is not empty", path),
            });
        }
        nodes
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    async fn mkdir(&self, path: &str) -> Result<(), RemoteError> {
        self.check_failing(path)?;
        self.add_dir(path);
        Ok(())
    }

    async fn move_entry(
        &self,
        old_path: &str,
        new_path: &str,
        delete_existing: bool,
    ) -> Result<(), RemoteError> {
        self.check_failing(old_path)?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(new_path) && !delete_existing {
            return Err(RemoteError::Firmware {
                code: 1,
                context: format!("{} exists", new_path),
            });
        }
        let node = nodes
            .remove(old_path)
            .ok_or_else(|| RemoteError::NotFound(old_path.to_string()))?;
        nodes.insert(new_path.to_string(), node);
        Ok(())
    }

    async fn fileinfo(&self, path: &str) -> Result<FileInfo, RemoteError> {
        match self.nodes.lock().unwrap().get(path) {
            Some(FakeNode::File { content, modified }) => Ok(FileInfo {
                size: content.len() as u64,
                last_modified: Some(*modified),
            }),
            _ => Err(RemoteError::Firmware {
                code: 1,
                context: path.to_string(),
            }),
        }
    }
}

/// Relative paths of all regular files below `root`, sorted
pub fn local_files(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
