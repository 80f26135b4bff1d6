//! rfm-sync - Incremental backup and file management for RepRapFirmware boards
//!
//! Mirrors a directory tree from a RepRapFirmware device onto local disk,
//! downloading only files that are missing or older locally, and optionally
//! pruning local entries that disappeared from the device.
//!
//! ## Core Features
//!
//! - **Incremental Backup**: Modification-time based change detection
//! - **Safe Pruning**: Only directories carrying an ownership marker are removed
//! - **Exclude Patterns**: Prefix based exclusion of files and whole subtrees
//! - **File Management**: Upload, download, list, move and delete on the device
//! - **Configuration Management**: YAML-based per-device settings with XDG compliance
//!
//! ## Modules
//!
//! - [`sync`]: The backup engine
//! - [`remote`]: Remote file service abstraction
//! - [`rrf`]: RepRapFirmware HTTP client
//! - [`config`]: Configuration management and parsing

pub mod compare;
pub mod config;
pub mod excludes;
pub mod format;
pub mod marker;
pub mod ops;
pub mod paths;
pub mod remote;
pub mod rrf;
pub mod sync;

pub use config::Config;
pub use excludes::Excludes;
pub use remote::{
    FetchedFile, FileInfo, Filelist, RemoteEntry, RemoteError, RemoteFileManager,
    RemoteFileService,
};
pub use rrf::RrfClient;
pub use sync::{sync, SyncEngine, SyncError, SyncOptions, SyncSummary, SyncTarget};
