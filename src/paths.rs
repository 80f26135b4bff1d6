//! Normalization of remote and local paths
//!
//! Exclude patterns are compared byte-wise, so both the patterns and the
//! candidate paths pass through these helpers first.

use path_clean::PathClean;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Drive prepended to remote paths without one
pub const DEFAULT_MOUNT: &str = "0:/";

/// Directory backed up when no remote path is given
pub const SYS_DIR: &str = "0:/sys";

fn multi_slash() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/{2,}").expect("valid regex"))
}

fn abs_remote() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]:/").expect("valid regex"))
}

/// Normalize a remote path
///
/// Trims whitespace, prefixes the default drive when the path has none,
/// collapses repeated slashes and drops a trailing slash except on a drive
/// root such as `0:/`.
pub fn clean_remote_path(path: &str) -> String {
    let trimmed = path.trim();

    let with_drive = if abs_remote().is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{}{}", DEFAULT_MOUNT, trimmed)
    };

    let collapsed = multi_slash().replace_all(&with_drive, "/").into_owned();
    match collapsed.strip_suffix('/') {
        Some(stripped) if !stripped.ends_with(':') => stripped.to_string(),
        _ => collapsed,
    }
}

/// Last component of a remote path
pub fn remote_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Make a local path absolute and lexically clean, expanding `~`
///
/// Falls back to the input when the working directory is unavailable.
pub fn absolute_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    let candidate = Path::new(expanded.as_ref());
    if candidate.is_absolute() {
        return candidate.clean();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(candidate).clean(),
        Err(_) => candidate.to_path_buf(),
    }
}

/// String form of [`absolute_path`], used for local exclude patterns
pub fn absolute_path_string(path: &str) -> String {
    absolute_path(path).to_string_lossy().into_owned()
}
