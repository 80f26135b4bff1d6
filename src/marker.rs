//! Ownership marker for locally managed directories
//!
//! A directory is owned by the backup engine iff it contains the marker file.
//! Only owned directories are ever pruned.

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Default name of the marker file placed in every managed directory
pub const DEFAULT_MARKER: &str = ".rfmbackup";

/// Create `dir` (with parents) if needed and place the marker file inside it
pub fn ensure_owned(dir: &Path, marker: &str) -> io::Result<()> {
    if !dir.exists() {
        debug!("Creating directory {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    let marker_path = dir.join(marker);
    if !marker_path.exists() {
        fs::File::create(&marker_path)?;
    }

    Ok(())
}

/// Check whether `base/name` is a directory carrying the marker
///
/// Errors of any kind count as "not owned".
pub fn is_owned(base: &Path, name: impl AsRef<Path>, marker: &str) -> bool {
    let dir = base.join(name);
    match fs::metadata(&dir) {
        Ok(meta) if meta.is_dir() => fs::metadata(dir.join(marker)).is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_owned_creates_nested_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");

        ensure_owned(&dir, DEFAULT_MARKER).unwrap();

        assert!(dir.is_dir());
        let marker = dir.join(DEFAULT_MARKER);
        assert!(marker.is_file());
        assert_eq!(fs::metadata(&marker).unwrap().len(), 0);
    }

    #[test]
    fn test_ensure_owned_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("keep.txt"), b"data").unwrap();

        ensure_owned(temp.path(), DEFAULT_MARKER).unwrap();
        ensure_owned(temp.path(), DEFAULT_MARKER).unwrap();

        assert!(temp.path().join(DEFAULT_MARKER).is_file());
        assert_eq!(fs::read(temp.path().join("keep.txt")).unwrap(), b"data");
    }

    #[test]
    fn test_ensure_owned_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        assert!(ensure_owned(&file, DEFAULT_MARKER).is_err());
    }

    #[test]
    fn test_is_owned() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("managed")).unwrap();
        fs::File::create(temp.path().join("managed").join(".marker")).unwrap();
        fs::create_dir(temp.path().join("manual")).unwrap();
        fs::write(temp.path().join("file.g"), b"G28").unwrap();

        assert!(is_owned(temp.path(), "managed", ".marker"));
        assert!(!is_owned(temp.path(), "manual", ".marker"));
        assert!(!is_owned(temp.path(), "managed", DEFAULT_MARKER));
        assert!(!is_owned(temp.path(), "file.g", ".marker"));
        assert!(!is_owned(temp.path(), "missing", ".marker"));
    }
}
