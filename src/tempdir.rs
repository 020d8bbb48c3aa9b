//! Working directory management.

use std::path::{Path, PathBuf};

use crate::config::TEMP_DIRECTORY_NAME;
use crate::error::{BootstrapError, Result};

/// Directory containing the running executable
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// `.temp` under the system temp directory
pub fn system_location() -> PathBuf {
    std::env::temp_dir().join(TEMP_DIRECTORY_NAME)
}

/// `.temp` next to the executable, or under the system temp directory when
/// the executable location is unknown
pub fn default_location() -> PathBuf {
    exe_dir()
        .map(|dir| dir.join(TEMP_DIRECTORY_NAME))
        .unwrap_or_else(system_location)
}

/// Make sure `path` exists, deleting it first when `clean` is set.
pub fn prepare(path: &Path, clean: bool) -> Result<()> {
    if clean && path.exists() {
        tracing::trace!(path = %path.display(), "Cleaning temp directory");
        std::fs::remove_dir_all(path).map_err(|e| {
            BootstrapError::io(format!("Can't clean temporary directory {}", path.display()), e)
        })?;
    }

    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            BootstrapError::io(format!("Can't create temporary directory {}", path.display()), e)
        })?;
        tracing::debug!(path = %path.display(), "Created temp directory");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a/b");
        prepare(&dir, false).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn clean_removes_previous_content() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("marker");
        std::fs::write(&marker, b"x").unwrap();

        prepare(root.path(), false).unwrap();
        assert!(marker.exists());

        prepare(root.path(), true).unwrap();
        assert!(root.path().is_dir());
        assert!(!marker.exists());
    }

    #[test]
    fn creation_failure_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        let err = prepare(&file.join("sub"), false).unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }

    #[test]
    fn default_location_ends_with_temp_name() {
        assert!(default_location().ends_with(TEMP_DIRECTORY_NAME));
    }
}
