//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Read a whole file, reporting failures as `internal.io_error` tagged with `operation`.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("{} ({})", operation, path.display())),
        )
    })
}

/// Write through a sibling `.tmp` file and rename it into place, so readers
/// see either the old or the new content.
pub fn write_file_atomic(path: &Path, content: &str, operation: &str) -> Result<()> {
    let io_err = |e: std::io::Error, stage: &str| {
        Error::internal_io(e.to_string(), Some(format!("{} ({})", operation, stage)))
    };

    let file_name = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some(operation.to_string()),
        )
    })?;
    let tmp_path = path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));

    fs::write(&tmp_path, content).map_err(|e| io_err(e, "write temp"))?;
    fs::rename(&tmp_path, path).map_err(|e| io_err(e, "rename"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_file_reports_operation() {
        let err = read_file(Path::new("/nonexistent/state.json"), "read state").unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(err.details["context"]
            .as_str()
            .unwrap()
            .starts_with("read state"));
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deployment.json");
        write_file_atomic(&path, "one", "test").unwrap();
        write_file_atomic(&path, "two", "test").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("deployment.json.tmp").exists());
    }

    #[test]
    fn atomic_write_fails_when_parent_is_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("file.json");
        assert!(write_file_atomic(&path, "x", "test").is_err());
    }
}
