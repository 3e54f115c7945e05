//! Versioned JSON state files
//!
//! A save writes `<file>.tmp`, copies the current file to `<file>.backup` and
//! renames the temporary file into place. The primary name therefore always
//! holds a complete file once one has been written; a crash leaves at most a
//! stale `.tmp` behind. Loading falls back to the backup when the primary is
//! missing or unreadable, but never past a file written by a newer version.

use crate::error::{ControlPlaneError, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    sibling(path, "backup")
}

/// Replace `path` with `content` in one rename
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, content)?;
    if path.exists() {
        fs::copy(path, backup_path(path))?;
    }
    fs::rename(&tmp, path)?;
    tracing::trace!("Wrote {}", path.display());
    Ok(())
}

/// Read and parse `path`, or its backup. `Ok(None)` when neither exists.
pub(crate) fn read_with_backup<T>(
    path: &Path,
    parse: impl Fn(&str) -> Result<T>,
) -> Result<Option<T>> {
    let backup = backup_path(path);
    let read = |p: &Path| -> Result<T> { parse(&fs::read_to_string(p)?) };

    if !path.exists() {
        if !backup.exists() {
            return Ok(None);
        }
        tracing::warn!("{} is missing, restoring from backup", path.display());
        return read(&backup).map(Some);
    }
    match read(path) {
        Ok(value) => Ok(Some(value)),
        Err(e @ ControlPlaneError::State(_)) => Err(e),
        Err(e) if backup.exists() => {
            tracing::warn!("{} unreadable ({}), falling back to backup", path.display(), e);
            read(&backup).map(Some)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(content: &str) -> Result<String> {
        if content == "future" {
            return Err(ControlPlaneError::State("written by a newer version".into()));
        }
        Ok(serde_json::from_str(content)?)
    }

    #[test]
    fn test_write_keeps_previous_as_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, "\"one\"").unwrap();
        write_atomic(&path, "\"two\"").unwrap();

        assert_eq!(read_with_backup(&path, parse).unwrap().as_deref(), Some("two"));
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), "\"one\"");
        assert!(!sibling(&path, "tmp").exists());
    }

    #[test]
    fn test_missing_primary_restores_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(read_with_backup(&path, parse).unwrap(), None);

        fs::write(backup_path(&path), "\"saved\"").unwrap();
        assert_eq!(read_with_backup(&path, parse).unwrap().as_deref(), Some("saved"));
    }

    #[test]
    fn test_newer_version_does_not_fall_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "future").unwrap();
        fs::write(backup_path(&path), "\"old\"").unwrap();

        let err = read_with_backup(&path, parse).unwrap_err();
        assert!(matches!(err, ControlPlaneError::State(_)));
    }
}
