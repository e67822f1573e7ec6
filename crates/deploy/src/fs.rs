//! File system utils.

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    /// Create the parent directory of `path` if it doesn't exist.
    pub fn create_parent_directory(path: &Path) -> anyhow::Result<()> {
        let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };

        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        tracing::trace!("Ensured directory exists: {}", parent.display());

        Ok(())
    }

    /// Replace the contents of `path` so that a crash leaves either the old or
    /// the new contents, never a truncated file.
    ///
    /// The data is written to a sibling temporary file, flushed to disk, then
    /// renamed over the destination.
    pub fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        Self::create_parent_directory(path)?;

        let tmp_path = Self::tmp_path(path);
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(contents)
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        // Persist the rename itself.
        #[cfg(unix)]
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .with_context(|| format!("Failed to flush directory {}", parent.display()))?;
        }

        Ok(())
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let temp_dir = TempDir::new("nerodex-fs").expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested/dir/record.json");

        FsHandler::write_atomic(&path, b"first").unwrap();
        FsHandler::write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!FsHandler::tmp_path(&path).exists());
    }
}
