use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Backups of every file under test, keyed by path, for one run.
///
/// Dropping the manager restores whatever is still backed up, so an early
/// return or panic never leaves a mutated file behind.
#[derive(Debug, Default)]
pub struct FileManager {
    backups: HashMap<PathBuf, String>,
}

impl FileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current content of `path`.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.backups.insert(path.to_path_buf(), content);
        Ok(())
    }

    pub fn is_backed_up(&self, path: &Path) -> bool {
        self.backups.contains_key(path)
    }

    /// Overwrite `path` with mutated content. Requires a prior [`backup`](Self::backup).
    pub fn apply_mutation(&self, path: &Path, content: &str) -> Result<()> {
        if !self.is_backed_up(path) {
            return Err(Error::NoBackup(path.to_path_buf()));
        }
        std::fs::write(path, content).map_err(|e| Error::io(path, e))
    }

    /// Put the backed-up content back.
    pub fn restore(&self, path: &Path) -> Result<()> {
        let original = self
            .backups
            .get(path)
            .ok_or_else(|| Error::NoBackup(path.to_path_buf()))?;
        std::fs::write(path, original).map_err(|e| Error::io(path, e))
    }

    /// Restore every backed-up file and forget the backups. A failing write
    /// is logged and skipped so the remaining files still get restored.
    pub fn restore_all(&mut self) {
        for (path, content) in self.backups.drain() {
            if let Err(e) = std::fs::write(&path, content) {
                tracing::warn!(path = %path.display(), error = %e, "failed to restore file");
            }
        }
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.restore_all();
    }
}
