//! Index file snapshots on disk.
//!
//! A snapshot is a flat directory holding copies of the `.win32.index` and
//! `.win32.index2` files of a set of categories. Segment files are never
//! copied: once the overlay is fully disabled the index tables are the only
//! state that differs from a clean install.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::traits::IndexBackup;
use crate::{ArchiveError, DataCategory, Result};

/// Copies index tables between the game directory and a backup directory.
#[derive(Debug, Clone)]
pub struct FsIndexBackup {
    game_root: PathBuf,
    categories: Vec<DataCategory>,
}

impl FsIndexBackup {
    /// Create a backup transport for `categories` under `game_root`.
    pub fn new(game_root: impl Into<PathBuf>, categories: Vec<DataCategory>) -> Self {
        Self {
            game_root: game_root.into(),
            categories,
        }
    }

    /// Directory holding the live index files.
    pub fn game_root(&self) -> &Path {
        &self.game_root
    }

    /// Categories covered by snapshots.
    pub fn categories(&self) -> &[DataCategory] {
        &self.categories
    }

    fn index_file_names(&self) -> impl Iterator<Item = String> + '_ {
        self.categories
            .iter()
            .flat_map(|c| [c.index_file_name(), c.index2_file_name()])
    }

    /// Copy the live index files into `destination`.
    ///
    /// Returns the number of files copied. A missing primary index is an
    /// error; a missing secondary index is skipped with a warning.
    pub async fn snapshot(&self, destination: &Path) -> Result<usize> {
        fs::create_dir_all(destination).await.map_err(|e| {
            ArchiveError::Backup(format!(
                "cannot create backup directory {}: {e}",
                destination.display()
            ))
        })?;

        let mut copied = 0;
        for name in self.index_file_names() {
            let source = self.game_root.join(&name);
            if !fs::try_exists(&source).await? {
                if name.ends_with(crate::INDEX2_EXTENSION) {
                    warn!("Skipping missing secondary index {}", source.display());
                    continue;
                }
                return Err(ArchiveError::NotFound(format!(
                    "index file {}",
                    source.display()
                )));
            }

            fs::copy(&source, destination.join(&name))
                .await
                .map_err(|e| ArchiveError::Backup(format!("failed to copy {name}: {e}")))?;
            debug!("Backed up {}", name);
            copied += 1;
        }

        info!(
            "Backed up {} index files to {}",
            copied,
            destination.display()
        );
        Ok(copied)
    }

    /// Restore index files from `source` into the game directory.
    ///
    /// Each file is copied next to its target under a `.tmp` name and then
    /// renamed over it, so a live index is never left half-written. Files
    /// missing from `source` are left alone. Returns the number restored.
    pub async fn restore_from(&self, source: &Path) -> Result<usize> {
        if !fs::try_exists(source).await? {
            return Err(ArchiveError::Backup(format!(
                "backup directory {} does not exist",
                source.display()
            )));
        }

        let mut restored = 0;
        for name in self.index_file_names() {
            let backup = source.join(&name);
            if !fs::try_exists(&backup).await? {
                continue;
            }

            let target = self.game_root.join(&name);
            let temp = target.with_extension("tmp");
            fs::copy(&backup, &temp)
                .await
                .map_err(|e| ArchiveError::Backup(format!("failed to stage {name}: {e}")))?;
            if let Err(e) = fs::rename(&temp, &target).await {
                if let Err(cleanup) = fs::remove_file(&temp).await {
                    warn!("Failed to remove {}: {}", temp.display(), cleanup);
                }
                return Err(ArchiveError::Backup(format!(
                    "failed to replace {}: {e}",
                    target.display()
                )));
            }
            restored += 1;
        }

        info!(
            "Restored {} index files from {}",
            restored,
            source.display()
        );
        Ok(restored)
    }
}

impl IndexBackup for FsIndexBackup {
    async fn request_backup(&self, destination: &Path) -> Result<()> {
        self.snapshot(destination).await.map(|_| ())
    }
}
