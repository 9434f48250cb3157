//! Patch detection.
//!
//! The game patcher rewrites the index files of every category it touches.
//! Recording their modification times after each reconciliation is enough
//! to tell on the next start whether a patch happened in between.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqmend_archive::DataCategory;
use tracing::{debug, info};

use crate::config::ReconcileConfig;
use crate::modlist::write_atomic;
use crate::{ReconcileError, Result};

/// Stamp file name inside the game root.
pub const STAMP_FILE: &str = "sqmend_index_stamps.json";

/// Recorded modification times, keyed by index file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct IndexStamps {
    files: BTreeMap<String, DateTime<Utc>>,
}

/// Detects index changes made outside the overlay.
#[derive(Debug, Clone)]
pub struct PatchWatcher {
    game_root: PathBuf,
    categories: Vec<DataCategory>,
    stamp_path: PathBuf,
}

impl PatchWatcher {
    /// Watch the configured categories, keeping stamps in the game root.
    pub fn new(config: &ReconcileConfig) -> Self {
        Self {
            game_root: config.game_root.clone(),
            categories: config.categories.clone(),
            stamp_path: config.game_root.join(STAMP_FILE),
        }
    }

    /// Keep stamps at `path` instead.
    #[must_use]
    pub fn with_stamp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stamp_path = path.into();
        self
    }

    /// Whether any watched index changed since the last
    /// [`acknowledge`](Self::acknowledge).
    ///
    /// Without a stamp file nothing is known, so any existing index counts
    /// as changed.
    pub async fn detect(&self) -> Result<bool> {
        let recorded = self.load().await?.unwrap_or_default();
        let current = self.current().await?;

        let changed: Vec<&String> = current
            .files
            .iter()
            .filter(|(name, time)| recorded.files.get(*name) != Some(*time))
            .map(|(name, _)| name)
            .collect();

        if changed.is_empty() {
            debug!("No index changes since last acknowledgement");
            return Ok(false);
        }
        info!("Index files changed since last run: {:?}", changed);
        Ok(true)
    }

    /// Record the current index modification times.
    pub async fn acknowledge(&self) -> Result<()> {
        let current = self.current().await?;
        let bytes = serde_json::to_vec_pretty(&current)
            .map_err(|e| ReconcileError::Config(format!("failed to serialize stamps: {e}")))?;
        write_atomic(&self.stamp_path, &bytes).await?;
        debug!("Recorded {} index stamps", current.files.len());
        Ok(())
    }

    async fn load(&self) -> Result<Option<IndexStamps>> {
        if !tokio::fs::try_exists(&self.stamp_path).await? {
            return Ok(None);
        }
        let raw = tokio::fs::read(&self.stamp_path).await?;
        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            ReconcileError::Config(format!(
                "failed to parse {}: {e}",
                self.stamp_path.display()
            ))
        })
    }

    async fn current(&self) -> Result<IndexStamps> {
        let mut stamps = IndexStamps::default();
        for category in &self.categories {
            for name in [category.index_file_name(), category.index2_file_name()] {
                if let Some(modified) = modified_time(&self.game_root.join(&name)).await? {
                    stamps.files.insert(name, modified);
                }
            }
        }
        Ok(stamps)
    }
}

async fn modified_time(path: &Path) -> Result<Option<DateTime<Utc>>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(DateTime::<Utc>::from(metadata.modified()?))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
