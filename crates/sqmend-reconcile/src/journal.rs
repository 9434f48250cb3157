//! Crash-resume journal for a reconciliation run.
//!
//! The first commit of a run can already change the on-disk mod list
//! (entries disabled, originals corrected). Once that has happened the list
//! no longer tells which entries were enabled before the patch, so that set
//! is written here first and reused by an interrupted run or a later
//! restore.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::modlist::write_atomic;
use crate::{ReconcileError, Result};

/// Last phase a run committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Corrections and enabled flags are committed.
    Classified,
    /// Purges are committed.
    Purged,
}

/// Persisted state of an unfinished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionJournal {
    /// Last committed phase.
    pub phase: RunPhase,
    /// Paths enabled when the run started, minus purged ones.
    pub enabled_before: Vec<String>,
    /// Internal entries were invalidated and must be rebuilt.
    pub internal_files_modified: bool,
    /// When the run started.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionJournal {
    /// Fresh journal for a run starting now.
    pub fn new(enabled_before: Vec<String>) -> Self {
        Self {
            phase: RunPhase::Classified,
            enabled_before,
            internal_files_modified: false,
            started_at: chrono::Utc::now(),
        }
    }
}

/// Location of the journal next to the mod list.
#[derive(Debug, Clone)]
pub struct JournalStore {
    path: PathBuf,
}

impl JournalStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the journal of an interrupted run, if any.
    pub async fn load(&self) -> Result<Option<SessionJournal>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let raw = tokio::fs::read(&self.path).await?;
        let journal = serde_json::from_slice(&raw).map_err(|e| {
            ReconcileError::ModList(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        info!("Resuming from journal {}", self.path.display());
        Ok(Some(journal))
    }

    /// Persist `journal`.
    pub async fn save(&self, journal: &SessionJournal) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(journal)
            .map_err(|e| ReconcileError::ModList(format!("failed to serialize journal: {e}")))?;
        write_atomic(&self.path, &bytes).await?;
        debug!("Journal at phase {:?}", journal.phase);
        Ok(())
    }

    /// Remove the journal once the run is fully resolved.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Cleared journal {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
