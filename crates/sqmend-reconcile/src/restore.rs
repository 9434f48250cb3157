//! Post-reconciliation restore modes.
//!
//! After a run the operator picks one of two modes: disable everything and
//! back up the now clean indexes, or re-enable what was enabled before the
//! patch. Both are batches over independent entries; cancellation stops
//! between entries and keeps what was already done.

use std::path::Path;

use sqmend_archive::{BlockTypeProbe, DataCategory, IndexBackup, OffsetIndex, SegmentCatalog};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::journal::SessionJournal;
use crate::modlist::{ModEntry, ModList};
use crate::overlay::OverlayMutator;
use crate::reconciler::Reconciler;
use crate::{ReconcileError, Result};

/// Name of the probe file written to check a backup destination.
const WRITE_PROBE: &str = ".sqmend_write_test";

/// An entry that failed during a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Virtual path.
    pub path: String,
    /// Data category.
    pub category: DataCategory,
    /// Error message.
    pub reason: String,
}

impl BatchFailure {
    fn new(entry: &ModEntry, error: &ReconcileError) -> Self {
        Self {
            path: entry.full_path.clone(),
            category: entry.category,
            reason: error.to_string(),
        }
    }

    /// Comma-separated affected paths.
    pub fn summary(failures: &[Self]) -> String {
        failures
            .iter()
            .map(|f| format!("{} ({})", f.path, f.category))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// How far a batch got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Entries toggled.
    pub processed: usize,
    /// Position in the batch where cancellation was observed.
    pub cancelled_at: Option<usize>,
}

impl BatchOutcome {
    /// Whether the batch ran to the end.
    pub const fn is_complete(&self) -> bool {
        self.cancelled_at.is_none()
    }
}

impl<A, O> Reconciler<A, O>
where
    A: OffsetIndex + BlockTypeProbe + SegmentCatalog,
    O: OverlayMutator,
{
    /// Disable every entry, then back up the indexes into `destination`
    /// through the archive's own backup transport.
    pub async fn apply_clean_and_backup(
        &self,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome>
    where
        A: IndexBackup,
    {
        self.apply_clean_and_backup_with(destination, self.archive.as_ref(), cancel)
            .await
    }

    /// Disable every entry, then back up the indexes into `destination`
    /// through `backup`.
    ///
    /// The destination is validated before anything is disabled. If any
    /// entry fails to disable, [`ReconcileError::BatchPartialFailure`] is
    /// returned and no backup is taken. A cancelled batch takes no backup
    /// either.
    pub async fn apply_clean_and_backup_with<B: IndexBackup>(
        &self,
        destination: &Path,
        backup: &B,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        validate_backup_dir(destination).await?;

        let _guard = self.lock.write().await;
        let mut list = self.store.load().await?;
        info!("Disabling all mods before index backup");

        let (outcome, failures) = self.disable_all(&mut list, cancel).await;
        self.store.save(&list).await?;

        if !failures.is_empty() {
            error!("{} entries failed to disable, skipping backup", failures.len());
            return Err(ReconcileError::BatchPartialFailure { failures });
        }
        if !outcome.is_complete() {
            warn!("Disable batch cancelled after {} entries", outcome.processed);
            return Ok(outcome);
        }

        backup
            .request_backup(destination)
            .await
            .map_err(|e| ReconcileError::BackupDirectory {
                path: destination.to_path_buf(),
                reason: e.to_string(),
            })?;
        self.journal.clear().await?;
        info!(
            "Disabled {} entries and backed up indexes to {}",
            outcome.processed,
            destination.display()
        );
        Ok(outcome)
    }

    /// Re-enable every entry that was enabled before the patch.
    ///
    /// When the run invalidated internal entries, all of them are deleted
    /// and every metadata entry loses its index descriptor first, so they
    /// are rebuilt from the patched game files rather than trusted.
    pub async fn apply_restore_previous(&self, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let _guard = self.lock.write().await;
        let mut list = self.store.load().await?;
        let Some(mut journal) = self.journal.load().await? else {
            warn!("No reconciliation journal, nothing to restore");
            return Ok(BatchOutcome::default());
        };

        if journal.internal_files_modified {
            let failures = self.reset_internal_entries(&mut list, &mut journal).await;
            self.store.save(&list).await?;
            self.journal.save(&journal).await?;
            if !failures.is_empty() {
                error!("{} internal entries could not be reset", failures.len());
                return Err(ReconcileError::BatchPartialFailure { failures });
            }
        }

        info!(
            "Re-enabling {} entries disabled by the patch",
            journal.enabled_before.len()
        );
        let mut outcome = BatchOutcome::default();
        let mut failures = Vec::new();
        for (position, path) in journal.enabled_before.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled_at = Some(position);
                break;
            }
            let Some(entry) = list.get_mut(path) else {
                debug!("{} no longer exists, skipping", path);
                continue;
            };
            if entry.enabled {
                continue;
            }
            match self.overlay.enable_entry(entry).await {
                Ok(()) => {
                    entry.enabled = true;
                    outcome.processed += 1;
                }
                Err(e) => {
                    error!(path = %entry.full_path, "Failed to re-enable: {}", e);
                    failures.push(BatchFailure::new(entry, &e));
                }
            }
        }
        self.store.save(&list).await?;

        if !failures.is_empty() {
            return Err(ReconcileError::BatchPartialFailure { failures });
        }
        if outcome.is_complete() {
            self.journal.clear().await?;
            info!("Restored {} entries", outcome.processed);
        } else {
            warn!("Re-enable batch cancelled after {} entries", outcome.processed);
        }
        Ok(outcome)
    }

    async fn disable_all(
        &self,
        list: &mut ModList,
        cancel: &CancellationToken,
    ) -> (BatchOutcome, Vec<BatchFailure>) {
        let mut outcome = BatchOutcome::default();
        let mut failures = Vec::new();

        for (position, entry) in list.mods.iter_mut().enumerate() {
            if !entry.enabled || entry.full_path.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                outcome.cancelled_at = Some(position);
                break;
            }
            match self.overlay.disable_entry(entry).await {
                Ok(()) => {
                    entry.enabled = false;
                    outcome.processed += 1;
                }
                Err(e) => {
                    error!(path = %entry.full_path, "Failed to disable: {}", e);
                    failures.push(BatchFailure::new(entry, &e));
                }
            }
        }
        (outcome, failures)
    }

    async fn reset_internal_entries(
        &self,
        list: &mut ModList,
        journal: &mut SessionJournal,
    ) -> Vec<BatchFailure> {
        let mut failures = Vec::new();

        let mut deleted = Vec::new();
        for entry in list.mods.iter().filter(|m| m.is_internal()) {
            match self.overlay.delete_entry(entry).await {
                Ok(()) => deleted.push(entry.full_path.clone()),
                Err(e) => {
                    error!(path = %entry.full_path, "Failed to delete internal entry: {}", e);
                    failures.push(BatchFailure::new(entry, &e));
                }
            }
        }
        list.mods
            .retain(|m| !(m.is_internal() && deleted.contains(&m.full_path)));
        journal.enabled_before.retain(|p| !deleted.contains(p));
        info!("Deleted {} internal entries", deleted.len());

        for entry in list.mods.iter_mut().filter(|m| m.is_metadata()) {
            match self
                .archive
                .delete_descriptor(&entry.full_path, entry.category)
                .await
            {
                Ok(()) => {
                    debug!(path = %entry.full_path, "Cleared metadata descriptor");
                    entry.enabled = false;
                }
                Err(e) => {
                    let e = ReconcileError::Archive(e);
                    error!(path = %entry.full_path, "Failed to clear metadata descriptor: {}", e);
                    failures.push(BatchFailure::new(entry, &e));
                }
            }
        }

        if failures.is_empty() {
            journal.internal_files_modified = false;
        }
        failures
    }
}

/// Make sure `destination` exists and is writable.
async fn validate_backup_dir(destination: &Path) -> Result<()> {
    let reject = |reason: String| ReconcileError::BackupDirectory {
        path: destination.to_path_buf(),
        reason,
    };

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| reject(format!("cannot create directory: {e}")))?;
    let metadata = tokio::fs::metadata(destination)
        .await
        .map_err(|e| reject(format!("cannot stat directory: {e}")))?;
    if !metadata.is_dir() {
        return Err(reject("not a directory".to_string()));
    }

    let probe = destination.join(WRITE_PROBE);
    tokio::fs::write(&probe, b"test")
        .await
        .map_err(|e| reject(format!("not writable: {e}")))?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!("Failed to remove write probe {}: {}", probe.display(), e);
    }
    Ok(())
}
