//! Entry reconciliation.
//!
//! A run classifies every entry first, concurrently and without touching
//! the archive, and only then commits in two sequential phases:
//!
//! 1. index corrections, original offset corrections and enabled flags;
//! 2. purges, each disabling an active entry before removing it.
//!
//! The journal is written before the first index write and after each
//! phase, and the mod list is saved after each phase.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sqmend_archive::{BlockTypeProbe, DataCategory, OffsetIndex, SegmentCatalog};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::drift::{DriftClassification, DriftDetector, DriftVerdict};
use crate::journal::{JournalStore, RunPhase, SessionJournal};
use crate::modlist::{ModEntry, ModListStore};
use crate::overlay::OverlayMutator;
use crate::rollover::RolloverDetector;
use crate::startup::StartupToken;
use crate::{ReconcileError, Result};

/// Single-writer lock over the archive's index tables.
///
/// Reconciliation and restore hold the write guard for their whole run.
/// Unrelated readers take a read guard and so observe the tables either
/// before or after a run.
pub type ArchiveLock = Arc<RwLock<()>>;

/// Lifecycle state of an entry as seen by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Enabled and consistent.
    Active,
    /// Disabled and consistent.
    Disabled,
    /// Disabled with corrected bookkeeping after the archive moved.
    DisabledDrifted,
    /// Removed from the list.
    Purged,
}

impl EntryState {
    fn of(entry: &ModEntry) -> Self {
        if entry.enabled {
            Self::Active
        } else {
            Self::Disabled
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::DisabledDrifted => "disabled (drifted)",
            Self::Purged => "purged",
        };
        f.write_str(name)
    }
}

/// What a run did to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    /// Virtual path.
    pub path: String,
    /// State before the run.
    pub from: EntryState,
    /// State after the run.
    pub to: EntryState,
    /// Drift classification.
    pub classification: DriftClassification,
}

/// An entry the run could not process. The entry is left as it was.
#[derive(Debug)]
pub struct EntryFailure {
    /// Virtual path.
    pub path: String,
    /// Data category.
    pub category: DataCategory,
    /// What went wrong.
    pub error: ReconcileError,
}

/// Summary of a reconciliation run.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Entries examined.
    pub processed: usize,
    /// Entries whose bookkeeping was corrected, left disabled for
    /// follow-up.
    pub repaired: Vec<String>,
    /// Entries removed from the list.
    pub purged: Vec<String>,
    /// Internal entries were invalidated and must be rebuilt.
    pub internal_files_modified: bool,
    /// Per-entry transitions, in list order.
    pub outcomes: Vec<EntryOutcome>,
    /// Entries that could not be processed.
    pub failures: Vec<EntryFailure>,
}

impl ReconcileReport {
    /// Whether every entry was processed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reconciles a mod list against the archive after a patch.
pub struct Reconciler<A, O> {
    pub(crate) config: ReconcileConfig,
    pub(crate) archive: Arc<A>,
    pub(crate) overlay: O,
    pub(crate) store: ModListStore,
    pub(crate) journal: JournalStore,
    pub(crate) lock: ArchiveLock,
}

impl<A, O> fmt::Debug for Reconciler<A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("mod_list", &self.store.path())
            .field("journal", &self.journal.path())
            .finish_non_exhaustive()
    }
}

impl<A, O> Reconciler<A, O> {
    /// Create a reconciler.
    ///
    /// Requires the token of a successful startup probe.
    pub fn new(
        _token: &StartupToken,
        config: ReconcileConfig,
        archive: Arc<A>,
        overlay: O,
    ) -> Self {
        Self {
            store: ModListStore::new(config.mod_list_path.clone()),
            journal: JournalStore::new(config.journal_path()),
            config,
            archive,
            overlay,
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// Share `lock` with other users of the archive.
    #[must_use]
    pub fn with_lock(mut self, lock: ArchiveLock) -> Self {
        self.lock = lock;
        self
    }

    /// The archive lock held during runs.
    pub fn lock(&self) -> ArchiveLock {
        Arc::clone(&self.lock)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Mod list store in use.
    pub fn store(&self) -> &ModListStore {
        &self.store
    }
}

impl<A, O> Reconciler<A, O>
where
    A: OffsetIndex + BlockTypeProbe + SegmentCatalog,
    O: OverlayMutator,
{
    /// Reconcile every entry of the mod list against the archive.
    ///
    /// Entries that fail are recorded in the report and left untouched;
    /// they never stop the run. Errors are returned only when the list or
    /// journal cannot be read or written.
    pub async fn run_reconciliation(&self) -> Result<ReconcileReport> {
        let _guard = self.lock.write().await;

        let mut list = self.store.load().await?;
        let mut journal = match self.journal.load().await? {
            Some(journal) => journal,
            None => SessionJournal::new(list.enabled_paths()),
        };
        info!(
            "Reconciling {} entries ({} enabled before patch)",
            list.len(),
            journal.enabled_before.len()
        );

        let drift = DriftDetector::new(Arc::clone(&self.archive));
        let rollover = RolloverDetector::new(Arc::clone(&self.archive));
        let verdicts: Vec<Result<DriftVerdict>> = stream::iter(list.mods.iter())
            .map(|entry| classify_entry(&drift, &rollover, entry))
            .buffered(self.config.classify_concurrency.max(1))
            .collect()
            .await;
        debug!("Classified {} entries", verdicts.len());

        // Phase 1: corrections
        journal.phase = RunPhase::Classified;
        self.journal.save(&journal).await?;

        let mut report = ReconcileReport {
            processed: list.len(),
            ..Default::default()
        };
        let mut to_purge = vec![false; list.len()];
        let mut states = Vec::with_capacity(list.len());

        for (idx, (entry, verdict)) in list.mods.iter_mut().zip(verdicts).enumerate() {
            let from = EntryState::of(entry);
            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(e) => {
                    error!(path = %entry.full_path, category = %entry.category, "Classification failed: {}", e);
                    report.failures.push(EntryFailure {
                        path: entry.full_path.clone(),
                        category: entry.category,
                        error: e,
                    });
                    states.push(None);
                    continue;
                }
            };

            if let Err(e) = self.apply_verdict(entry, &verdict).await {
                error!(path = %entry.full_path, category = %entry.category, "Correction failed: {}", e);
                report.failures.push(EntryFailure {
                    path: entry.full_path.clone(),
                    category: entry.category,
                    error: e,
                });
                states.push(None);
                continue;
            }

            // Only internal entries this run turned off count. One that was
            // already disabled before the patch invalidates nothing.
            let was_enabled = journal.enabled_before.contains(&entry.full_path);
            if entry.is_internal()
                && !entry.full_path.is_empty()
                && (verdict.classification == DriftClassification::IndexesDisagree
                    || (was_enabled && !entry.enabled))
            {
                journal.internal_files_modified = true;
            }

            if verdict.classification.is_drift() {
                report.repaired.push(entry.full_path.clone());
            }
            to_purge[idx] = verdict.requires_purge();
            states.push(Some((from, verdict.classification)));
        }

        self.journal.save(&journal).await?;
        self.store.save(&list).await?;
        info!(
            "Committed corrections ({} repaired, {} failed)",
            report.repaired.len(),
            report.failures.len()
        );

        // Phase 2: purges
        let mut keep = vec![true; list.len()];
        for (idx, entry) in list.mods.iter_mut().enumerate() {
            if !to_purge[idx] {
                continue;
            }
            if entry.enabled {
                if let Err(e) = self.overlay.disable_entry(entry).await {
                    error!(path = %entry.full_path, "Failed to disable entry before purge: {}", e);
                    report.failures.push(EntryFailure {
                        path: entry.full_path.clone(),
                        category: entry.category,
                        error: e,
                    });
                    continue;
                }
                entry.enabled = false;
            }

            warn!(path = %entry.full_path, category = %entry.category, "Purging entry");
            keep[idx] = false;
            journal.enabled_before.retain(|p| p != &entry.full_path);
            if entry.is_internal() {
                journal.internal_files_modified = true;
            }
            report.purged.push(entry.full_path.clone());
        }

        for (idx, entry) in list.mods.iter().enumerate() {
            if let Some((from, classification)) = states[idx] {
                let to = if !keep[idx] {
                    EntryState::Purged
                } else if classification.is_drift() {
                    EntryState::DisabledDrifted
                } else {
                    EntryState::of(entry)
                };
                report.outcomes.push(EntryOutcome {
                    path: entry.full_path.clone(),
                    from,
                    to,
                    classification,
                });
            }
        }

        let mut keep_iter = keep.iter();
        list.mods.retain(|_| keep_iter.next().copied().unwrap_or(true));

        journal.phase = RunPhase::Purged;
        self.journal.save(&journal).await?;
        self.store.save(&list).await?;

        report.internal_files_modified = journal.internal_files_modified;
        info!(
            "Reconciliation complete: {} processed, {} repaired, {} purged, {} failed",
            report.processed,
            report.repaired.len(),
            report.purged.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn apply_verdict(&self, entry: &mut ModEntry, verdict: &DriftVerdict) -> Result<()> {
        for fix in &verdict.index_fixes {
            debug!(path = %entry.full_path, table = ?fix.table, offset = %fix.offset, "Correcting index");
            self.archive
                .set_offset(fix.offset, &entry.full_path, fix.table)
                .await?;
        }
        if let Some(original) = verdict.corrected_original {
            info!(
                path = %entry.full_path,
                from = %entry.data.original_offset,
                to = %original,
                "Original offset moved"
            );
            entry.data.original_offset = original;
        }
        entry.enabled = verdict.enabled_after;
        Ok(())
    }
}

async fn classify_entry<A>(
    drift: &DriftDetector<A>,
    rollover: &RolloverDetector<A>,
    entry: &ModEntry,
) -> Result<DriftVerdict>
where
    A: OffsetIndex + BlockTypeProbe + SegmentCatalog,
{
    let mut verdict = drift.classify(entry).await?;
    if rollover.has_rolled_over(entry).await? && !verdict.requires_purge() {
        verdict.classification = DriftClassification::SegmentRolledOver;
    }
    Ok(verdict)
}
