//! Post-patch reconciliation of a mod overlay.
//!
//! When the vendor patches the game, every offset the mod list remembers
//! may have moved, been deleted, or been swallowed by a segment the vendor
//! reclaimed. This crate detects that drift and restores a consistent
//! state without ever leaving a path pointing at data the overlay no
//! longer owns.
//!
//! The pipeline, leaves first:
//!
//! - **Drift Detector** ([`DriftDetector`]): compares an entry's recorded
//!   offsets against both index tables and sniffs the block types
//! - **Rollover Detector** ([`RolloverDetector`]): checks whether the
//!   segment holding the overlay data now belongs to the unmodified game
//! - **Entry Reconciler** ([`Reconciler::run_reconciliation`]): classifies
//!   every entry, then commits corrections and purges in one sequential pass
//! - **State Restorer** ([`Reconciler::apply_clean_and_backup`],
//!   [`Reconciler::apply_restore_previous`]): either disables everything and
//!   snapshots the clean indexes, or re-enables what was enabled before
//!
//! Hosts must run the startup probe ([`startup::probe_installation`])
//! first: a [`Reconciler`] can only be built from the [`StartupToken`] a
//! successful probe hands out.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqmend_archive::MemoryArchive;
//! use sqmend_reconcile::{IndexOverlay, ReconcileConfig, Reconciler};
//! use std::sync::Arc;
//!
//! # async fn example(token: sqmend_reconcile::StartupToken) -> sqmend_reconcile::Result<()> {
//! let config = ReconcileConfig::new("/games/ffxiv/game/sqpack/ffxiv");
//! let archive = Arc::new(MemoryArchive::new());
//! let overlay = IndexOverlay::new(archive.clone());
//! let reconciler = Reconciler::new(&token, config, archive, overlay);
//!
//! let report = reconciler.run_reconciliation().await?;
//! println!("purged {} entries", report.purged.len());
//! reconciler.apply_restore_previous(&Default::default()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;

use sqmend_archive::{ArchiveError, BlockOffset, DataCategory};
use thiserror::Error;

// Configuration
pub mod config;

// Mod list model and persistence
pub mod modlist;

// Crash-resume journal
pub mod journal;

// Drift classification
pub mod drift;

// Segment rollover detection
pub mod rollover;

// Overlay mutation primitives
pub mod overlay;

// Entry reconciliation
pub mod reconciler;

// Post-reconciliation restore modes
pub mod restore;

// Batch cancellation
pub mod cancel;

// Two-phase startup probe
pub mod startup;

// Patch detection
pub mod patch;

pub use cancel::CancellationToken;
pub use config::{DxMode, ReconcileConfig};
pub use drift::{DriftClassification, DriftDetector, DriftVerdict};
pub use modlist::{ModData, ModEntry, ModList, ModListStore};
pub use overlay::{IndexOverlay, OverlayMutator};
pub use journal::{RunPhase, SessionJournal};
pub use patch::PatchWatcher;
pub use reconciler::{
    ArchiveLock, EntryFailure, EntryOutcome, EntryState, ReconcileReport, Reconciler,
};
pub use restore::{BatchFailure, BatchOutcome};
pub use rollover::RolloverDetector;
pub use startup::{
    FatalStartup, IndexIntegrity, ProbeOutcome, ProbeReport, StartupOperator, StartupToken,
    probe_installation,
};

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors raised by the reconciliation core.
///
/// Every variant that concerns a single entry carries its virtual path and
/// data category so the operator can inspect it by hand.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Offset or type lookup failed. Re-running classification may succeed.
    #[error("Archive read failed for {path} ({category}): {source}")]
    ArchiveRead {
        /// Virtual path being classified.
        path: String,
        /// Data category of the entry.
        category: DataCategory,
        /// Underlying archive error.
        #[source]
        source: ArchiveError,
    },

    /// A non-custom entry has no valid original offset left.
    #[error("Unable to determine a working offset for {path} ({category}): original {original_offset}")]
    IrrecoverableOffset {
        /// Virtual path of the entry.
        path: String,
        /// Data category of the entry.
        category: DataCategory,
        /// Original offset that failed type validation.
        original_offset: BlockOffset,
    },

    /// Backup destination cannot be used.
    #[error("Index backup directory {} is invalid or inaccessible: {reason}", .path.display())]
    BackupDirectory {
        /// Requested destination.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Some entries of an enable/disable batch failed.
    #[error("{} entries failed during batch: {}", .failures.len(), BatchFailure::summary(.failures))]
    BatchPartialFailure {
        /// Entries that failed, with their reasons.
        failures: Vec<BatchFailure>,
    },

    /// Archive error not tied to a single entry.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Mod list could not be read or written.
    #[error("Mod list error: {0}")]
    ModList(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Whether re-running classification can clear the error.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ArchiveRead { .. })
    }

    /// Virtual path the error concerns, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::ArchiveRead { path, .. } | Self::IrrecoverableOffset { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Source name of entries synthesized by the mod manager itself.
///
/// Internal entries merge several logical edits (metadata, racial scaling,
/// ...) into one rebuilt block.
pub const INTERNAL_SOURCE: &str = "_INTERNAL_";

/// Extension of metadata entries, which are re-derived rather than repaired.
pub const METADATA_EXTENSION: &str = "meta";

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
