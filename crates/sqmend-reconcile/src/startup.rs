//! Two-phase startup.
//!
//! The probe runs first, away from the host's UI context, and either hands
//! out a [`StartupToken`] or a [`FatalStartup`]. A [`Reconciler`] cannot be
//! built without the token, so a fatal probe leaves the core unusable for
//! the rest of the process.
//!
//! [`Reconciler`]: crate::Reconciler

use std::future::Future;
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use sqmend_archive::DataCategory;
use tracing::{error, info, warn};

use crate::config::{DxMode, ReconcileConfig};
use crate::{ReconcileError, Result};

/// Installations whose exd data was last written before this year predate
/// the supported index layout.
const MIN_INSTALL_YEAR: i32 = 2020;

/// Index and data file consistency checks provided by the host.
pub trait IndexIntegrity: Send + Sync {
    /// Whether the data file count recorded in `category`'s indexes
    /// disagrees with the files on disk.
    fn check_dat_counts(&self, category: DataCategory)
    -> impl Future<Output = Result<bool>> + Send;

    /// Rewrite the recorded data file count of `category`.
    fn repair_dat_counts(&self, category: DataCategory)
    -> impl Future<Output = Result<()>> + Send;

    /// Restore index files from `backup_dir`. Returns whether anything was
    /// restored.
    fn restore_backups(&self, backup_dir: &Path) -> impl Future<Output = Result<bool>> + Send;
}

/// Decisions the probe defers to the operator.
pub trait StartupOperator: Send + Sync {
    /// The index check failed with `error`. Return `true` to restore the
    /// index backups, `false` to stop.
    fn confirm_restore(&self, error: &ReconcileError) -> bool;
}

/// Proof that the startup probe succeeded.
///
/// Only [`probe_installation`] creates it.
#[derive(Debug)]
pub struct StartupToken {
    _private: (),
}

impl StartupToken {
    #[cfg(test)]
    pub(crate) const fn for_tests() -> Self {
        Self { _private: () }
    }
}

/// Startup failure after which no core operation may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalStartup {
    /// Why the probe stopped.
    pub reason: String,
}

/// What the probe found on a usable installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Categories whose data file counts were repaired.
    pub repaired: Vec<DataCategory>,
    /// Index backups were restored after a failed check.
    pub restored_backups: bool,
    /// Detected renderer, if detection succeeded.
    pub dx_mode: Option<DxMode>,
}

/// Result of the startup probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The installation is usable.
    Ready(ProbeReport, StartupToken),
    /// The installation must not be touched.
    Fatal(FatalStartup),
}

impl ProbeOutcome {
    /// Whether the probe succeeded.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(..))
    }

    /// Split into the token or the fatal reason.
    pub fn into_result(self) -> std::result::Result<(ProbeReport, StartupToken), FatalStartup> {
        match self {
            Self::Ready(report, token) => Ok((report, token)),
            Self::Fatal(fatal) => Err(fatal),
        }
    }

    fn fatal(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!("Fatal startup failure: {}", reason);
        Self::Fatal(FatalStartup { reason })
    }
}

/// Check the installation before the core is used.
///
/// Repairs data file counts where the indexes disagree with the disk. If
/// the check itself fails, `operator` decides whether the index backups in
/// `config.backup_dir` are restored; a refusal or a failed restore is
/// fatal, as is an out-of-date installation. Renderer detection failures
/// are logged and ignored.
pub async fn probe_installation<I, O>(
    config: &ReconcileConfig,
    integrity: &I,
    operator: &O,
) -> ProbeOutcome
where
    I: IndexIntegrity,
    O: StartupOperator,
{
    let mut report = ProbeReport {
        repaired: Vec::new(),
        restored_backups: false,
        dx_mode: None,
    };

    match check_categories(&config.categories, integrity).await {
        Ok(repaired) => report.repaired = repaired,
        Err(e) => {
            error!("Index check failed: {}", e);
            if !operator.confirm_restore(&e) {
                return ProbeOutcome::fatal(format!("index check failed and restore was declined: {e}"));
            }
            match integrity.restore_backups(&config.backup_dir).await {
                Ok(true) => {
                    info!("Restored index backups from {}", config.backup_dir.display());
                    report.restored_backups = true;
                }
                Ok(false) => {
                    return ProbeOutcome::fatal(format!(
                        "no index backups could be restored from {}",
                        config.backup_dir.display()
                    ));
                }
                Err(restore_err) => {
                    return ProbeOutcome::fatal(format!(
                        "unable to restore index backups: {restore_err}"
                    ));
                }
            }
        }
    }

    let exd_dat = DataCategory::Exd.segment_path(&config.game_root, 0);
    match last_write_time(&exd_dat).await {
        Ok(modified) if modified.year() < MIN_INSTALL_YEAR => {
            return ProbeOutcome::fatal(format!(
                "installation is out of date: {} last written {}",
                exd_dat.display(),
                modified.format("%Y-%m-%d")
            ));
        }
        Ok(_) => {}
        Err(e) => {
            return ProbeOutcome::fatal(format!(
                "cannot read {}: {e}",
                exd_dat.display()
            ));
        }
    }

    report.dx_mode = match &config.boot_config_path {
        Some(path) => match DxMode::detect(path).await {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("Renderer detection failed: {}", e);
                None
            }
        },
        None => Some(config.dx_mode),
    };

    info!(
        "Startup probe passed ({} categories repaired)",
        report.repaired.len()
    );
    ProbeOutcome::Ready(report, StartupToken { _private: () })
}

async fn check_categories<I: IndexIntegrity>(
    categories: &[DataCategory],
    integrity: &I,
) -> Result<Vec<DataCategory>> {
    let mut repaired = Vec::new();
    for &category in categories {
        if integrity.check_dat_counts(category).await? {
            warn!("Data file count mismatch in {}, repairing", category);
            integrity.repair_dat_counts(category).await?;
            repaired.push(category);
        }
    }
    Ok(repaired)
}

async fn last_write_time(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}
