//! Mod list model and atomic persistence.
//!
//! The mod list is the overlay's bookkeeping: one [`ModEntry`] per virtual
//! path it redirects. It is stored as pretty JSON next to the index files
//! and every save replaces the file atomically.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqmend_archive::{BlockOffset, DataCategory};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{INTERNAL_SOURCE, METADATA_EXTENSION, ReconcileError, Result};

/// Current mod list format version.
pub const MOD_LIST_VERSION: &str = "1.0";

/// Number of attempts for an atomic save.
const SAVE_ATTEMPTS: usize = 3;

/// Offsets and size of one overlay replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModData {
    /// Offset the unmodified archive holds for this path.
    pub original_offset: BlockOffset,
    /// Offset of the replacement block written by the overlay.
    pub mod_offset: BlockOffset,
    /// Size of the replacement block in bytes.
    #[serde(default)]
    pub mod_size: u32,
    /// The path has no counterpart in the unmodified archive.
    #[serde(default)]
    pub custom: bool,
}

/// One overlay modification of a single virtual path.
///
/// When enabled, the archive must resolve `full_path` to
/// `data.mod_offset`; when disabled, to `data.original_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    /// Virtual path, unique within the list. May be empty for
    /// placeholder entries.
    pub full_path: String,
    /// Data category owning the segments of this entry.
    pub category: DataCategory,
    /// Mod pack or tool that produced the entry.
    #[serde(default)]
    pub source: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Whether the archive currently points at the overlay block.
    pub enabled: bool,
    /// Recorded offsets.
    pub data: ModData,
}

impl ModEntry {
    /// Create a user-authored entry.
    pub fn new(
        full_path: impl Into<String>,
        category: DataCategory,
        original_offset: impl Into<BlockOffset>,
        mod_offset: impl Into<BlockOffset>,
    ) -> Self {
        Self {
            full_path: full_path.into(),
            category,
            source: String::new(),
            name: String::new(),
            enabled: false,
            data: ModData {
                original_offset: original_offset.into(),
                mod_offset: mod_offset.into(),
                mod_size: 0,
                custom: false,
            },
        }
    }

    /// Set the source identifier.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Mark the entry as a custom addition.
    #[must_use]
    pub const fn with_custom(mut self, custom: bool) -> Self {
        self.data.custom = custom;
        self
    }

    /// Synthesized by the mod manager rather than installed by the user.
    pub fn is_internal(&self) -> bool {
        self.source == INTERNAL_SOURCE
    }

    /// The path did not exist before the overlay added it.
    ///
    /// Older lists have no explicit flag; such entries were written with
    /// the original offset equal to the overlay offset.
    pub fn is_custom_addition(&self) -> bool {
        self.data.custom || self.data.original_offset == self.data.mod_offset
    }

    /// Metadata entry, rebuilt from its sources rather than repaired.
    pub fn is_metadata(&self) -> bool {
        Path::new(&self.full_path)
            .extension()
            .is_some_and(|ext| ext == METADATA_EXTENSION)
    }

    /// Offset the archive should resolve to for the current enabled flag.
    pub const fn expected_offset(&self) -> BlockOffset {
        if self.enabled {
            self.data.mod_offset
        } else {
            self.data.original_offset
        }
    }
}

/// All overlay entries of one installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModList {
    /// Format version.
    pub version: String,
    /// Entries in insertion order.
    #[serde(default)]
    pub mods: Vec<ModEntry>,
}

impl Default for ModList {
    fn default() -> Self {
        Self {
            version: MOD_LIST_VERSION.to_string(),
            mods: Vec::new(),
        }
    }
}

impl ModList {
    /// Create a list from entries.
    pub fn new(mods: Vec<ModEntry>) -> Self {
        Self {
            mods,
            ..Default::default()
        }
    }

    /// Look up an entry by virtual path.
    pub fn get(&self, path: &str) -> Option<&ModEntry> {
        self.mods.iter().find(|m| m.full_path == path)
    }

    /// Look up an entry by virtual path, mutably.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut ModEntry> {
        self.mods.iter_mut().find(|m| m.full_path == path)
    }

    /// Virtual paths of every enabled entry.
    pub fn enabled_paths(&self) -> Vec<String> {
        self.mods
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.full_path.clone())
            .collect()
    }

    /// Check that every entry is filed under the category its path belongs
    /// to. Entries without a path are skipped.
    pub fn check_categories(&self) -> Result<()> {
        for entry in self.mods.iter().filter(|m| !m.full_path.is_empty()) {
            let category = DataCategory::from_path(&entry.full_path)?;
            if category != entry.category {
                return Err(ReconcileError::ModList(format!(
                    "{} is recorded under {} but belongs to {}",
                    entry.full_path, entry.category, category
                )));
            }
        }
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.mods.len()
    }

    /// Whether the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

/// Loads and atomically saves a [`ModList`] file.
#[derive(Debug, Clone)]
pub struct ModListStore {
    path: PathBuf,
}

impl ModListStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the list. A missing file is an empty list.
    ///
    /// Fails when an entry's category does not match its path.
    pub async fn load(&self) -> Result<ModList> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No mod list at {}, starting empty", self.path.display());
            return Ok(ModList::default());
        }
        let raw = tokio::fs::read(&self.path).await?;
        let list: ModList = serde_json::from_slice(&raw).map_err(|e| {
            ReconcileError::ModList(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        list.check_categories()?;
        Ok(list)
    }

    /// Replace the file with `list`.
    pub async fn save(&self, list: &ModList) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(list)
            .map_err(|e| ReconcileError::ModList(format!("failed to serialize mod list: {e}")))?;
        write_atomic(&self.path, &bytes).await?;
        debug!(
            "Saved mod list with {} entries to {}",
            list.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Write `bytes` to `path` through a temp file, fsync and rename.
///
/// Retried up to three times; the temp file is removed after each failed
/// attempt.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut last_error = None;

    for attempt in 0..SAVE_ATTEMPTS {
        match write_synced(&temp_path, bytes).await {
            Ok(()) => match tokio::fs::rename(&temp_path, path).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(format!("failed to rename temp file: {e}")),
            },
            Err(e) => last_error = Some(format!("failed to write temp file: {e}")),
        }

        warn!(
            "Write of {} failed (attempt {}): {}",
            path.display(),
            attempt + 1,
            last_error.as_deref().unwrap_or_default()
        );
        if let Err(e) = tokio::fs::remove_file(&temp_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove {}: {}", temp_path.display(), e);
        }
    }

    Err(ReconcileError::ModList(format!(
        "failed to save {} after {SAVE_ATTEMPTS} attempts: {}",
        path.display(),
        last_error.unwrap_or_else(|| "unknown error".to_string())
    )))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
