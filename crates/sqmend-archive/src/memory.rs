//! In-memory archive.
//!
//! Holds both index tables, the block type of every known block and the
//! unmodified segment ownership per category. Hosts use it for dry runs
//! (load a copy of the real tables, reconcile, inspect the journal); the
//! test suites use it to simulate a vendor patch.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;
use tracing::debug;

use crate::traits::{BlockTypeProbe, IndexBackup, IndexTable, OffsetIndex, SegmentCatalog};
use crate::{ArchiveError, BlockOffset, BlockType, DataCategory, Result};

/// A mutation applied to the index tables, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexWrite {
    /// `set_offset` call.
    Set {
        /// Virtual path.
        path: String,
        /// Table written.
        table: IndexTable,
        /// New offset.
        offset: BlockOffset,
    },
    /// `delete_descriptor` call.
    Delete {
        /// Virtual path.
        path: String,
    },
}

#[derive(Debug, Default)]
struct Tables {
    primary: HashMap<String, BlockOffset>,
    secondary: HashMap<String, BlockOffset>,
    blocks: HashMap<(DataCategory, BlockOffset), BlockType>,
    unmodded: HashMap<DataCategory, HashSet<String>>,
    unreadable: HashSet<String>,
    journal: Vec<IndexWrite>,
    backups: Vec<std::path::PathBuf>,
}

/// Archive held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    tables: RwLock<Tables>,
}

impl MemoryArchive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` in both tables.
    #[must_use]
    pub fn with_offsets(
        self,
        path: &str,
        primary: impl Into<BlockOffset>,
        secondary: impl Into<BlockOffset>,
    ) -> Self {
        self.insert_offsets(path, primary, secondary);
        self
    }

    /// Register the block type at `offset`.
    #[must_use]
    pub fn with_block(
        self,
        category: DataCategory,
        offset: impl Into<BlockOffset>,
        block_type: BlockType,
    ) -> Self {
        self.insert_block(category, offset, block_type);
        self
    }

    /// Declare the segments the unmodified game owns for `category`.
    #[must_use]
    pub fn with_unmodded_segments<I, S>(self, category: DataCategory, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replace_unmodded_segments(category, segments);
        self
    }

    /// Overwrite both table entries for `path`.
    ///
    /// A null offset removes the path from that table. This bypasses the
    /// journal: it models the vendor patcher, not the overlay.
    pub fn insert_offsets(
        &self,
        path: &str,
        primary: impl Into<BlockOffset>,
        secondary: impl Into<BlockOffset>,
    ) {
        let mut guard = self.tables.write();
        let tables = &mut *guard;
        for (map, offset) in [
            (&mut tables.primary, primary.into()),
            (&mut tables.secondary, secondary.into()),
        ] {
            if offset.is_null() {
                map.remove(path);
            } else {
                map.insert(path.to_string(), offset);
            }
        }
    }

    /// Register the block type at `offset`.
    pub fn insert_block(
        &self,
        category: DataCategory,
        offset: impl Into<BlockOffset>,
        block_type: BlockType,
    ) {
        self.tables
            .write()
            .blocks
            .insert((category, offset.into()), block_type);
    }

    /// Replace the unmodified segment set for `category`.
    pub fn replace_unmodded_segments<I, S>(&self, category: DataCategory, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .write()
            .unmodded
            .insert(category, segments.into_iter().map(Into::into).collect());
    }

    /// Make every lookup of `path` fail with an I/O error.
    pub fn poison_path(&self, path: &str) {
        self.tables.write().unreadable.insert(path.to_string());
    }

    /// Current offset of `path` in `table` without going through the trait.
    pub fn offset_of(&self, path: &str, table: IndexTable) -> BlockOffset {
        let tables = self.tables.read();
        let map = match table {
            IndexTable::Primary => &tables.primary,
            IndexTable::Secondary => &tables.secondary,
        };
        map.get(path).copied().unwrap_or_default()
    }

    /// Whether `path` has a descriptor in either table.
    pub fn has_descriptor(&self, path: &str) -> bool {
        let tables = self.tables.read();
        tables.primary.contains_key(path) || tables.secondary.contains_key(path)
    }

    /// Index mutations applied through [`OffsetIndex`], oldest first.
    pub fn journal(&self) -> Vec<IndexWrite> {
        self.tables.read().journal.clone()
    }

    /// Destinations passed to [`IndexBackup::request_backup`].
    pub fn backups(&self) -> Vec<std::path::PathBuf> {
        self.tables.read().backups.clone()
    }

    fn check_readable(tables: &Tables, path: &str) -> Result<()> {
        if tables.unreadable.contains(path) {
            return Err(ArchiveError::Io(std::io::Error::other(format!(
                "simulated read failure for {path}"
            ))));
        }
        Ok(())
    }
}

impl OffsetIndex for MemoryArchive {
    async fn resolve_offset(&self, path: &str, table: IndexTable) -> Result<BlockOffset> {
        Self::check_readable(&self.tables.read(), path)?;
        Ok(self.offset_of(path, table))
    }

    async fn set_offset(&self, offset: BlockOffset, path: &str, table: IndexTable) -> Result<()> {
        let mut tables = self.tables.write();
        Self::check_readable(&tables, path)?;

        debug!("Setting {:?} offset of {} to {}", table, path, offset);
        let map = match table {
            IndexTable::Primary => &mut tables.primary,
            IndexTable::Secondary => &mut tables.secondary,
        };
        if offset.is_null() {
            map.remove(path);
        } else {
            map.insert(path.to_string(), offset);
        }

        tables.journal.push(IndexWrite::Set {
            path: path.to_string(),
            table,
            offset,
        });
        Ok(())
    }

    async fn delete_descriptor(&self, path: &str, category: DataCategory) -> Result<()> {
        let mut tables = self.tables.write();
        Self::check_readable(&tables, path)?;

        debug!("Deleting descriptor of {} from {}", path, category);
        tables.primary.remove(path);
        tables.secondary.remove(path);
        tables.journal.push(IndexWrite::Delete {
            path: path.to_string(),
        });
        Ok(())
    }
}

impl BlockTypeProbe for MemoryArchive {
    async fn block_type(&self, offset: BlockOffset, category: DataCategory) -> Result<BlockType> {
        Ok(self
            .tables
            .read()
            .blocks
            .get(&(category, offset))
            .copied()
            .unwrap_or(BlockType::Unknown(0)))
    }
}

impl SegmentCatalog for MemoryArchive {
    async fn unmodded_segments(&self, category: DataCategory) -> Result<HashSet<String>> {
        Ok(self
            .tables
            .read()
            .unmodded
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }
}

impl IndexBackup for MemoryArchive {
    async fn request_backup(&self, destination: &Path) -> Result<()> {
        self.tables.write().backups.push(destination.to_path_buf());
        Ok(())
    }
}
