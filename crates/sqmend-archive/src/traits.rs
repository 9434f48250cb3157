//! Collaborator traits at the archive boundary.
//!
//! The reconciler never touches index or segment bytes itself. Everything
//! it needs from the archive goes through these traits, which the host
//! implements on top of its archive reader/writer. [`MemoryArchive`]
//! implements all of them in memory.
//!
//! [`MemoryArchive`]: crate::MemoryArchive

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;

use crate::{BlockOffset, BlockType, DataCategory, Result};

/// Which of the two index tables an operation targets.
///
/// Both tables map paths to offsets and can be updated independently by
/// the vendor's patcher, so they are consulted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexTable {
    /// `.win32.index`
    Primary,
    /// `.win32.index2`
    Secondary,
}

/// Read/write access to the index tables.
///
/// Lookups for paths absent from a table resolve to [`BlockOffset::NULL`]
/// rather than an error. Errors are reserved for failed reads.
pub trait OffsetIndex: Send + Sync {
    /// Resolve the current offset of `path` in `table`.
    fn resolve_offset(
        &self,
        path: &str,
        table: IndexTable,
    ) -> impl Future<Output = Result<BlockOffset>> + Send;

    /// Point `path` at `offset` in `table`.
    fn set_offset(
        &self,
        offset: BlockOffset,
        path: &str,
        table: IndexTable,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the descriptor for `path` from both tables.
    fn delete_descriptor(
        &self,
        path: &str,
        category: DataCategory,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Coarse content sniffing.
pub trait BlockTypeProbe: Send + Sync {
    /// Read the type tag of the block at `offset` in `category`.
    fn block_type(
        &self,
        offset: BlockOffset,
        category: DataCategory,
    ) -> impl Future<Output = Result<BlockType>> + Send;
}

/// Ownership of segment files.
pub trait SegmentCatalog: Send + Sync {
    /// Segment file names (`040000.win32.dat0`, ...) owned by the
    /// unmodified game for `category`.
    ///
    /// Segments created by the mod overlay are never part of this set.
    fn unmodded_segments(
        &self,
        category: DataCategory,
    ) -> impl Future<Output = Result<HashSet<String>>> + Send;
}

/// Index table snapshots.
pub trait IndexBackup: Send + Sync {
    /// Snapshot the current index tables into `destination`.
    fn request_backup(&self, destination: &Path) -> impl Future<Output = Result<()>> + Send;
}
