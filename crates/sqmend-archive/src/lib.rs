//! Archive-side vocabulary for post-patch mod reconciliation.
//!
//! The game archive is split into data categories (`040000` for character
//! data, `0a0000` for Excel sheets, ...). Each category owns two index
//! tables (`.win32.index` and `.win32.index2`) that map virtual paths to
//! block offsets, plus a series of numbered segment files
//! (`.win32.dat0`, `.win32.dat1`, ...) holding the blocks themselves.
//!
//! This crate does not parse segment contents. It provides:
//!
//! - **Addressing**: [`DataCategory`], [`BlockOffset`] and segment file naming
//! - **Block tags**: [`BlockType`], the coarse content sniff result
//! - **Collaborator traits**: [`OffsetIndex`], [`BlockTypeProbe`],
//!   [`SegmentCatalog`] and [`IndexBackup`], the boundary the reconciler
//!   talks to
//! - **Implementations**: [`MemoryArchive`] (in-memory tables, used for
//!   dry runs and tests) and [`FsIndexBackup`] (index file snapshots)
//!
//! # Example
//!
//! ```rust,ignore
//! use sqmend_archive::{BlockOffset, DataCategory, IndexTable, MemoryArchive, OffsetIndex};
//!
//! # async fn example() -> sqmend_archive::Result<()> {
//! let archive = MemoryArchive::new();
//! let offset = BlockOffset::from_parts(3, 0x8000)?;
//! archive.set_offset(offset, "chara/equipment/e0001/e0001.imc", IndexTable::Primary).await?;
//! assert_eq!(offset.segment(), 3);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Data categories and segment file naming
pub mod category;

// Packed block offsets
pub mod offset;

// Coarse block type tags
pub mod block;

// Collaborator traits
pub mod traits;

// In-memory archive
pub mod memory;

// Index file snapshots
pub mod backup;

pub use backup::FsIndexBackup;
pub use block::BlockType;
pub use category::DataCategory;
pub use memory::MemoryArchive;
pub use offset::BlockOffset;
pub use traits::{BlockTypeProbe, IndexBackup, IndexTable, OffsetIndex, SegmentCatalog};

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while talking to the archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path or file not present in the archive.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Offset cannot be represented in the index word layout.
    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    /// Virtual path does not belong to a known data category.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Index snapshot could not be taken or restored.
    #[error("Backup error: {0}")]
    Backup(String),
}

/// Segment file extension, followed by the segment number.
pub const DAT_EXTENSION: &str = ".win32.dat";

/// Primary index table extension.
pub const INDEX_EXTENSION: &str = ".win32.index";

/// Secondary index table extension.
pub const INDEX2_EXTENSION: &str = ".win32.index2";
