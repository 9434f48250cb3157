//! Enable, disable and delete primitives for single entries.
//!
//! These are the only operations that point an index at or away from an
//! overlay block. Each one is complete for its entry: both tables are
//! written before it returns.

use std::future::Future;
use std::sync::Arc;

use sqmend_archive::{BlockOffset, IndexTable, OffsetIndex};
use tracing::debug;

use crate::Result;
use crate::modlist::ModEntry;

/// Mutates the archive on behalf of one mod entry.
///
/// Implementations touch the archive only; the caller owns the mod list
/// and updates the entry's flags afterwards.
pub trait OverlayMutator: Send + Sync {
    /// Point the entry's path back at its original block.
    ///
    /// Custom additions have no original block; their descriptor is
    /// removed instead.
    fn disable_entry(&self, entry: &ModEntry) -> impl Future<Output = Result<()>> + Send;

    /// Point the entry's path at its overlay block.
    fn enable_entry(&self, entry: &ModEntry) -> impl Future<Output = Result<()>> + Send;

    /// Undo the entry entirely before it is dropped from the list.
    ///
    /// Entries with a real original get it back; custom additions lose
    /// their descriptor.
    fn delete_entry(&self, entry: &ModEntry) -> impl Future<Output = Result<()>> + Send;
}

/// [`OverlayMutator`] writing straight into an [`OffsetIndex`].
#[derive(Debug)]
pub struct IndexOverlay<I> {
    index: Arc<I>,
}

impl<I> Clone for IndexOverlay<I> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
        }
    }
}

impl<I: OffsetIndex> IndexOverlay<I> {
    /// Create an overlay over `index`.
    pub fn new(index: Arc<I>) -> Self {
        Self { index }
    }

    async fn point_at(&self, entry: &ModEntry, offset: BlockOffset) -> Result<()> {
        for table in [IndexTable::Primary, IndexTable::Secondary] {
            self.index
                .set_offset(offset, &entry.full_path, table)
                .await?;
        }
        Ok(())
    }
}

impl<I: OffsetIndex> OverlayMutator for IndexOverlay<I> {
    async fn disable_entry(&self, entry: &ModEntry) -> Result<()> {
        if entry.is_custom_addition() {
            debug!(path = %entry.full_path, "Removing descriptor of custom addition");
            self.index
                .delete_descriptor(&entry.full_path, entry.category)
                .await?;
            return Ok(());
        }
        debug!(path = %entry.full_path, offset = %entry.data.original_offset, "Disabling");
        self.point_at(entry, entry.data.original_offset).await
    }

    async fn enable_entry(&self, entry: &ModEntry) -> Result<()> {
        debug!(path = %entry.full_path, offset = %entry.data.mod_offset, "Enabling");
        self.point_at(entry, entry.data.mod_offset).await
    }

    async fn delete_entry(&self, entry: &ModEntry) -> Result<()> {
        debug!(path = %entry.full_path, internal = entry.is_internal(), "Deleting");
        self.disable_entry(entry).await
    }
}
