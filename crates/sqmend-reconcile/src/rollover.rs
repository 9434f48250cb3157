//! Segment rollover detection.
//!
//! The overlay writes its blocks into segment files past the ones the game
//! ships. When a patch adds segments of its own, the game claims those file
//! names and overwrites whatever the overlay stored there.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use sqmend_archive::{DataCategory, SegmentCatalog};
use tracing::{debug, warn};

use crate::modlist::ModEntry;
use crate::{ReconcileError, Result};

/// Checks overlay segments against the game's own segment set.
///
/// The unmodified segment list is fetched once per category and cached for
/// the lifetime of the detector, which is one reconciliation run.
#[derive(Debug)]
pub struct RolloverDetector<C> {
    catalog: Arc<C>,
    cache: Mutex<HashMap<DataCategory, Arc<HashSet<String>>>>,
}

impl<C: SegmentCatalog> RolloverDetector<C> {
    /// Create a detector reading from `catalog`.
    pub fn new(catalog: Arc<C>) -> Self {
        Self {
            catalog,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn unmodded_segments(&self, category: DataCategory) -> Result<Arc<HashSet<String>>> {
        if let Some(segments) = self.cache.lock().get(&category) {
            return Ok(Arc::clone(segments));
        }

        let segments = Arc::new(
            self.catalog
                .unmodded_segments(category)
                .await
                .map_err(ReconcileError::Archive)?,
        );
        debug!(
            "Game owns {} segments in {}",
            segments.len(),
            category
        );
        self.cache
            .lock()
            .entry(category)
            .or_insert_with(|| Arc::clone(&segments));
        Ok(segments)
    }

    /// Whether the segment holding `entry`'s overlay block now belongs to
    /// the unmodified game.
    pub async fn has_rolled_over(&self, entry: &ModEntry) -> Result<bool> {
        let segment_name = entry
            .category
            .segment_file_name(entry.data.mod_offset.segment());
        let segments = self
            .unmodded_segments(entry.category)
            .await
            .map_err(|e| match e {
                ReconcileError::Archive(source) => ReconcileError::ArchiveRead {
                    path: entry.full_path.clone(),
                    category: entry.category,
                    source,
                },
                other => other,
            })?;

        let rolled_over = segments.contains(&segment_name);
        if rolled_over {
            warn!(
                path = %entry.full_path,
                segment = %segment_name,
                position = entry.data.mod_offset.position(),
                "Overlay segment was reclaimed by the game"
            );
        }
        Ok(rolled_over)
    }
}
