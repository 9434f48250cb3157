//! Drift classification of a single mod entry.
//!
//! The detector is read-only against the archive. It computes what the
//! entry should look like after reconciliation and which index writes
//! would bring the archive in line, and leaves applying both to the
//! reconciler's commit pass.

use std::fmt;
use std::sync::Arc;

use sqmend_archive::{BlockOffset, BlockTypeProbe, IndexTable, OffsetIndex};
use tracing::{debug, trace};

use crate::modlist::ModEntry;
use crate::{ReconcileError, Result};

/// How an entry's recorded offsets relate to the archive after a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftClassification {
    /// The archive still agrees with one of the recorded offsets.
    Unchanged,
    /// The baseline block moved to the given offset.
    OffsetMoved(BlockOffset),
    /// The two index tables point at different blocks.
    IndexesDisagree,
    /// The overlay block no longer holds valid content.
    TypeMismatch,
    /// The segment holding the overlay block was reclaimed by the game.
    SegmentRolledOver,
}

impl DriftClassification {
    /// Whether the entry must be removed from the list.
    pub const fn requires_purge(self) -> bool {
        matches!(self, Self::TypeMismatch | Self::SegmentRolledOver)
    }

    /// Whether the entry's bookkeeping was corrected.
    pub const fn is_drift(self) -> bool {
        matches!(self, Self::OffsetMoved(_) | Self::IndexesDisagree)
    }
}

impl fmt::Display for DriftClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::OffsetMoved(offset) => write!(f, "offset moved to {offset}"),
            Self::IndexesDisagree => write!(f, "indexes disagree"),
            Self::TypeMismatch => write!(f, "type mismatch"),
            Self::SegmentRolledOver => write!(f, "segment rolled over"),
        }
    }
}

/// An index write the commit pass must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFix {
    /// Table to write.
    pub table: IndexTable,
    /// Offset to write.
    pub offset: BlockOffset,
}

/// Result of classifying one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftVerdict {
    /// Drift classification.
    pub classification: DriftClassification,
    /// Offset the archive resolved the path to.
    pub resolved: BlockOffset,
    /// New original offset, when the baseline moved.
    pub corrected_original: Option<BlockOffset>,
    /// Enabled flag the entry should carry afterwards.
    pub enabled_after: bool,
    /// Index writes that restore agreement between the tables.
    pub index_fixes: Vec<IndexFix>,
}

impl DriftVerdict {
    /// Verdict that leaves the entry exactly as it is.
    pub fn untouched(entry: &ModEntry) -> Self {
        Self {
            classification: DriftClassification::Unchanged,
            resolved: entry.expected_offset(),
            corrected_original: None,
            enabled_after: entry.enabled,
            index_fixes: Vec::new(),
        }
    }

    /// Whether the entry must be removed from the list.
    pub const fn requires_purge(&self) -> bool {
        self.classification.requires_purge()
    }

    /// Original offset after applying the correction.
    pub fn original_after(&self, entry: &ModEntry) -> BlockOffset {
        self.corrected_original.unwrap_or(entry.data.original_offset)
    }
}

/// Compares an entry's recorded offsets against the archive.
#[derive(Debug)]
pub struct DriftDetector<A> {
    archive: Arc<A>,
}

impl<A> Clone for DriftDetector<A> {
    fn clone(&self) -> Self {
        Self {
            archive: Arc::clone(&self.archive),
        }
    }
}

impl<A> DriftDetector<A>
where
    A: OffsetIndex + BlockTypeProbe,
{
    /// Create a detector reading from `archive`.
    pub fn new(archive: Arc<A>) -> Self {
        Self { archive }
    }

    /// Classify `entry` against the current archive state.
    ///
    /// Entries without a virtual path are left untouched. When neither the
    /// overlay nor the original offset of a non-custom entry holds valid
    /// content, this yields [`ReconcileError::IrrecoverableOffset`].
    pub async fn classify(&self, entry: &ModEntry) -> Result<DriftVerdict> {
        if entry.full_path.is_empty() {
            return Ok(DriftVerdict::untouched(entry));
        }

        let path = entry.full_path.as_str();
        let category = entry.category;
        let read_error = |source| ReconcileError::ArchiveRead {
            path: path.to_string(),
            category,
            source,
        };

        let primary = self
            .archive
            .resolve_offset(path, IndexTable::Primary)
            .await
            .map_err(read_error)?;
        let secondary = self
            .archive
            .resolve_offset(path, IndexTable::Secondary)
            .await
            .map_err(read_error)?;

        let original = entry.data.original_offset;
        let overlay = entry.data.mod_offset;
        trace!(
            path,
            %primary,
            %secondary,
            %original,
            %overlay,
            "Resolved index offsets"
        );

        let mut verdict = if primary != secondary && !secondary.is_null() {
            let corrected = (secondary != original && secondary != overlay).then_some(secondary);
            let target = corrected.unwrap_or(original);

            let mut index_fixes = vec![IndexFix {
                table: IndexTable::Primary,
                offset: target,
            }];
            if secondary != target {
                index_fixes.push(IndexFix {
                    table: IndexTable::Secondary,
                    offset: target,
                });
            }

            debug!(path, %primary, %secondary, "Index tables disagree");
            DriftVerdict {
                classification: DriftClassification::IndexesDisagree,
                resolved: secondary,
                corrected_original: corrected,
                enabled_after: false,
                index_fixes,
            }
        } else if primary != original && primary != overlay && !primary.is_null() {
            debug!(path, from = %original, to = %primary, "Baseline offset moved");
            DriftVerdict {
                classification: DriftClassification::OffsetMoved(primary),
                resolved: primary,
                corrected_original: Some(primary),
                enabled_after: false,
                index_fixes: Vec::new(),
            }
        } else {
            DriftVerdict {
                classification: DriftClassification::Unchanged,
                resolved: primary,
                corrected_original: None,
                enabled_after: primary == overlay,
                index_fixes: Vec::new(),
            }
        };

        let overlay_type = self
            .archive
            .block_type(overlay, category)
            .await
            .map_err(read_error)?;
        if overlay_type.is_valid_content() {
            return Ok(verdict);
        }
        debug!(path, %overlay, block_type = %overlay_type, "Overlay block is not valid content");
        verdict.classification = DriftClassification::TypeMismatch;

        // Purging restores the original, so it must still hold content.
        let original_after = verdict.original_after(entry);
        let original_type = self
            .archive
            .block_type(original_after, category)
            .await
            .map_err(read_error)?;
        if !original_type.is_valid_content() && !entry.is_custom_addition() {
            return Err(ReconcileError::IrrecoverableOffset {
                path: path.to_string(),
                category,
                original_offset: original_after,
            });
        }

        Ok(verdict)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use sqmend_archive::{BlockType, DataCategory, MemoryArchive};

    const PATH: &str = "chara/equipment/e0001/texture/v01_c0101e0001_top_d.tex";

    fn archive() -> MemoryArchive {
        MemoryArchive::new()
            .with_block(DataCategory::Chara, 100u64, BlockType::Texture)
            .with_block(DataCategory::Chara, 500u64, BlockType::Texture)
            .with_block(DataCategory::Chara, 700u64, BlockType::Texture)
    }

    fn entry(enabled: bool) -> ModEntry {
        ModEntry::new(PATH, DataCategory::Chara, 100u64, 500u64).with_enabled(enabled)
    }

    async fn classify(archive: MemoryArchive, entry: &ModEntry) -> Result<DriftVerdict> {
        DriftDetector::new(Arc::new(archive)).classify(entry).await
    }

    #[tokio::test]
    async fn test_unchanged_enabled() {
        let verdict = classify(archive().with_offsets(PATH, 500u64, 500u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::Unchanged);
        assert!(verdict.enabled_after);
        assert!(verdict.index_fixes.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_disabled() {
        let verdict = classify(archive().with_offsets(PATH, 100u64, 100u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::Unchanged);
        assert!(!verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_disabled_entry_follows_archive() {
        let verdict = classify(archive().with_offsets(PATH, 500u64, 500u64), &entry(false))
            .await
            .expect("classify");
        assert!(verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_offset_moved() {
        let verdict = classify(archive().with_offsets(PATH, 700u64, 700u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(
            verdict.classification,
            DriftClassification::OffsetMoved(BlockOffset::new(700))
        );
        assert_eq!(verdict.corrected_original, Some(BlockOffset::new(700)));
        assert!(!verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_secondary_wins_disagreement() {
        let verdict = classify(archive().with_offsets(PATH, 500u64, 700u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::IndexesDisagree);
        assert_eq!(verdict.resolved, BlockOffset::new(700));
        assert_eq!(verdict.corrected_original, Some(BlockOffset::new(700)));
        assert_eq!(
            verdict.index_fixes,
            vec![IndexFix {
                table: IndexTable::Primary,
                offset: BlockOffset::new(700)
            }]
        );
        assert!(!verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_disagreement_on_known_offsets_resets_to_original() {
        let verdict = classify(archive().with_offsets(PATH, 100u64, 500u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::IndexesDisagree);
        assert_eq!(verdict.corrected_original, None);
        assert_eq!(
            verdict.index_fixes,
            vec![
                IndexFix {
                    table: IndexTable::Primary,
                    offset: BlockOffset::new(100)
                },
                IndexFix {
                    table: IndexTable::Secondary,
                    offset: BlockOffset::new(100)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_null_secondary_is_ignored() {
        let verdict = classify(archive().with_offsets(PATH, 500u64, 0u64), &entry(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::Unchanged);
        assert!(verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_overwritten_overlay_block() {
        let archive = archive().with_offsets(PATH, 500u64, 500u64);
        archive.insert_block(DataCategory::Chara, 500u64, BlockType::Empty);

        let verdict = classify(archive, &entry(true)).await.expect("classify");
        assert_eq!(verdict.classification, DriftClassification::TypeMismatch);
        assert!(verdict.requires_purge());
    }

    #[tokio::test]
    async fn test_invalid_original_with_valid_overlay_is_unchanged() {
        let archive = MemoryArchive::new()
            .with_offsets(PATH, 500u64, 500u64)
            .with_block(DataCategory::Chara, 500u64, BlockType::Texture);

        let verdict = classify(archive, &entry(true)).await.expect("classify");
        assert_eq!(verdict.classification, DriftClassification::Unchanged);
        assert!(verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_path_dropped_from_both_tables() {
        let archive =
            MemoryArchive::new().with_block(DataCategory::Chara, 500u64, BlockType::Texture);

        let verdict = classify(archive, &entry(true)).await.expect("classify");
        assert_eq!(verdict.classification, DriftClassification::Unchanged);
        assert!(verdict.resolved.is_null());
        assert!(!verdict.enabled_after);
    }

    #[tokio::test]
    async fn test_invalid_overlay_and_original_is_irrecoverable() {
        let archive = MemoryArchive::new()
            .with_offsets(PATH, 500u64, 500u64)
            .with_block(DataCategory::Chara, 500u64, BlockType::Empty);

        let result = classify(archive, &entry(true)).await;
        assert!(matches!(
            result,
            Err(ReconcileError::IrrecoverableOffset { original_offset, .. })
                if original_offset == BlockOffset::new(100)
        ));
    }

    #[tokio::test]
    async fn test_custom_addition_tolerates_invalid_original() {
        let archive = MemoryArchive::new()
            .with_offsets(PATH, 500u64, 500u64)
            .with_block(DataCategory::Chara, 500u64, BlockType::Empty);

        let verdict = classify(archive, &entry(true).with_custom(true))
            .await
            .expect("classify");
        assert_eq!(verdict.classification, DriftClassification::TypeMismatch);
        assert!(verdict.requires_purge());
    }

    #[tokio::test]
    async fn test_read_failure_carries_path() {
        let archive = archive().with_offsets(PATH, 500u64, 500u64);
        archive.poison_path(PATH);

        let err = classify(archive, &entry(true)).await.expect_err("poisoned");
        assert!(err.is_retryable());
        assert_eq!(err.path(), Some(PATH));
    }

    #[tokio::test]
    async fn test_empty_path_is_untouched() {
        let entry = ModEntry::new("", DataCategory::Chara, 100u64, 500u64).with_enabled(true);
        let verdict = classify(MemoryArchive::new(), &entry).await.expect("classify");
        assert_eq!(verdict, DriftVerdict::untouched(&entry));
    }
}
