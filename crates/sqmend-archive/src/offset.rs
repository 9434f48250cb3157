//! Packed block offsets.
//!
//! Index tables store a 32-bit word per path. The word packs the segment
//! number and the block position inside that segment:
//!
//! ```text
//! bit  0      unused
//! bits 1..=3  segment number (0-7)
//! bits 4..    position / 128
//! ```
//!
//! Offsets handed around by the archive collaborators are the word
//! multiplied by 8, so the segment number is `((offset / 8) & 0x0F) / 2`
//! and the byte position in the segment file is `offset & !0x7F`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::category::MAX_SEGMENT;
use crate::{ArchiveError, Result};

/// Block alignment inside a segment file.
pub const BLOCK_ALIGNMENT: u64 = 0x80;

/// Largest offset representable by a 32-bit index word.
pub const MAX_OFFSET: u64 = (u32::MAX as u64) * 8;

/// A block offset as recorded in the index tables.
///
/// Zero means "no entry".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockOffset(u64);

impl BlockOffset {
    /// The null offset.
    pub const NULL: Self = Self(0);

    /// Wrap a raw offset value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Build an offset from a segment number and a byte position.
    ///
    /// `position` must be 128-byte aligned and `segment` at most 7.
    pub fn from_parts(segment: u8, position: u64) -> Result<Self> {
        if segment > MAX_SEGMENT {
            return Err(ArchiveError::InvalidOffset(format!(
                "segment {segment} exceeds maximum {MAX_SEGMENT}"
            )));
        }
        if position % BLOCK_ALIGNMENT != 0 {
            return Err(ArchiveError::InvalidOffset(format!(
                "position {position:#x} is not {BLOCK_ALIGNMENT}-byte aligned"
            )));
        }

        let value = position + u64::from(segment) * 16;
        if value > MAX_OFFSET {
            return Err(ArchiveError::InvalidOffset(format!(
                "position {position:#x} does not fit an index word"
            )));
        }
        Ok(Self(value))
    }

    /// Raw offset value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check for the null offset.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Segment number the block lives in.
    pub const fn segment(self) -> u8 {
        (((self.0 / 8) & 0x0F) / 2) as u8
    }

    /// Byte position of the block inside its segment file.
    pub const fn position(self) -> u64 {
        self.0 & !(BLOCK_ALIGNMENT - 1)
    }
}

impl From<u64> for BlockOffset {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BlockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
