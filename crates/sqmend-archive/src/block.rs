//! Coarse block type tags.
//!
//! Every block starts with a header whose type field tells the reader how
//! the payload is laid out. The reconciler only uses it as a sanity check
//! that an offset still points at a plausible block.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Block type tag read from a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    /// Placeholder block with no payload (tag 1).
    Empty,
    /// Generic binary payload (tag 2).
    Standard,
    /// Model payload (tag 3).
    Model,
    /// Texture payload (tag 4).
    Texture,
    /// Anything else, including garbage left behind by an overwrite.
    Unknown(u32),
}

impl BlockType {
    /// Decode a raw header tag.
    pub const fn from_tag(tag: u32) -> Self {
        match tag {
            1 => Self::Empty,
            2 => Self::Standard,
            3 => Self::Model,
            4 => Self::Texture,
            other => Self::Unknown(other),
        }
    }

    /// Raw header tag.
    pub const fn tag(self) -> u32 {
        match self {
            Self::Empty => 1,
            Self::Standard => 2,
            Self::Model => 3,
            Self::Texture => 4,
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether the block carries real content (standard, model or texture).
    pub const fn is_valid_content(self) -> bool {
        matches!(self, Self::Standard | Self::Model | Self::Texture)
    }
}

impl From<u32> for BlockType {
    fn from(tag: u32) -> Self {
        Self::from_tag(tag)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::Standard => f.write_str("standard"),
            Self::Model => f.write_str("model"),
            Self::Texture => f.write_str("texture"),
            Self::Unknown(tag) => write!(f, "unknown({tag})"),
        }
    }
}
