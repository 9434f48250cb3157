//! Data categories and segment file naming.
//!
//! Every virtual path lives in exactly one data category, selected by its
//! first path component (`chara/...` lives in `040000`). A category owns
//! its index tables and its numbered segment files:
//!
//! ```text
//! 040000.win32.index
//! 040000.win32.index2
//! 040000.win32.dat0
//! 040000.win32.dat1
//! ...
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ArchiveError, DAT_EXTENSION, INDEX_EXTENSION, INDEX2_EXTENSION, Result};

/// Highest segment number a category can address (3 bits in the index word).
pub const MAX_SEGMENT: u8 = 7;

/// A data category of the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// `000000`
    Common,
    /// `010000`
    Bgcommon,
    /// `020000`
    Bg,
    /// `030000`
    Cut,
    /// `040000`
    Chara,
    /// `050000`
    Shader,
    /// `060000`
    Ui,
    /// `070000`
    Sound,
    /// `080000`
    Vfx,
    /// `090000`
    UiScript,
    /// `0a0000`
    Exd,
    /// `0b0000`
    GameScript,
    /// `0c0000`
    Music,
}

impl DataCategory {
    /// All categories in file order.
    pub const ALL: [Self; 13] = [
        Self::Common,
        Self::Bgcommon,
        Self::Bg,
        Self::Cut,
        Self::Chara,
        Self::Shader,
        Self::Ui,
        Self::Sound,
        Self::Vfx,
        Self::UiScript,
        Self::Exd,
        Self::GameScript,
        Self::Music,
    ];

    /// File stem shared by the category's index and segment files.
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Common => "000000",
            Self::Bgcommon => "010000",
            Self::Bg => "020000",
            Self::Cut => "030000",
            Self::Chara => "040000",
            Self::Shader => "050000",
            Self::Ui => "060000",
            Self::Sound => "070000",
            Self::Vfx => "080000",
            Self::UiScript => "090000",
            Self::Exd => "0a0000",
            Self::GameScript => "0b0000",
            Self::Music => "0c0000",
        }
    }

    /// First path component of virtual paths stored in this category.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Bgcommon => "bgcommon",
            Self::Bg => "bg",
            Self::Cut => "cut",
            Self::Chara => "chara",
            Self::Shader => "shader",
            Self::Ui => "ui",
            Self::Sound => "sound",
            Self::Vfx => "vfx",
            Self::UiScript => "ui_script",
            Self::Exd => "exd",
            Self::GameScript => "game_script",
            Self::Music => "music",
        }
    }

    /// Look up a category by its friendly name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Category owning a virtual path, selected by its first component.
    ///
    /// Returns `ArchiveError::InvalidPath` for empty paths and unknown roots.
    pub fn from_path(path: &str) -> Result<Self> {
        let root = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();

        Self::from_name(root)
            .ok_or_else(|| ArchiveError::InvalidPath(format!("no data category for '{path}'")))
    }

    /// Segment file name for segment `segment` (`040000.win32.dat3`).
    pub fn segment_file_name(self, segment: u8) -> String {
        format!("{}{DAT_EXTENSION}{segment}", self.stem())
    }

    /// Segment file path under `root`.
    pub fn segment_path(self, root: &Path, segment: u8) -> PathBuf {
        root.join(self.segment_file_name(segment))
    }

    /// Primary index file name (`040000.win32.index`).
    pub fn index_file_name(self) -> String {
        format!("{}{INDEX_EXTENSION}", self.stem())
    }

    /// Secondary index file name (`040000.win32.index2`).
    pub fn index2_file_name(self) -> String {
        format!("{}{INDEX2_EXTENSION}", self.stem())
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
