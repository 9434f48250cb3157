//! Configuration for the reconciliation core
//!
//! Everything the core needs from the host's settings is passed in through
//! [`ReconcileConfig`] at construction. Nothing is read from ambient state.

use serde::{Deserialize, Serialize};
use sqmend_archive::DataCategory;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{ReconcileError, Result};

/// Default mod list file name inside the game root.
pub const MOD_LIST_FILE: &str = "XivMods.json";

/// Name of the boot config key that selects the DirectX 11 renderer.
const DX11_KEY: &str = "DX11Enabled";

/// Renderer the game client is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DxMode {
    /// DirectX 9 (legacy client).
    Dx9,
    /// DirectX 11.
    #[default]
    Dx11,
}

impl DxMode {
    /// Parse the game's boot config.
    ///
    /// The first line mentioning `DX11Enabled` decides: a trailing `1` means
    /// DX11, anything else DX9. A config without the key is DX9.
    pub fn from_boot_config(contents: &str) -> Self {
        contents
            .lines()
            .find(|line| line.contains(DX11_KEY))
            .map_or(Self::Dx9, |line| {
                if line.trim_end().ends_with('1') {
                    Self::Dx11
                } else {
                    Self::Dx9
                }
            })
    }

    /// Detect the renderer from a boot config file.
    ///
    /// A missing file means DX9. Read errors are returned so the caller can
    /// decide to ignore them.
    pub async fn detect(boot_config: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(boot_config).await? {
            debug!("No boot config at {}, assuming DX9", boot_config.display());
            return Ok(Self::Dx9);
        }
        let contents = tokio::fs::read_to_string(boot_config).await?;
        Ok(Self::from_boot_config(&contents))
    }

    /// Numeric version (9 or 11).
    pub const fn version(self) -> u8 {
        match self {
            Self::Dx9 => 9,
            Self::Dx11 => 11,
        }
    }
}

/// Configuration for the reconciliation core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Directory holding the category index and segment files
    pub game_root: PathBuf,

    /// Mod list file
    pub mod_list_path: PathBuf,

    /// Default destination for index backups
    pub backup_dir: PathBuf,

    /// Categories checked by the startup probe and covered by patch detection
    pub categories: Vec<DataCategory>,

    /// Maximum entries classified concurrently
    pub classify_concurrency: usize,

    /// Game boot config used for renderer detection
    pub boot_config_path: Option<PathBuf>,

    /// Renderer mode
    pub dx_mode: DxMode,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let game_root = PathBuf::from("./sqpack/ffxiv");
        Self {
            mod_list_path: game_root.join(MOD_LIST_FILE),
            backup_dir: PathBuf::from("./Index_Backups"),
            game_root,
            categories: vec![
                DataCategory::Exd,
                DataCategory::Bgcommon,
                DataCategory::Chara,
                DataCategory::Ui,
            ],
            classify_concurrency: 8,
            boot_config_path: None,
            dx_mode: DxMode::default(),
        }
    }
}

impl ReconcileConfig {
    /// Create a new configuration rooted at `game_root`
    ///
    /// The mod list defaults to `XivMods.json` inside the game root.
    pub fn new<P: AsRef<Path>>(game_root: P) -> Self {
        let game_root = game_root.as_ref().to_path_buf();
        Self {
            mod_list_path: game_root.join(MOD_LIST_FILE),
            game_root,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReconcileError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ReconcileError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.game_root.as_os_str().is_empty() {
            return Err(ReconcileError::Config("game root is required".to_string()));
        }
        if self.mod_list_path.as_os_str().is_empty() {
            return Err(ReconcileError::Config(
                "mod list path is required".to_string(),
            ));
        }
        if self.categories.is_empty() {
            warn!("No categories configured, startup probe will check nothing");
        }
        Ok(())
    }

    /// Set the mod list file
    #[must_use]
    pub fn with_mod_list<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.mod_list_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the default backup directory
    #[must_use]
    pub fn with_backup_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backup_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the categories covered by the startup probe and patch detection
    #[must_use]
    pub fn with_categories(mut self, categories: Vec<DataCategory>) -> Self {
        self.categories = categories;
        self
    }

    /// Set the classification concurrency (at least 1)
    #[must_use]
    pub fn with_classify_concurrency(mut self, concurrency: usize) -> Self {
        self.classify_concurrency = concurrency.max(1);
        self
    }

    /// Set the boot config used for renderer detection
    #[must_use]
    pub fn with_boot_config<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.boot_config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Path of the crash-resume journal kept next to the mod list
    pub fn journal_path(&self) -> PathBuf {
        self.mod_list_path.with_extension("reconcile.json")
    }
}
