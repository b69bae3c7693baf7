//! Configuration management for pva-dma.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (PVA_DMA_ALLOW_TCM, PVA_DMA_RESOURCES)
//! 2. Project-local config file (`./pva-dma.toml`)
//! 3. User config file (`~/.config/pva-dma/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # pva-dma.toml
//!
//! # Accept VMEM -> TCM transfers
//! allow_tcm = false
//!
//! # Resource manifest used by the CLI when --resources is not given
//! resource_manifest = "/etc/pva-dma/resources.toml"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::dma::ValidationOptions;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Largest blob the CLI writes unless configured otherwise.
pub const DEFAULT_MAX_BLOB_SIZE: usize = 64 * 1024;

/// pva-dma configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Accept VMEM -> TCM transfers.
    pub allow_tcm: Option<bool>,

    /// Path to the TOML resource manifest.
    pub resource_manifest: Option<String>,

    /// Refuse to write blobs larger than this.
    pub max_blob_size: Option<usize>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `pva-dma.toml`
    /// 3. User config `~/.config/pva-dma/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        // Environment variables override everything
        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Options passed to validation.
    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions { allow_tcm: self.allow_tcm.unwrap_or(false) }
    }

    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size.unwrap_or(DEFAULT_MAX_BLOB_SIZE)
    }

    /// Load user configuration from ~/.config/pva-dma/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./pva-dma.toml
    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("pva-dma.toml"))
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.allow_tcm.is_some() {
            self.allow_tcm = other.allow_tcm;
        }
        if other.resource_manifest.is_some() {
            self.resource_manifest = other.resource_manifest;
        }
        if other.max_blob_size.is_some() {
            self.max_blob_size = other.max_blob_size;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("PVA_DMA_ALLOW_TCM") {
            match parse_flag(&value) {
                Some(flag) => {
                    log::info!("Using PVA_DMA_ALLOW_TCM from environment: {}", flag);
                    self.allow_tcm = Some(flag);
                }
                None => log::warn!("Ignoring PVA_DMA_ALLOW_TCM={:?}: not a boolean", value),
            }
        }
        if let Ok(path) = std::env::var("PVA_DMA_RESOURCES") {
            log::info!("Using PVA_DMA_RESOURCES from environment: {}", path);
            self.resource_manifest = Some(path);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pva-dma").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# pva-dma configuration
# Place this file at ~/.config/pva-dma/config.toml or ./pva-dma.toml

# Accept VMEM -> TCM transfers (off by default)
# allow_tcm = true

# Resource manifest used when --resources is not given
# resource_manifest = "/etc/pva-dma/resources.toml"

# Largest firmware blob the CLI will write, in bytes
max_blob_size = 65536
"#
        .to_string()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.validation_options(), ValidationOptions::default());
        assert!(!config.validation_options().allow_tcm);
        assert_eq!(config.max_blob_size(), DEFAULT_MAX_BLOB_SIZE);
        assert!(config.resource_manifest.is_none());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            allow_tcm: Some(true),
            resource_manifest: None,
            max_blob_size: Some(4096),
        };

        let overlay = Config {
            allow_tcm: None,
            resource_manifest: Some("/overlay/resources.toml".to_string()),
            max_blob_size: Some(8192),
        };

        base.merge(overlay);

        // allow_tcm unchanged (overlay was None)
        assert_eq!(base.allow_tcm, Some(true));
        assert_eq!(base.resource_manifest, Some("/overlay/resources.toml".to_string()));
        assert_eq!(base.max_blob_size, Some(8192));
        assert!(base.validation_options().allow_tcm);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.max_blob_size, Some(65536));
        assert_eq!(config.allow_tcm, None);
    }

    #[test]
    fn test_user_config_path() {
        if let Some(path) = Config::user_config_path() {
            assert!(path.ends_with("pva-dma/config.toml"));
        }
    }
}
