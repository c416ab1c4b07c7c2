use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    /// Directory holding one object store per mirrored remote
    #[serde(default = "defaults::default_store_dir")]
    pub store_dir: PathBuf,
    /// Named CORS relay endpoints
    #[serde(default)]
    pub relays: BTreeMap<String, String>,
    /// Relay profile to route fetches through
    #[serde(default)]
    pub relay: Option<String>,
    /// Explicit relay base URL; takes precedence over `relay`
    #[serde(default)]
    pub cors_proxy: Option<String>,
    /// Shallow clone depth (0 fetches full history)
    #[serde(default = "defaults::default_depth")]
    pub depth: u32,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            store_dir: defaults::default_store_dir(),
            relays: BTreeMap::new(),
            relay: None,
            cors_proxy: None,
            depth: defaults::default_depth(),
        }
    }
}

impl MirrorConfig {
    /// Load configuration from the default config file (if any) and
    /// environment variables
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_with_env(&config_path)
    }

    /// Load configuration from `path` (defaults when absent), then apply
    /// environment overrides
    pub fn load_with_env(config_path: &Path) -> Result<Self> {
        tracing::debug!("loading git-mirror config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(config_path)?
        } else {
            Self::default()
        };

        if let Ok(path) = env::var("GIT_MIRROR_STORE_DIR") {
            config.store_dir = expand_tilde(&PathBuf::from(path));
        }

        if let Ok(url) = env::var("GIT_MIRROR_CORS_PROXY") {
            config.cors_proxy = Some(url);
        }

        if let Ok(name) = env::var("GIT_MIRROR_RELAY") {
            config.relay = Some(name);
        }

        if let Ok(depth) = env::var("GIT_MIRROR_DEPTH") {
            config.depth = depth
                .parse()
                .context("Failed to parse GIT_MIRROR_DEPTH as u32")?;
        }
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(Error::from)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: MirrorConfig = serde_yaml::from_str(&content)
            .map_err(Error::from)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.store_dir = expand_tilde(&config.store_dir);

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(Error::from)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(Error::from)
            .context("Failed to serialize config")?;

        std::fs::write(path, content)
            .map_err(Error::from)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-mirror/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    /// Resolve the relay base URL fetches should go through, if any.
    ///
    /// A selected profile missing from `relays` is a relay misconfiguration
    /// and surfaces as a network error.
    pub fn resolve_cors_proxy(&self) -> Result<Option<String>> {
        if let Some(url) = &self.cors_proxy {
            return Ok(Some(url.clone()));
        }
        match &self.relay {
            None => Ok(None),
            Some(name) => match self.relays.get(name) {
                Some(url) => Ok(Some(url.clone())),
                None => Err(Error::Network(format!("unknown relay profile '{}'", name)).into()),
            },
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn default_store_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("git-mirror"))
            .unwrap_or_else(|| PathBuf::from(".git-mirror"))
    }

    pub(crate) fn default_depth() -> u32 {
        1
    }
}
