//! User-level configuration for armvet
//!
//! Supports loading credentials from:
//! - Environment variables
//! - ~/.config/armvet/config.toml

use crate::process::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable that overrides the configured client secret
pub const CLIENT_SECRET_ENV: &str = "ARMVET_CLIENT_SECRET";

#[derive(Debug, Default, Deserialize)]
struct RawUserConfig {
    #[serde(default)]
    deployment: RawDeploymentCredentials,
}

#[derive(Debug, Default, Deserialize)]
struct RawDeploymentCredentials {
    client_secret: Option<String>,
}

/// Per-user settings that never live in a package
#[derive(Debug, Default, Clone)]
pub struct UserConfig {
    client_secret: Option<Secret>,
}

impl UserConfig {
    /// Load config from all sources, with priority:
    /// 1. Environment variables (highest)
    /// 2. User config (~/.config/armvet/config.toml)
    pub fn load() -> Self {
        let mut config = Self::user_config_path()
            .filter(|p| p.exists())
            .map(|p| Self::from_file(&p))
            .unwrap_or_default();

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            if !secret.is_empty() {
                config.client_secret = Some(Secret::new(secret));
            }
        }

        config
    }

    /// Read a user config file. An unreadable or malformed file is
    /// logged and treated as empty.
    fn from_file(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read user config {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match Self::parse(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Ignoring malformed user config {}: {}",
                    path.display(),
                    e.message()
                );
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let raw: RawUserConfig = toml::from_str(content)?;
        Ok(Self {
            client_secret: raw.deployment.client_secret.map(Secret::new),
        })
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("armvet").join("config.toml"))
    }

    /// Service principal secret for `deployment-validate`
    pub fn client_secret(&self) -> Option<&Secret> {
        self.client_secret.as_ref()
    }
}
