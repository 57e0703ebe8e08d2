//! Configuration module for armvet
//!
//! This module handles:
//! - Package-level policy (`armvet.toml`): threshold, weights, penalties,
//!   validator settings, allowed roots, API-version catalog
//! - User-level settings (`~/.config/armvet/config.toml`) and credentials

mod policy;
mod user_config;

pub use policy::{
    default_api_versions, load_policy_config, ArmTtkConfig, ConfigError, DeploymentConfig,
    DimensionWeights, PolicyConfig, SeverityPenalties, ToolsConfig, CONFIG_FILE_NAME,
    EXAMPLE_CONFIG,
};
pub use user_config::UserConfig;
