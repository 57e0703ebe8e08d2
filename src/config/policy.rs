//! Package-level policy configuration
//!
//! Loads the policy from an explicit `--config` file, or from the user
//! config directory overlaid with `armvet.toml` in the package root.
//! Settings that pick executables or allowed roots are never taken from
//! the package (see [`load_policy_config`]).
//!
//! # Configuration Format
//!
//! ```toml
//! # ~/.config/armvet/armvet.toml
//! threshold = 80
//! allowed_roots = ["."]
//!
//! [weights]
//! security = 0.35
//! compliance = 0.25
//!
//! [penalties]
//! error = 25
//! warning = 5
//!
//! [tools]
//! enabled = ["arm-ttk", "template-analyzer"]
//! timeout_ms = 120000
//!
//! [tools.programs]
//! template-analyzer = "/opt/template-analyzer/TemplateAnalyzer"
//!
//! [tools.arm_ttk]
//! module_path = "/opt/arm-ttk/arm-ttk.psd1"
//! skip = ["apiVersions Should Be Recent"]
//!
//! [deployment]
//! subscription_id = "00000000-0000-0000-0000-000000000000"
//! resource_group = "rg-marketplace-validation"
//!
//! [api_versions]
//! "Microsoft.Storage/storageAccounts" = "2023-01-01"
//! ```

use crate::models::{Dimension, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the policy file looked up in a package root
pub const CONFIG_FILE_NAME: &str = "armvet.toml";

/// Errors loading or validating a policy
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The policy every pipeline and scorer borrows for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum overall score for a pass (0-100)
    pub threshold: u32,
    pub weights: DimensionWeights,
    pub penalties: SeverityPenalties,
    pub tools: ToolsConfig,
    pub deployment: DeploymentConfig,
    /// Directories targets must resolve into. Empty means the current
    /// working directory.
    pub allowed_roots: Vec<PathBuf>,
    /// Resource type -> API version used by the `inject-api-version` fix.
    /// Entries from a file extend the built-in catalog.
    pub api_versions: BTreeMap<String, String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 80,
            weights: DimensionWeights::default(),
            penalties: SeverityPenalties::default(),
            tools: ToolsConfig::default(),
            deployment: DeploymentConfig::default(),
            allowed_roots: Vec::new(),
            api_versions: default_api_versions(),
        }
    }
}

/// Relative importance of each dimension in the overall score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub security: f64,
    pub compliance: f64,
    pub structure: f64,
    pub performance: f64,
    pub cost: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            security: 0.35,
            compliance: 0.25,
            structure: 0.20,
            performance: 0.10,
            cost: 0.10,
        }
    }
}

impl DimensionWeights {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Security => self.security,
            Dimension::Compliance => self.compliance,
            Dimension::Structure => self.structure,
            Dimension::Performance => self.performance,
            Dimension::Cost => self.cost,
        }
    }

    /// All weights finite and non-negative, with a positive sum.
    /// Weights need not sum to 1; the scorer renormalizes.
    pub fn is_valid(&self) -> bool {
        let all = Dimension::ALL.map(|d| self.weight(d));
        all.iter().all(|w| w.is_finite() && *w >= 0.0) && all.iter().sum::<f64>() > 0.0
    }
}

/// Points subtracted from a dimension per finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPenalties {
    pub error: u32,
    pub warning: u32,
    pub info: u32,
}

impl Default for SeverityPenalties {
    fn default() -> Self {
        Self {
            error: 25,
            warning: 5,
            info: 1,
        }
    }
}

impl SeverityPenalties {
    pub fn penalty(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }
}

/// External validator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Validators to run in addition to the built-in checks
    pub enabled: Vec<String>,
    pub timeout_ms: u64,
    /// Capture limit for each of stdout and stderr
    pub max_output_bytes: usize,
    /// Pause before retrying a timed-out validator
    pub retry_backoff_ms: u64,
    /// Tool name -> executable, replacing the default program
    pub programs: BTreeMap<String, String>,
    pub arm_ttk: ArmTtkConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            timeout_ms: 120_000,
            max_output_bytes: crate::process::DEFAULT_MAX_OUTPUT_BYTES,
            retry_backoff_ms: 1_000,
            programs: BTreeMap::new(),
            arm_ttk: ArmTtkConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmTtkConfig {
    /// Path to `arm-ttk.psd1`; the module is imported by name when unset
    pub module_path: Option<PathBuf>,
    /// arm-ttk test names to skip
    pub skip: Vec<String>,
}

/// Where `deployment-validate` runs a what-if validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
}

/// API versions known to pass marketplace review
pub fn default_api_versions() -> BTreeMap<String, String> {
    [
        ("Microsoft.Compute/virtualMachines", "2023-09-01"),
        ("Microsoft.Compute/disks", "2023-04-02"),
        ("Microsoft.KeyVault/vaults", "2023-07-01"),
        ("Microsoft.Network/networkInterfaces", "2023-09-01"),
        ("Microsoft.Network/networkSecurityGroups", "2023-09-01"),
        ("Microsoft.Network/publicIPAddresses", "2023-09-01"),
        ("Microsoft.Network/virtualNetworks", "2023-09-01"),
        ("Microsoft.Storage/storageAccounts", "2023-01-01"),
        ("Microsoft.Web/serverfarms", "2022-09-01"),
        ("Microsoft.Web/sites", "2022-09-01"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl PolicyConfig {
    /// Catalog API version for a resource type (ARM types are case-insensitive)
    pub fn api_version_for(&self, resource_type: &str) -> Option<&str> {
        self.api_versions
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(resource_type))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_tool_enabled(&self, name: &str) -> bool {
        self.tools.enabled.iter().any(|t| t == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "threshold must be between 0 and 100, got {}",
                self.threshold
            )));
        }
        if !self.weights.is_valid() {
            return Err(ConfigError::Invalid(
                "weights must be non-negative and not all zero".to_string(),
            ));
        }
        if self.tools.timeout_ms == 0 {
            return Err(ConfigError::Invalid("tools.timeout_ms must be positive".to_string()));
        }
        if let Some((tool, program)) = self
            .tools
            .programs
            .iter()
            .find(|(_, program)| !Path::new(program.as_str()).is_absolute())
        {
            return Err(ConfigError::Invalid(format!(
                "tools.programs.{} must be an absolute path, got '{}'",
                tool, program
            )));
        }
        if self.tools.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "tools.max_output_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a policy from TOML text. Relative `allowed_roots` resolve
    /// against `base_dir`.
    pub fn from_toml_str(content: &str, origin: &Path, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: PolicyConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;

        let mut catalog = default_api_versions();
        catalog.extend(std::mem::take(&mut config.api_versions));
        config.api_versions = catalog;

        config.allowed_roots = config
            .allowed_roots
            .into_iter()
            .map(|root| if root.is_absolute() { root } else { base_dir.join(root) })
            .collect();

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&content, path, base_dir)
    }
}

/// Load the policy for a package.
///
/// With `explicit` (`--config`) that file is the whole policy; an
/// unreadable explicit file is an error. Otherwise:
/// 1. `armvet/armvet.toml` in the user config directory, or the defaults
/// 2. `armvet.toml` in `package_root` on top of it
///
/// A package ships with the artifact under validation, so it may tune
/// scoring but never decide what runs or where: `allowed_roots`,
/// `tools.enabled`, `tools.programs` and `tools.arm_ttk.module_path` always
/// come from the user-level policy. A file that exists but does not parse
/// is always an error.
pub fn load_policy_config(
    explicit: Option<&Path>,
    package_root: &Path,
) -> Result<PolicyConfig, ConfigError> {
    if let Some(path) = explicit {
        debug!("Loading policy from {}", path.display());
        return PolicyConfig::from_file(path);
    }

    let user = match dirs::config_dir().map(|d| d.join("armvet").join(CONFIG_FILE_NAME)) {
        Some(path) if path.is_file() => {
            debug!("Loaded user policy from {}", path.display());
            PolicyConfig::from_file(&path)?
        }
        _ => PolicyConfig::default(),
    };

    let local = package_root.join(CONFIG_FILE_NAME);
    if !local.is_file() {
        debug!("No package policy found");
        return Ok(user);
    }
    debug!("Loaded package policy from {}", local.display());
    let package = PolicyConfig::from_file(&local)?;
    Ok(package.with_trusted_settings(&user, &local))
}

impl PolicyConfig {
    /// Replace everything that selects executables or widens path
    /// confinement with the values from `trusted`
    fn with_trusted_settings(mut self, trusted: &PolicyConfig, origin: &Path) -> Self {
        let defaults = PolicyConfig::default();
        let shown = origin.display();
        if self.allowed_roots != defaults.allowed_roots {
            warn!("Ignoring allowed_roots from package policy {}", shown);
        }
        if self.tools.enabled != defaults.tools.enabled {
            warn!("Ignoring tools.enabled from package policy {}", shown);
        }
        if self.tools.programs != defaults.tools.programs {
            warn!("Ignoring tools.programs from package policy {}", shown);
        }
        if self.tools.arm_ttk.module_path.is_some() {
            warn!("Ignoring tools.arm_ttk.module_path from package policy {}", shown);
        }
        self.allowed_roots = trusted.allowed_roots.clone();
        self.tools.enabled = trusted.tools.enabled.clone();
        self.tools.programs = trusted.tools.programs.clone();
        self.tools.arm_ttk.module_path = trusted.tools.arm_ttk.module_path.clone();
        self
    }
}

/// Commented example written by `armvet init`
pub const EXAMPLE_CONFIG: &str = r#"# armvet policy
#
# Pass requires overall score >= threshold and no error findings.
threshold = 80

# Settings that choose what runs and where are only read from --config or
# the user config directory (~/.config/armvet/armvet.toml), never from a
# package. There, allowed_roots lists the directories validated paths must
# resolve into (relative to that file):
# allowed_roots = ["/srv/marketplace"]

[weights]
security = 0.35
compliance = 0.25
structure = 0.20
performance = 0.10
cost = 0.10

[penalties]
error = 25
warning = 5
info = 1

[tools]
# External validators to run on top of the built-in checks (user-level):
# enabled = ["arm-ttk", "template-analyzer", "bicep-lint", "deployment-validate"]
timeout_ms = 120000
retry_backoff_ms = 1000

# [tools.programs]  (user-level, absolute paths)
# template-analyzer = "/opt/template-analyzer/TemplateAnalyzer"

# [tools.arm_ttk]
# module_path = "/opt/arm-ttk/arm-ttk/arm-ttk.psd1"
# skip = ["apiVersions Should Be Recent"]

# [deployment]
# subscription_id = "00000000-0000-0000-0000-000000000000"
# resource_group = "rg-marketplace-validation"

# [api_versions]
# "Microsoft.Sql/servers" = "2023-05-01-preview"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PolicyConfig::default();
        assert_eq!(config.threshold, 80);
        assert!(config.weights.is_valid());
        assert_eq!(config.penalties.penalty(Severity::Error), 25);
        assert_eq!(config.penalties.penalty(Severity::Warning), 5);
        assert_eq!(config.penalties.penalty(Severity::Info), 1);
        assert!(config.tools.enabled.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weights_validation() {
        let mut weights = DimensionWeights::default();
        assert!(weights.is_valid());
        weights.security = -1.0;
        assert!(!weights.is_valid());

        let zero = DimensionWeights {
            security: 0.0,
            compliance: 0.0,
            structure: 0.0,
            performance: 0.0,
            cost: 0.0,
        };
        assert!(!zero.is_valid());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let toml = r#"
threshold = 90

[weights]
security = 0.5

[tools]
enabled = ["arm-ttk"]

[api_versions]
"Microsoft.Sql/servers" = "2023-05-01-preview"
"#;
        let config =
            PolicyConfig::from_toml_str(toml, Path::new("armvet.toml"), Path::new("/pkg")).unwrap();
        assert_eq!(config.threshold, 90);
        assert!((config.weights.security - 0.5).abs() < f64::EPSILON);
        assert!((config.weights.cost - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.tools.timeout_ms, 120_000);
        assert!(config.is_tool_enabled("arm-ttk"));
        assert_eq!(config.api_version_for("microsoft.sql/servers"), Some("2023-05-01-preview"));
        assert_eq!(
            config.api_version_for("Microsoft.Storage/storageAccounts"),
            Some("2023-01-01")
        );
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = PolicyConfig::from_toml_str("threshold = 101", Path::new("a.toml"), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = PolicyConfig::from_toml_str("threshold = [", Path::new("a.toml"), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_relative_roots_resolve_against_file() {
        let config = PolicyConfig::from_toml_str(
            r#"allowed_roots = ["packages", "/abs"]"#,
            Path::new("/work/armvet.toml"),
            Path::new("/work"),
        )
        .unwrap();
        assert_eq!(
            config.allowed_roots,
            vec![PathBuf::from("/work/packages"), PathBuf::from("/abs")]
        );
    }

    #[test]
    fn test_load_from_package_root() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "threshold = 70\n").unwrap();
        let config = load_policy_config(None, dir.path()).unwrap();
        assert_eq!(config.threshold, 70);
    }

    #[test]
    fn test_package_cannot_choose_programs_or_roots() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
threshold = 60
allowed_roots = ["/"]

[tools]
enabled = ["bicep-lint"]

[tools.programs]
bicep-lint = "/tmp/evil"

[tools.arm_ttk]
module_path = "/tmp/evil.psd1"
"#,
        )
        .unwrap();
        let config = load_policy_config(None, dir.path()).unwrap();
        assert_eq!(config.threshold, 60);
        assert!(!config.allowed_roots.contains(&PathBuf::from("/")));
        assert!(!config.tools.programs.contains_key("bicep-lint"));
        assert_ne!(
            config.tools.arm_ttk.module_path,
            Some(PathBuf::from("/tmp/evil.psd1"))
        );
    }

    #[test]
    fn test_trusted_settings_replace_package_values() {
        let mut trusted = PolicyConfig::default();
        trusted.allowed_roots = vec![PathBuf::from("/srv/packages")];
        trusted.tools.enabled = vec!["arm-ttk".to_string()];
        trusted
            .tools
            .programs
            .insert("arm-ttk".to_string(), "/usr/bin/pwsh".to_string());

        let mut package = PolicyConfig::default();
        package.threshold = 90;
        package.allowed_roots = vec![PathBuf::from("/")];
        package.tools.enabled = vec!["bicep-lint".to_string()];
        package
            .tools
            .programs
            .insert("bicep-lint".to_string(), "/pkg/evil".to_string());

        let merged = package.with_trusted_settings(&trusted, Path::new("/pkg/armvet.toml"));
        assert_eq!(merged.threshold, 90);
        assert_eq!(merged.allowed_roots, trusted.allowed_roots);
        assert_eq!(merged.tools.enabled, trusted.tools.enabled);
        assert_eq!(merged.tools.programs, trusted.tools.programs);
    }

    #[test]
    fn test_relative_program_override_rejected() {
        let err = PolicyConfig::from_toml_str(
            "[tools.programs]\nbicep-lint = \"./evil\"\n",
            Path::new("armvet.toml"),
            Path::new("/pkg"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = PolicyConfig::from_toml_str(
            "[tools.programs]\nbicep-lint = \"/opt/bicep/bicep\"\n",
            Path::new("armvet.toml"),
            Path::new("/pkg"),
        )
        .unwrap();
        assert_eq!(config.tools.programs["bicep-lint"], "/opt/bicep/bicep");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempdir().unwrap();
        let err = load_policy_config(Some(&dir.path().join("nope.toml")), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_example_config_parses() {
        let config =
            PolicyConfig::from_toml_str(EXAMPLE_CONFIG, Path::new("armvet.toml"), Path::new("/pkg"))
                .unwrap();
        assert_eq!(config, PolicyConfig::default());
    }
}
