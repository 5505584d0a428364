//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{AppConfig, SignerConfig};
use crate::signer::SignerKind;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./paratest.yaml",
    "./paratest.yml",
    "./.paratest.yaml",
    "~/.config/paratest/config.yaml",
];

/// Full configuration file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Application settings
    #[serde(default)]
    pub app: AppConfig,

    /// Named networks selectable with `--network`
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            networks: Vec::new(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        for location in CONFIG_LOCATIONS {
            let path = expand_path(location);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        if let Some(path) = Self::find() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        self.app.validate().context("Invalid app settings")?;

        let mut names = HashSet::new();
        for network in &self.networks {
            if !names.insert(network.name.as_str()) {
                anyhow::bail!("Duplicate network name: {}", network.name);
            }
            if network.rpc_url.trim().is_empty() {
                anyhow::bail!("Network '{}' has no rpc_url", network.name);
            }
            if network.timeout_ms == Some(0) {
                anyhow::bail!("Network '{}' has a zero timeout_ms", network.name);
            }
            validate_signers(&network.name, &network.signers)?;
        }

        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let local_signers = vec![
            SignerConfig::new("0x00000000000000000000000000000000000000a1", SignerKind::Evm)
                .with_private_key("0x01"),
            SignerConfig::new("0x00000000000000000000000000000000000000a2", SignerKind::Evm)
                .with_private_key("0x02"),
            SignerConfig::new("0x00000000000000000000000000000000000000a3", SignerKind::Evm)
                .with_private_key("0x03"),
            SignerConfig::new("zil1localnative0000000000000000000000000", SignerKind::Native)
                .with_private_key("0x04"),
        ];

        Self {
            version: "1.0".to_string(),
            app: AppConfig {
                signers: local_signers,
                ..AppConfig::default()
            },
            networks: vec![
                NetworkConfig::new("local", "http://127.0.0.1:8545"),
                NetworkConfig::new("testnet", "https://rpc.testnet.example.com")
                    .with_timeout_ms(120_000),
            ],
        }
    }

    /// Get network by name
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// App settings with the named network applied on top
    pub fn resolve(&self, network: Option<&str>) -> Result<AppConfig> {
        let mut app = self.app.clone();
        if let Some(name) = network {
            let network = self
                .network(name)
                .with_context(|| format!("Unknown network: {name}"))?;
            network.apply(&mut app);
        }
        Ok(app)
    }
}

pub(super) fn validate_signers(scope: &str, signers: &[SignerConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for signer in signers {
        if !signer.kind.is_valid_address(&signer.address) {
            anyhow::bail!(
                "Invalid {} signer address in '{}': {}",
                signer.kind,
                scope,
                signer.address
            );
        }
        if !seen.insert(signer.address.to_lowercase()) {
            anyhow::bail!("Duplicate signer in '{}': {}", scope, signer.address);
        }
    }
    Ok(())
}

/// A named chain endpoint, like a Hardhat network entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,

    /// Replaces the app signers when non-empty
    #[serde(default)]
    pub signers: Vec<SignerConfig>,

    /// Overrides the per-test timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rpc_url: rpc_url.into(),
            signers: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    fn apply(&self, app: &mut AppConfig) {
        app.rpc_url = self.rpc_url.clone();
        if !self.signers.is_empty() {
            app.signers = self.signers.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            app.test_timeout_ms = timeout;
        }
    }
}

/// Expand ~ to home directory
pub(crate) fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub(crate) fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_default() {
        let config = ConfigFile::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_example() {
        let config = ConfigFile::example();
        assert_eq!(config.app.signers.len(), 4);
        assert!(config.network("testnet").is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("paratest.yaml");

        let config = ConfigFile::example();
        config.save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.version, config.version);
        assert_eq!(loaded.networks.len(), 2);
        assert_eq!(loaded.app.signers[3].kind, SignerKind::Native);
    }

    #[test]
    fn test_resolve_network() {
        let signer = SignerConfig::new("0x00000000000000000000000000000000000000b1", SignerKind::Evm);
        let mut config = ConfigFile::example();
        config.networks[1].signers = vec![signer];

        let app = config.resolve(Some("testnet")).unwrap();
        assert_eq!(app.rpc_url, "https://rpc.testnet.example.com");
        assert_eq!(app.test_timeout_ms, 120_000);
        assert_eq!(app.signers.len(), 1);

        let local = config.resolve(Some("local")).unwrap();
        assert_eq!(local.signers.len(), 4);

        assert!(config.resolve(Some("mainnet")).is_err());
        assert!(config.resolve(None).unwrap().is_memory());
    }

    #[test]
    fn test_validate_rejects_bad_signers() {
        let mut config = ConfigFile::default();
        config.app.signers.push(SignerConfig::new("0x1234", SignerKind::Evm));
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        let signer = SignerConfig::new("0x00000000000000000000000000000000000000A1", SignerKind::Evm);
        config.app.signers = vec![signer.clone(), signer];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_networks() {
        let mut config = ConfigFile::default();
        config.networks = vec![
            NetworkConfig::new("local", "http://a"),
            NetworkConfig::new("local", "http://b"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = ConfigFile::default();
        config.app.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::default();
        config.app.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::example();
        config.networks[0].timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_saved_file_keeps_private_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paratest.yaml");
        ConfigFile::example().save(&path).unwrap();

        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.app.signers[0].private_key.expose(), "0x01");
        assert_eq!(loaded.app.signers[3].private_key.expose(), "0x04");
    }

    #[test]
    fn test_expand_path() {
        let path = expand_path("./test.yaml");
        assert_eq!(path, PathBuf::from("./test.yaml"));
    }
}
