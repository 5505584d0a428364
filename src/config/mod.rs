//! Configuration module
//!
//! Handles loading and managing configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::as_integer;
use crate::output::OutputFormat;
use crate::signer::{PrivateKey, Signer, SignerKind};
use crate::utils::LogLevel;

/// `rpc_url` value selecting the in-memory chain
pub const MEMORY_RPC: &str = "memory";

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON-RPC endpoint, or "memory" for a local in-memory chain
    pub rpc_url: String,

    /// Directory searched for suite files
    pub tests_dir: PathBuf,

    /// Default per-test time budget
    pub test_timeout_ms: u64,

    /// Time allowed for a transaction to be mined
    pub confirmation_timeout_ms: u64,

    /// Receipt polling interval
    pub poll_interval_ms: u64,

    /// HTTP timeout of a single RPC request
    pub request_timeout_ms: u64,

    /// Balance given to every signer on the in-memory chain (decimal or hex)
    pub initial_balance: String,

    /// Funded accounts available to scenarios
    pub signers: Vec<SignerConfig>,

    /// Simulated round-trip time of the in-memory chain
    pub memory_latency_ms: u64,

    /// Empty-block interval of the in-memory chain
    pub memory_block_time_ms: Option<u64>,

    pub log_level: String,

    /// Default report format
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: MEMORY_RPC.to_string(),
            tests_dir: PathBuf::from("tests/parallel"),
            test_timeout_ms: 60_000,
            confirmation_timeout_ms: 30_000,
            poll_interval_ms: 500,
            request_timeout_ms: 10_000,
            initial_balance: "1000000000000000000000".to_string(),
            signers: Vec::new(),
            memory_latency_ms: 0,
            memory_block_time_ms: None,
            log_level: "info".to_string(),
            format: "table".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject settings a run cannot work with
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("test_timeout_ms", self.test_timeout_ms),
            ("confirmation_timeout_ms", self.confirmation_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }
        if self.memory_block_time_ms == Some(0) {
            anyhow::bail!("memory_block_time_ms must be greater than zero");
        }

        if OutputFormat::from_str(&self.format).is_none() {
            anyhow::bail!("Unknown output format: {}", self.format);
        }
        if LogLevel::from_str(&self.log_level).is_none() {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }
        self.initial_balance().context("Invalid initial_balance")?;
        file::validate_signers("app", &self.signers)
    }

    /// Copy safe to print: private keys are masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for signer in &mut config.signers {
            signer.private_key = signer.private_key.redacted();
        }
        config
    }

    pub fn is_memory(&self) -> bool {
        self.rpc_url.eq_ignore_ascii_case(MEMORY_RPC)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn memory_latency(&self) -> Duration {
        Duration::from_millis(self.memory_latency_ms)
    }

    pub fn memory_block_time(&self) -> Option<Duration> {
        self.memory_block_time_ms.map(Duration::from_millis)
    }

    pub fn initial_balance(&self) -> Result<u128> {
        as_integer(&serde_json::Value::String(self.initial_balance.clone()))
            .with_context(|| format!("Invalid initial balance: {}", self.initial_balance))
    }

    /// Signers and their keys, paired by position
    pub fn pool_parts(&self) -> (Vec<Signer>, Vec<PrivateKey>) {
        self.signers
            .iter()
            .map(|s| {
                (
                    Signer::new(&s.address, s.kind),
                    s.private_key.clone(),
                )
            })
            .unzip()
    }

    /// Apply `PARATEST_*` overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(url) = &env.rpc_url {
            self.rpc_url = url.clone();
        }
        if let Some(timeout) = env.timeout_ms {
            self.test_timeout_ms = timeout;
        }
        if let Some(dir) = &env.tests_dir {
            self.tests_dir = PathBuf::from(dir);
        }
        if let Some(format) = &env.format {
            self.format = format.clone();
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
    }
}

/// A funded account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignerConfig {
    pub address: String,

    #[serde(default = "default_kind")]
    pub kind: SignerKind,

    /// Hex private key; masked by `AppConfig::redacted`
    #[serde(default)]
    pub private_key: PrivateKey,
}

fn default_kind() -> SignerKind {
    SignerKind::Evm
}

impl SignerConfig {
    pub fn new(address: impl Into<String>, kind: SignerKind) -> Self {
        Self {
            address: address.into(),
            kind,
            private_key: PrivateKey::default(),
        }
    }

    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = PrivateKey::new(key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.is_memory());
        assert_eq!(config.test_timeout(), Duration::from_secs(60));
        assert_eq!(config.initial_balance().unwrap(), 1_000_000_000_000_000_000_000);
        assert!(config.memory_latency().is_zero());
        assert!(config.memory_block_time().is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "rpc_url: http://localhost:8545\nsigners:\n  - address: zil1abc\n    kind: native\n",
        )
        .unwrap();
        assert!(!config.is_memory());
        assert_eq!(config.confirmation_timeout_ms, 30_000);
        assert_eq!(config.signers[0].kind, SignerKind::Native);
    }

    #[test]
    fn test_pool_parts_pair_keys() {
        let mut config = AppConfig::default();
        config.signers = vec![
            SignerConfig::new("0x00000000000000000000000000000000000000a1", SignerKind::Evm)
                .with_private_key("0xaa"),
            SignerConfig::new("zil1xyz", SignerKind::Native).with_private_key("0xbb"),
        ];
        let (signers, keys) = config.pool_parts();
        assert_eq!(signers.len(), 2);
        assert_eq!(keys[1].expose(), "0xbb");
        assert_eq!(signers[1].kind, SignerKind::Native);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            rpc_url: Some("http://node:8545".into()),
            timeout_ms: Some(5_000),
            ..Default::default()
        };
        config.apply_env(&env);
        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.test_timeout_ms, 5_000);
        assert_eq!(config.format, "table");
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        assert!(AppConfig::default().validate().is_ok());

        for field in ["test", "poll", "request"] {
            let mut config = AppConfig::default();
            match field {
                "test" => config.test_timeout_ms = 0,
                "poll" => config.poll_interval_ms = 0,
                _ => config.request_timeout_ms = 0,
            }
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("greater than zero"), "{field}: {err}");
        }

        let mut config = AppConfig::default();
        config.memory_block_time_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_config_hides_keys() {
        let config = ConfigFile::example().resolve(None).unwrap();
        let shown = serde_yaml::to_string(&config.redacted()).unwrap();

        for key in ["0x01", "0x02", "0x03", "0x04"] {
            assert!(!shown.contains(key), "{key} leaked:\n{shown}");
        }
        let masked = shown
            .lines()
            .filter(|l| l.contains("private_key") && l.contains("***"))
            .count();
        assert_eq!(masked, 4);
        assert!(shown.contains("0x00000000000000000000000000000000000000a1"));

        // The original still carries the keys the pool needs
        let (_, keys) = config.pool_parts();
        assert_eq!(keys[0].expose(), "0x01");
    }

    #[test]
    fn test_private_key_loads_from_yaml() {
        let config: AppConfig = serde_yaml::from_str(
            "signers:\n  - address: '0x00000000000000000000000000000000000000a1'\n    private_key: '0xfeed'\n  - address: zil1abc\n    kind: native\n",
        )
        .unwrap();
        assert_eq!(config.signers[0].private_key.expose(), "0xfeed");
        assert!(config.signers[1].private_key.is_empty());
        assert!(!format!("{:?}", config).contains("0xfeed"));
    }
}
