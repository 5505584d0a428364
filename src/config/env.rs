//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "PARATEST";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// RPC endpoint from PARATEST_RPC_URL
    pub rpc_url: Option<String>,
    /// Network from PARATEST_NETWORK
    pub network: Option<String>,
    /// Per-test timeout from PARATEST_TIMEOUT_MS
    pub timeout_ms: Option<u64>,
    /// Suite directory from PARATEST_TESTS_DIR
    pub tests_dir: Option<String>,
    /// Output format from PARATEST_FORMAT
    pub format: Option<String>,
    /// Log level from PARATEST_LOG
    pub log_level: Option<String>,
    /// Config file from PARATEST_CONFIG
    pub config_file: Option<String>,
    /// Disable colors from PARATEST_NO_COLOR
    pub no_color: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            rpc_url: get_env("RPC_URL"),
            network: get_env("NETWORK"),
            timeout_ms: get_env_parse("TIMEOUT_MS"),
            tests_dir: get_env("TESTS_DIR"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
            config_file: get_env("CONFIG"),
            no_color: get_env_bool("NO_COLOR"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.rpc_url.is_some()
            || self.network.is_some()
            || self.timeout_ms.is_some()
            || self.tests_dir.is_some()
            || self.format.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
            || self.no_color.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_RPC_URL:    {:?}", ENV_PREFIX, self.rpc_url);
        println!("  {}_NETWORK:    {:?}", ENV_PREFIX, self.network);
        println!("  {}_TIMEOUT_MS: {:?}", ENV_PREFIX, self.timeout_ms);
        println!("  {}_TESTS_DIR:  {:?}", ENV_PREFIX, self.tests_dir);
        println!("  {}_FORMAT:     {:?}", ENV_PREFIX, self.format);
        println!("  {}_LOG:        {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_CONFIG:     {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_NO_COLOR:   {:?}", ENV_PREFIX, self.no_color);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all PARATEST environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_RPC_URL      JSON-RPC endpoint (\"memory\" for the in-memory chain)");
    println!("  {ENV_PREFIX}_NETWORK      Network name from the config file");
    println!("  {ENV_PREFIX}_TIMEOUT_MS   Default per-test timeout in milliseconds");
    println!("  {ENV_PREFIX}_TESTS_DIR    Directory searched for suite files");
    println!("  {ENV_PREFIX}_FORMAT       Output format (table, summary, json, json-pretty)");
    println!("  {ENV_PREFIX}_LOG          Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CONFIG       Path to configuration file");
    println!("  {ENV_PREFIX}_NO_COLOR     Disable colored output (true/false)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_RPC_URL=http://127.0.0.1:8545");
    println!("  paratest run --grep transfer");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the guard's lifetime, restoring previous values on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(k, v)| {
                    let key = format!("{ENV_PREFIX}_{k}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, v);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.rpc_url.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_load() {
        let _guard = EnvGuard::set(&[("RPC_URL", "http://10.0.0.1:8545"), ("TIMEOUT_MS", "2500")]);

        let config = EnvConfig::load();
        assert_eq!(config.rpc_url, Some("http://10.0.0.1:8545".to_string()));
        assert_eq!(config.timeout_ms, Some(2500));
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvGuard::set(&[("NO_COLOR", "yes")]);
        assert_eq!(EnvConfig::load().no_color, Some(true));
    }
}
