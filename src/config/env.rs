//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "RUNBOARD";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Target directory from RUNBOARD_TARGET_DIR
    pub target_directory: Option<String>,
    /// Worker count from RUNBOARD_WORKERS
    pub max_workers: Option<usize>,
    /// Empty suite handling from RUNBOARD_EMPTY_SUITE_ERROR
    pub empty_suite_error: Option<bool>,
    /// Watch mode from RUNBOARD_WATCH
    pub watch: Option<bool>,
    /// Per-file timeout from RUNBOARD_TIMEOUT
    pub file_timeout_secs: Option<u64>,
    /// Log level from RUNBOARD_LOG
    pub log_level: Option<String>,
    /// Config file from RUNBOARD_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            target_directory: get_env("TARGET_DIR"),
            max_workers: get_env_parse("WORKERS"),
            empty_suite_error: get_env_bool("EMPTY_SUITE_ERROR"),
            watch: get_env_bool("WATCH"),
            file_timeout_secs: get_env_parse("TIMEOUT"),
            log_level: get_env("LOG"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.target_directory.is_some()
            || self.max_workers.is_some()
            || self.empty_suite_error.is_some()
            || self.watch.is_some()
            || self.file_timeout_secs.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_TARGET_DIR:        {:?}", ENV_PREFIX, self.target_directory);
        println!("  {}_WORKERS:           {:?}", ENV_PREFIX, self.max_workers);
        println!("  {}_EMPTY_SUITE_ERROR: {:?}", ENV_PREFIX, self.empty_suite_error);
        println!("  {}_WATCH:             {:?}", ENV_PREFIX, self.watch);
        println!("  {}_TIMEOUT:           {:?}", ENV_PREFIX, self.file_timeout_secs);
        println!("  {}_LOG:               {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_CONFIG:            {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
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

/// Print all RUNBOARD environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TARGET_DIR         Directory to discover test files in");
    println!("  {ENV_PREFIX}_WORKERS            Number of parallel workers");
    println!("  {ENV_PREFIX}_EMPTY_SUITE_ERROR  Fail suites without tests (true/false)");
    println!("  {ENV_PREFIX}_WATCH              Re-run changed files (true/false)");
    println!("  {ENV_PREFIX}_TIMEOUT            Per-file timeout in seconds");
    println!("  {ENV_PREFIX}_LOG                Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WORKERS=4");
    println!("  runboard run");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the lifetime of the guard
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
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
        assert!(config.max_workers.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_load() {
        let _guard = EnvGuard::set(&[("WORKERS", "6"), ("WATCH", "yes"), ("TIMEOUT", "not-a-number")]);

        let config = EnvConfig::load();
        assert_eq!(config.max_workers, Some(6));
        assert_eq!(config.watch, Some(true));
        assert_eq!(config.file_timeout_secs, None);
        assert!(config.has_any());
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = EnvGuard::set(&[("EMPTY_SUITE_ERROR", "off")]);
        assert_eq!(EnvConfig::load().empty_suite_error, Some(false));
    }
}
