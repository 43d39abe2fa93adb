//! Configuration module
//!
//! Runner settings come from defaults, then a config file, then `RUNBOARD_*`
//! environment variables, then command line flags.

pub mod env;
pub mod file;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{CoverageOptions, RunOptions};
use crate::executor::default_capacity;
use crate::utils::logger::LogLevel;
use crate::workspace::FileMatcher;

pub use env::EnvConfig;
pub use file::ConfigFile;

/// Runner configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory test files are discovered in and reported relative to
    pub target_directory: PathBuf,

    /// File name suffixes that mark test files
    #[serde(rename = "match")]
    pub match_suffixes: Vec<String>,

    /// Directory or file names skipped during discovery
    pub ignored: Vec<String>,

    /// Worker count, defaults to available parallelism
    pub max_workers: Option<usize>,

    /// Treat suites without tests as errors
    pub empty_suite_error: bool,

    /// Keep running and re-run changed files
    pub watch: bool,

    /// Abort a file that runs longer than this
    pub file_timeout_secs: Option<u64>,

    /// Extra names excluded from the executed module list. Test files and
    /// `ignored` entries are always excluded.
    pub coverage_ignored: Vec<String>,

    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            target_directory: PathBuf::from("."),
            match_suffixes: vec![".suite.yaml".to_string(), ".suite.yml".to_string()],
            ignored: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
            ],
            max_workers: None,
            empty_suite_error: false,
            watch: false,
            file_timeout_secs: None,
            coverage_ignored: vec!["node_modules".to_string()],
            log_level: "info".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            anyhow::bail!("max_workers must be at least 1");
        }
        if self.file_timeout_secs == Some(0) {
            anyhow::bail!("file_timeout_secs must be at least 1");
        }
        if self.match_suffixes.is_empty() {
            anyhow::bail!("match needs at least one file suffix");
        }
        self.log_level
            .parse::<LogLevel>()
            .map_err(anyhow::Error::msg)?;
        Ok(())
    }

    /// Override fields that are set in the environment
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(dir) = &env.target_directory {
            self.target_directory = PathBuf::from(dir);
        }
        if let Some(workers) = env.max_workers {
            self.max_workers = Some(workers);
        }
        if let Some(empty_suite_error) = env.empty_suite_error {
            self.empty_suite_error = empty_suite_error;
        }
        if let Some(watch) = env.watch {
            self.watch = watch;
        }
        if let Some(timeout) = env.file_timeout_secs {
            self.file_timeout_secs = Some(timeout);
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_capacity)
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Info)
    }

    pub fn file_matcher(&self) -> FileMatcher {
        FileMatcher::new(self.match_suffixes.clone(), self.ignored.clone())
    }

    /// Options every worker executes files with
    pub fn run_options(&self) -> RunOptions {
        let mut ignored: Vec<String> = Vec::new();
        for pattern in self
            .match_suffixes
            .iter()
            .chain(&self.ignored)
            .chain(&self.coverage_ignored)
        {
            if !ignored.contains(pattern) {
                ignored.push(pattern.clone());
            }
        }

        RunOptions {
            target_directory: self.target_directory.clone(),
            coverage: CoverageOptions {
                root: self.target_directory.clone(),
                ignored,
            },
            empty_suite_error: self.empty_suite_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.target_directory, PathBuf::from("."));
        assert!(config.validate().is_ok());
        assert!(config.workers() >= 1);
        assert_eq!(config.file_timeout(), None);
    }

    #[test]
    fn test_validate() {
        let config = RunnerConfig {
            max_workers: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RunnerConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env() {
        let mut config = RunnerConfig::default();
        config.apply_env(&EnvConfig {
            max_workers: Some(3),
            watch: Some(true),
            ..Default::default()
        });
        assert_eq!(config.workers(), 3);
        assert!(config.watch);
        assert!(!config.empty_suite_error);
    }

    #[test]
    fn test_run_options() {
        let config = RunnerConfig {
            target_directory: PathBuf::from("/work"),
            empty_suite_error: true,
            ..Default::default()
        };
        let options = config.run_options();
        assert_eq!(options.coverage.root, PathBuf::from("/work"));
        assert!(options.empty_suite_error);
        assert_eq!(
            options.coverage.ignored,
            vec![".suite.yaml", ".suite.yml", ".git", "node_modules", "target"]
        );
    }

    #[test]
    fn test_run_options_exclude_test_files_from_modules() {
        let config = RunnerConfig {
            target_directory: PathBuf::from("/work"),
            ..Default::default()
        };
        let coverage = config.run_options().coverage;
        assert!(!coverage.includes(Path::new("/work/math.suite.yaml")));
        assert!(!coverage.includes(Path::new("/work/node_modules/lib.sh")));
        assert!(coverage.includes(Path::new("/work/lib/helpers.sh")));
        assert!(coverage.includes(Path::new("/work/targets.sh")));
    }

    #[test]
    fn test_match_key() {
        let config: RunnerConfig = serde_yaml::from_str("match: ['.check.yaml']\nmax_workers: 2\n").unwrap();
        assert_eq!(config.match_suffixes, vec![".check.yaml".to_string()]);
        assert_eq!(config.max_workers, Some(2));
        assert!(!config.watch);
    }
}
