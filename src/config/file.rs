//! Config file discovery and loading
//!
//! A project config is looked up from the working directory upwards, the
//! user config under `~/.config/runboard` is the fallback.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::RunnerConfig;

/// Names a project config file may have, checked in this order per directory
const PROJECT_FILE_NAMES: &[&str] = &["runboard.yaml", "runboard.yml", ".runboard.yaml", "runboard.json"];

const USER_CONFIG: &str = "~/.config/runboard/config.yaml";

const CURRENT_VERSION: &str = "1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// On-disk shape of a config file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "current_version")]
    pub version: String,

    #[serde(default)]
    pub runner: RunnerConfig,
}

fn current_version() -> String {
    CURRENT_VERSION.to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: current_version(),
            runner: RunnerConfig::default(),
        }
    }
}

impl ConfigFile {
    /// First project config in the working directory or its ancestors,
    /// else the user config if present
    pub fn find() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        Self::find_from(&cwd)
    }

    fn find_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .flat_map(|dir| PROJECT_FILE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
            .or_else(|| home_path(USER_CONFIG).filter(|path| path.is_file()))
    }

    /// Load `path` when given, else whatever `find` turns up, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::find) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a config file.
    ///
    /// A relative `target_directory` is taken relative to the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;

        let mut config: Self = match Format::of(path) {
            Format::Yaml => serde_yaml::from_str(&text)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?,
            Format::Json => serde_json::from_str(&text)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?,
        };
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        if config.runner.target_directory.is_relative() {
            if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.runner.target_directory = dir.join(&config.runner.target_directory);
            }
        }
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = match Format::of(path) {
            Format::Yaml => serde_yaml::to_string(self)?,
            Format::Json => serde_json::to_string_pretty(self)?,
        };

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        std::fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CURRENT_VERSION {
            anyhow::bail!(
                "Config version {} is not supported (expected {})",
                self.version,
                CURRENT_VERSION
            );
        }
        self.runner.validate()
    }
}

/// Resolve a `~/` path against the home directory
fn home_path(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}
