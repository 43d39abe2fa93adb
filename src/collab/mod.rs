//! Collaborator contracts
//!
//! The core never builds test files, reads sources or watches the disk by
//! itself. It talks to these traits instead; `crate::workspace` has the
//! implementations the binary uses.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

use crate::engine::{RunOptions, TestModule};

/// Failure of the build step for one file
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build {}: {}", .path.display(), .message)]
    Invalid { path: PathBuf, message: String },
}

/// A file turned into something the engine can execute
pub struct BuiltModule {
    pub module: TestModule,
    /// Every module path loaded while building
    pub modules: Vec<PathBuf>,
    /// Build time in milliseconds
    pub duration: f64,
}

/// Turns a test file into an executable module
#[async_trait]
pub trait ModuleBuilder: Send + Sync {
    async fn build(&self, entry: &Path, options: &RunOptions) -> Result<BuiltModule, BuildError>;
}

/// Current text of project files
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Resolves once the file's content is available
    async fn wait_for_content(&self, relative_path: &str) -> anyhow::Result<String>;
}

/// Knows which files changed and decides what to do about it
#[async_trait]
pub trait ChangeWatcher: Send + Sync {
    /// Relative paths of test files modified after `since`
    async fn changed_since(&self, since: SystemTime) -> Vec<String>;

    /// Called at the end of a run in watch mode when files changed meanwhile
    async fn schedule_follow_up(&self, run_id: &str, changed: Vec<String>);
}
