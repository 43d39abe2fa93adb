//! Source content for error snippets

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use crate::collab::ContentLoader;

/// Reads files from disk, waiting a bounded time for ones still being written
#[derive(Clone, Debug)]
pub struct DiskContentLoader {
    root: PathBuf,
    attempts: u32,
    interval: Duration,
}

impl DiskContentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            attempts: 20,
            interval: Duration::from_millis(50),
        }
    }

    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.interval = interval;
        self
    }
}

#[async_trait]
impl ContentLoader for DiskContentLoader {
    async fn wait_for_content(&self, relative_path: &str) -> Result<String> {
        let path = self.root.join(relative_path);

        for _ in 0..self.attempts {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => return Ok(content),
                Err(e) if e.kind() == ErrorKind::NotFound => tokio::time::sleep(self.interval).await,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", path.display()))
                }
            }
        }

        bail!("{} is not available", path.display())
    }
}
