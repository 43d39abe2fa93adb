//! Modification-time based change watcher

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::discovery::{scan_modified, FileMatcher};
use crate::collab::ChangeWatcher;
use crate::utils::relative_path;

/// Files that changed while a run was executing
#[derive(Clone, Debug, PartialEq)]
pub struct FollowUp {
    pub after_run: String,
    pub files: Vec<String>,
}

/// Polls file mtimes under the target directory
pub struct PollingWatcher {
    root: PathBuf,
    matcher: FileMatcher,
    follow_ups: mpsc::UnboundedSender<FollowUp>,
}

impl PollingWatcher {
    /// The receiver gets one `FollowUp` per run that saw changes
    pub fn new(root: impl Into<PathBuf>, matcher: FileMatcher) -> (Self, mpsc::UnboundedReceiver<FollowUp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            root: root.into(),
            matcher,
            follow_ups: tx,
        };
        (watcher, rx)
    }

    fn modified_since(&self, since: SystemTime) -> Vec<String> {
        let scanned = match scan_modified(&self.root, &self.matcher) {
            Ok(scanned) => scanned,
            Err(e) => {
                warn!("Could not scan {}: {:#}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut changed: Vec<String> = scanned
            .into_iter()
            .filter(|(_, modified)| *modified > since)
            .map(|(path, _)| relative_path(&self.root, &path))
            .collect();
        changed.sort();
        changed
    }
}

#[async_trait]
impl ChangeWatcher for PollingWatcher {
    async fn changed_since(&self, since: SystemTime) -> Vec<String> {
        self.modified_since(since)
    }

    async fn schedule_follow_up(&self, run_id: &str, changed: Vec<String>) {
        debug!("Scheduling follow-up run for {} changed files", changed.len());
        let follow_up = FollowUp {
            after_run: run_id.to_string(),
            files: changed,
        };
        if self.follow_ups.send(follow_up).is_err() {
            debug!("Nobody is waiting for follow-up runs");
        }
    }
}
