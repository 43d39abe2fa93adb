//! Run coordination
//!
//! The coordinator owns the run store. It dispatches every file of a run to
//! the worker pool, funnels all relayed events into a single consumption loop
//! that mutates the store, and publishes a notification after each visible
//! change.

pub mod naming;
pub mod notify;
pub mod position;
pub mod store;

use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::collab::{ChangeWatcher, ContentLoader};
use crate::executor::{get_stats, DispatchError, DispatchResult, FileJob, WorkerPool};
use crate::models::{
    slugify, ErrorInfo, Run, RunTestFile, Status, Test, TestError, TestFile, TestSuite,
};
use crate::protocol::{MatcherResult, WorkerEvent};
use crate::utils::Timer;

pub use notify::{Change, NotificationKind, Notifier, RunNotification};
pub use store::{
    RunPatch, RunStore, RunTestFilePatch, StoreError, SuitePatch, TestFilePatch, TestPatch,
    LAST_RUN,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("{0}")]
    InvalidState(String),
}

/// Everything the consumption loop receives, tagged with the run file it belongs to
enum Inbound {
    Event { file_id: String, event: WorkerEvent },
    Finished { file_id: String, result: DispatchResult },
}

struct Dispatch {
    file_id: String,
    entry: Result<PathBuf, String>,
}

struct Inner {
    store: RwLock<RunStore>,
    notifier: Notifier,
    pool: WorkerPool,
    content: Arc<dyn ContentLoader>,
    watcher: Option<Arc<dyn ChangeWatcher>>,
}

/// Handle to the run coordinator; clones share the same state
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// With a watcher the coordinator runs in watch mode
    pub fn new(
        pool: WorkerPool,
        content: Arc<dyn ContentLoader>,
        watcher: Option<Arc<dyn ChangeWatcher>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(RunStore::new()),
                notifier: Notifier::new(),
                pool,
                content,
                watcher,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.inner.notifier.subscribe()
    }

    pub async fn register_test_files(&self, files: Vec<TestFile>) {
        debug!("Registering {} test files", files.len());
        self.inner.store.write().await.register_test_files(files);
    }

    pub async fn test_files(&self) -> Vec<TestFile> {
        self.inner.store.read().await.test_files().to_vec()
    }

    /// Snapshot the selected test files (all of them for `None`) into a new run.
    /// Unknown ids are ignored.
    pub async fn create_run(&self, selection: Option<&[String]>) -> Run {
        let mut store = self.inner.store.write().await;

        let mut id = naming::generate_run_id();
        while store.run(&id).is_some() {
            id = naming::generate_run_id();
        }

        let run_test_files = store
            .test_files()
            .iter()
            .filter(|f| selection.map_or(true, |ids| ids.contains(&f.id)))
            .enumerate()
            .map(|(index, f)| RunTestFile {
                id: format!("{id}_f{index}"),
                slug: slugify(&f.relative_path),
                run_id: id.clone(),
                test_file_id: f.id.clone(),
                status: Status::InProgress,
                duration: None,
                build_duration: None,
                error: None,
            })
            .collect();

        let run = Run {
            id,
            title: naming::generate_title(),
            emoji: naming::random_emoji(),
            progress: 0.0,
            status: Status::InProgress,
            duration: None,
            created_at: Utc::now(),
            run_test_files,
        };

        store.insert_run(run.clone());
        info!(
            "Created run {} {} with {} files",
            run.emoji,
            run.title,
            run.run_test_files.len()
        );
        self.inner
            .notifier
            .publish(NotificationKind::Added, run.clone(), Change::Run);
        run
    }

    /// Look a run up by id or `last-run`
    pub async fn get_run(&self, id: &str) -> Result<Run, CoordinatorError> {
        self.inner
            .store
            .read()
            .await
            .run(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::RunNotFound(id.to_string()))
    }

    pub async fn runs(&self) -> Vec<Run> {
        self.inner.store.read().await.runs().to_vec()
    }

    pub async fn last_run(&self) -> Option<Run> {
        self.inner.store.read().await.last_run().cloned()
    }

    pub async fn suites_for_run(&self, id: &str) -> Vec<TestSuite> {
        let store = self.inner.store.read().await;
        match store.run(id) {
            Some(run) => store.suites_for_run(&run.id).to_vec(),
            None => Vec::new(),
        }
    }

    /// True while the most recently created run is in progress
    pub async fn is_running(&self) -> bool {
        self.inner
            .store
            .read()
            .await
            .last_run()
            .is_some_and(|r| r.status == Status::InProgress)
    }

    /// Remove a finished run and its suites
    pub async fn clear_run(&self, id: &str) -> Result<Run, CoordinatorError> {
        let mut store = self.inner.store.write().await;
        let run = store
            .run(id)
            .ok_or_else(|| CoordinatorError::RunNotFound(id.to_string()))?;
        if run.status == Status::InProgress {
            return Err(CoordinatorError::InvalidState(format!(
                "Run {} is in progress and can't be cleared",
                run.id
            )));
        }

        let run_id = run.id.clone();
        let removed = store
            .remove_run(&run_id)
            .ok_or(CoordinatorError::RunNotFound(run_id))?;
        info!("Cleared run {}", removed.title);
        self.inner
            .notifier
            .publish(NotificationKind::Removed, removed.clone(), Change::Run);
        Ok(removed)
    }

    /// Drop every run and suite, running or not
    pub async fn clear_runs(&self) {
        self.inner.store.write().await.clear_runs();
        info!("Cleared all runs");
    }

    /// Stop the worker pool and wait for its workers to exit
    pub async fn close(&self) {
        self.inner.pool.shutdown().await;
    }

    /// Execute every file of a run and wait until the run is finished.
    ///
    /// Per-file failures end up on the file records. The caller gets an error
    /// only for an unknown run id or a run that was started before.
    pub async fn start_run(&self, id: &str) -> Result<Run, CoordinatorError> {
        let (run, jobs) = self.mark_started(id).await?;
        let run_id = run.id.clone();
        let total = run.run_test_files.len();
        let started_at = SystemTime::now();
        let timer = Timer::start(format!("run {}", run.title));
        info!("Starting run {} {} ({} files)", run.emoji, run.title, total);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut relays = JoinSet::new();
        for job in jobs {
            self.dispatch(job, tx.clone(), &mut relays);
        }
        drop(tx);

        let (_, relay_failures) = tokio::join!(
            self.consume(&run_id, total, rx),
            join_relays(&mut relays)
        );
        let failed = relay_failures > 0;
        if failed {
            error!("{} file relays failed in run {}", relay_failures, run.title);
        }

        let duration = timer.stop();
        self.finish_run(&run_id, total, duration, failed).await;

        if !failed {
            if let Some(watcher) = &self.inner.watcher {
                let changed = watcher.changed_since(started_at).await;
                if !changed.is_empty() {
                    info!("{} files changed during run {}", changed.len(), run.title);
                    watcher.schedule_follow_up(&run_id, changed).await;
                }
            }
        }

        self.get_run(&run_id).await
    }

    /// Claim a fresh run and move its files to `in_progress`
    async fn mark_started(&self, id: &str) -> Result<(Run, Vec<Dispatch>), CoordinatorError> {
        let mut store = self.inner.store.write().await;
        let run = store
            .run(id)
            .cloned()
            .ok_or_else(|| CoordinatorError::RunNotFound(id.to_string()))?;
        if run.status != Status::InProgress || !store.claim_run(&run.id) {
            return Err(CoordinatorError::InvalidState(format!(
                "Run {} was already started",
                run.id
            )));
        }

        let mut jobs = Vec::with_capacity(run.run_test_files.len());

        for file in &run.run_test_files {
            let entry = store
                .update_test_file(&file.test_file_id, TestFilePatch::status(Status::InProgress))
                .map(|f| f.absolute_path)
                .map_err(|e| e.to_string());
            if let Err(e) =
                store.update_run_test_file(&run.id, &file.id, RunTestFilePatch::status(Status::InProgress))
            {
                warn!("{}", e);
            }
            jobs.push(Dispatch {
                file_id: file.id.clone(),
                entry,
            });
        }

        self.publish(&store, &run.id, Change::Run);
        Ok((run, jobs))
    }

    fn dispatch(&self, job: Dispatch, tx: mpsc::UnboundedSender<Inbound>, relays: &mut JoinSet<()>) {
        let submitted = match job.entry {
            Ok(entry) => self.inner.pool.submit(FileJob::new(entry)),
            Err(e) => Err(DispatchError::SetupFailed(e)),
        };

        let file_id = job.file_id;
        match submitted {
            Ok(pending) => {
                debug!(
                    "Dispatched {} ({} of {} workers busy)",
                    file_id,
                    self.inner.pool.active(),
                    self.inner.pool.capacity()
                );
                relays.spawn(async move {
                    let events = tx.clone();
                    let relay_id = file_id.clone();
                    let result = pending
                        .drive(|event| {
                            let _ = events.send(Inbound::Event {
                                file_id: relay_id.clone(),
                                event,
                            });
                        })
                        .await;
                    let _ = tx.send(Inbound::Finished { file_id, result });
                });
            }
            Err(e) => {
                let _ = tx.send(Inbound::Finished {
                    file_id,
                    result: Err(e),
                });
            }
        }
    }

    /// The single writer loop: applies messages in arrival order
    async fn consume(&self, run_id: &str, total: usize, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        let mut completed = 0;
        while let Some(message) = rx.recv().await {
            match message {
                Inbound::Event { file_id, event } => {
                    let kind = event.kind();
                    if let Err(e) = self.apply_event(run_id, &file_id, event).await {
                        warn!("Ignoring {} event: {}", kind, e);
                    }
                }
                Inbound::Finished { file_id, result } => {
                    completed += 1;
                    let progress = completed as f64 / total.max(1) as f64;
                    if let Err(e) = self.finish_file(run_id, &file_id, result, progress).await {
                        warn!("Could not record file result: {}", e);
                    }
                }
            }
        }
    }

    async fn apply_event(&self, run_id: &str, file_id: &str, event: WorkerEvent) -> Result<(), StoreError> {
        match event {
            WorkerEvent::BuildFailed { error } => {
                debug!("Build failed for {}: {}", file_id, error.message);
            }
            WorkerEvent::BuildCompleted { file_path, duration } => {
                debug!("Built {} in {:.1}ms", file_path, duration);
                let patch = RunTestFilePatch {
                    build_duration: Some(duration),
                    ..Default::default()
                };
                let mut store = self.inner.store.write().await;
                let file = store.update_run_test_file(run_id, file_id, patch)?;
                self.publish(&store, run_id, Change::File(file));
            }
            WorkerEvent::SuiteStart { suite } => {
                let mut store = self.inner.store.write().await;
                if store.run(run_id).is_none() {
                    return Err(StoreError::RunNotFound(run_id.to_string()));
                }
                let suite = store.create_suite(TestSuite {
                    id: suite.id,
                    run_id: run_id.to_string(),
                    run_test_file_id: file_id.to_string(),
                    title: suite.title,
                    file_path: suite.file_path,
                    status: Status::InProgress,
                    duration: None,
                    tests: suite
                        .tests
                        .into_iter()
                        .map(|t| Test::pending(t.id, t.title))
                        .collect(),
                    test_errors: 0,
                    other_errors: Vec::new(),
                });
                self.publish(&store, run_id, Change::Suite(suite));
            }
            WorkerEvent::TestStart { suite_id, test_id } => {
                self.update_test(run_id, &suite_id, &test_id, TestPatch::status(Status::InProgress))
                    .await?;
            }
            WorkerEvent::TestSuccess {
                suite_id,
                test_id,
                duration,
            } => {
                let patch = TestPatch {
                    status: Some(Status::Success),
                    duration: Some(duration),
                    error: None,
                };
                self.update_test(run_id, &suite_id, &test_id, patch).await?;
            }
            WorkerEvent::TestError {
                suite_id,
                test_id,
                duration,
                error,
                stack,
                matcher_result,
            } => {
                let file_path = self
                    .inner
                    .store
                    .read()
                    .await
                    .suite(run_id, &suite_id)
                    .map(|s| s.file_path.clone())
                    .ok_or_else(|| StoreError::SuiteNotFound {
                        run_id: run_id.to_string(),
                        suite_id: suite_id.clone(),
                    })?;

                let details = self
                    .describe_failure(&file_path, error.message, stack, matcher_result)
                    .await;
                let patch = TestPatch {
                    status: Some(Status::Error),
                    duration: Some(duration),
                    error: Some(details),
                };
                self.update_test(run_id, &suite_id, &test_id, patch).await?;
            }
            WorkerEvent::SuiteCompleted {
                suite_id,
                test_errors,
                other_errors,
                duration,
            } => {
                let mut store = self.inner.store.write().await;
                let test_count = store
                    .suite(run_id, &suite_id)
                    .map(|s| s.tests.len())
                    .unwrap_or_default();
                let patch = SuitePatch {
                    status: Some(TestSuite::derive_status(
                        test_count,
                        test_errors,
                        other_errors.len(),
                    )),
                    duration: Some(duration),
                    test_errors: Some(test_errors),
                    other_errors: Some(other_errors),
                };
                let suite = store.update_suite(run_id, &suite_id, patch)?;
                self.publish(&store, run_id, Change::Suite(suite));
            }
        }
        Ok(())
    }

    async fn update_test(
        &self,
        run_id: &str,
        suite_id: &str,
        test_id: &str,
        patch: TestPatch,
    ) -> Result<(), StoreError> {
        let mut store = self.inner.store.write().await;
        let test = store.update_test(run_id, suite_id, test_id, patch)?;
        self.publish(
            &store,
            run_id,
            Change::Test {
                suite_id: suite_id.to_string(),
                test,
            },
        );
        Ok(())
    }

    /// Enrich a failure with its source position, snippet and matcher values
    async fn describe_failure(
        &self,
        file_path: &str,
        message: String,
        stack: Option<String>,
        matcher: Option<MatcherResult>,
    ) -> TestError {
        let position = stack
            .as_deref()
            .and_then(|s| position::error_position(file_path, s));

        let snippet = match position {
            Some(at) => match self.inner.content.wait_for_content(file_path).await {
                Ok(source) => position::snippet(&source, at.line),
                Err(e) => {
                    debug!("No source for {}: {}", file_path, e);
                    None
                }
            },
            None => None,
        };

        let (expected, actual) = match matcher {
            Some(m) => (
                m.expected.as_ref().map(stringify_value),
                m.actual.as_ref().map(stringify_value),
            ),
            None => (None, None),
        };

        TestError {
            message,
            stack,
            snippet,
            line: position.map(|p| p.line),
            col: position.map(|p| p.col),
            expected,
            actual,
        }
    }

    async fn finish_file(
        &self,
        run_id: &str,
        file_id: &str,
        result: DispatchResult,
        progress: f64,
    ) -> Result<(), StoreError> {
        let mut store = self.inner.store.write().await;
        let test_file_id = store
            .run(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?
            .run_test_file(file_id)
            .map(|f| f.test_file_id.clone())
            .ok_or_else(|| StoreError::RunTestFileNotFound {
                run_id: run_id.to_string(),
                file_id: file_id.to_string(),
            })?;

        let file = match result {
            Ok(result) => {
                let stats = get_stats(std::slice::from_ref(&result));
                let status = stats.file_status();
                info!("{} {} ({})", status.symbol(), result.file_path, stats);

                store.update_test_file(
                    &test_file_id,
                    TestFilePatch {
                        status: Some(status),
                        duration: Some(result.duration),
                        modules: Some(result.modules),
                    },
                )?;
                store.update_run_test_file(
                    run_id,
                    file_id,
                    RunTestFilePatch {
                        status: Some(status),
                        duration: Some(result.duration),
                        ..Default::default()
                    },
                )?
            }
            Err(e) => {
                let message = format!("{}: {}", test_file_id, e);
                error!("{}", message);

                store.update_test_file(&test_file_id, TestFilePatch::status(Status::Error))?;
                for suite in store.fail_open_suites(run_id, file_id, &message) {
                    self.publish(&store, run_id, Change::Suite(suite));
                }
                store.update_run_test_file(
                    run_id,
                    file_id,
                    RunTestFilePatch {
                        status: Some(Status::Error),
                        error: Some(ErrorInfo::new(message)),
                        ..Default::default()
                    },
                )?
            }
        };
        self.publish(&store, run_id, Change::File(file));

        store.update_run(
            run_id,
            RunPatch {
                progress: Some(progress),
                ..Default::default()
            },
        )?;
        self.publish(&store, run_id, Change::Run);
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, total: usize, duration: f64, failed: bool) {
        let mut store = self.inner.store.write().await;
        let Some(run) = store.run(run_id).cloned() else {
            warn!("Run {} disappeared before it finished", run_id);
            return;
        };

        if failed {
            for file in run.run_test_files.iter().filter(|f| !f.status.is_terminal()) {
                let message = format!("{}: execution was interrupted", file.test_file_id);
                let _ = store.update_test_file(&file.test_file_id, TestFilePatch::status(Status::Error));
                for suite in store.fail_open_suites(run_id, &file.id, &message) {
                    self.publish(&store, run_id, Change::Suite(suite));
                }
                let _ = store.update_run_test_file(
                    run_id,
                    &file.id,
                    RunTestFilePatch {
                        status: Some(Status::Error),
                        error: Some(ErrorInfo::new(message)),
                        ..Default::default()
                    },
                );
            }
        }

        let has_errors = store.run(run_id).is_some_and(|r| r.has_errors());
        let status = if failed || has_errors {
            Status::Error
        } else {
            Status::Success
        };
        let patch = RunPatch {
            status: Some(status),
            duration: Some(duration),
            progress: (total == 0).then_some(1.0),
        };

        match store.update_run(run_id, patch) {
            Ok(run) => {
                info!("{} Run {} finished: {}", run.emoji, run.title, run.status);
                self.publish(&store, run_id, Change::Run);
            }
            Err(e) => warn!("{}", e),
        }
    }

    fn publish(&self, store: &RunStore, run_id: &str, change: Change) {
        if let Some(run) = store.run(run_id) {
            self.inner
                .notifier
                .publish(NotificationKind::Updated, run.clone(), change);
        }
    }
}

/// Wait for every relay task; returns how many of them failed
async fn join_relays(relays: &mut JoinSet<()>) -> usize {
    let mut failures = 0;
    while let Some(joined) = relays.join_next().await {
        if let Err(e) = joined {
            error!("File relay task failed: {}", e);
            failures += 1;
        }
    }
    failures
}

fn stringify_value(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
