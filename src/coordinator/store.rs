//! In-memory run store
//!
//! Holds every Run, TestFile and TestSuite. Updates are patch based and
//! return the record as it looks after the change.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::models::{ErrorInfo, Run, RunTestFile, Status, Test, TestError, TestFile, TestSuite};

/// Alias accepted wherever a run id is expected
pub const LAST_RUN: &str = "last-run";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("File {file_id} not found in run {run_id}")]
    RunTestFileNotFound { run_id: String, file_id: String },

    #[error("Test file {0} not found")]
    TestFileNotFound(String),

    #[error("Suite {suite_id} not found in run {run_id}")]
    SuiteNotFound { run_id: String, suite_id: String },

    #[error("Test {test_id} not found in suite {suite_id}")]
    TestNotFound { suite_id: String, test_id: String },
}

#[derive(Clone, Debug, Default)]
pub struct RunPatch {
    pub progress: Option<f64>,
    pub status: Option<Status>,
    pub duration: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct RunTestFilePatch {
    pub status: Option<Status>,
    pub duration: Option<f64>,
    pub build_duration: Option<f64>,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Debug, Default)]
pub struct TestFilePatch {
    pub status: Option<Status>,
    pub duration: Option<f64>,
    pub modules: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct SuitePatch {
    pub status: Option<Status>,
    pub duration: Option<f64>,
    pub test_errors: Option<usize>,
    pub other_errors: Option<Vec<ErrorInfo>>,
}

#[derive(Clone, Debug, Default)]
pub struct TestPatch {
    pub status: Option<Status>,
    pub duration: Option<f64>,
    pub error: Option<TestError>,
}

macro_rules! status_patch {
    ($($patch:ident),*) => {
        $(impl $patch {
            pub fn status(status: Status) -> Self {
                Self {
                    status: Some(status),
                    ..Default::default()
                }
            }
        })*
    };
}

status_patch!(RunPatch, RunTestFilePatch, TestFilePatch, SuitePatch, TestPatch);

#[derive(Debug, Default)]
pub struct RunStore {
    runs: Vec<Run>,
    test_files: Vec<TestFile>,
    /// Suites per run id, in creation order
    suites: HashMap<String, Vec<TestSuite>>,
    /// Runs that have been handed to the executor
    started: HashSet<String>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Test files

    /// Add newly discovered files. Known files keep their history.
    pub fn register_test_files(&mut self, files: Vec<TestFile>) {
        for file in files {
            match self.test_files.iter_mut().find(|f| f.id == file.id) {
                Some(existing) => existing.absolute_path = file.absolute_path,
                None => self.test_files.push(file),
            }
        }
    }

    pub fn test_files(&self) -> &[TestFile] {
        &self.test_files
    }

    /// Moving into `in_progress` shifts the current terminal status to `previous_status`
    pub fn update_test_file(&mut self, id: &str, patch: TestFilePatch) -> Result<TestFile, StoreError> {
        let file = self
            .test_files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::TestFileNotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            if status == Status::InProgress && file.status.is_terminal() {
                file.previous_status = Some(file.status);
            }
            file.status = status;
        }
        if let Some(duration) = patch.duration {
            file.duration = Some(duration);
        }
        if let Some(modules) = patch.modules {
            file.modules = modules;
        }
        Ok(file.clone())
    }

    // Runs

    pub fn insert_run(&mut self, run: Run) {
        self.suites.entry(run.id.clone()).or_default();
        self.runs.push(run);
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn last_run(&self) -> Option<&Run> {
        self.runs.last()
    }

    /// Look a run up by id or by the `last-run` alias
    pub fn run(&self, id: &str) -> Option<&Run> {
        if id == LAST_RUN {
            self.last_run()
        } else {
            self.runs.iter().find(|r| r.id == id)
        }
    }

    fn run_mut(&mut self, id: &str) -> Result<&mut Run, StoreError> {
        self.runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))
    }

    pub fn update_run(&mut self, id: &str, patch: RunPatch) -> Result<Run, StoreError> {
        let run = self.run_mut(id)?;
        if let Some(progress) = patch.progress {
            run.progress = progress.clamp(0.0, 1.0);
        }
        if let Some(status) = patch.status {
            run.status = status;
        }
        if let Some(duration) = patch.duration {
            run.duration = Some(duration);
        }
        Ok(run.clone())
    }

    pub fn update_run_test_file(
        &mut self,
        run_id: &str,
        file_id: &str,
        patch: RunTestFilePatch,
    ) -> Result<RunTestFile, StoreError> {
        let run = self.run_mut(run_id)?;
        let file = run
            .run_test_files
            .iter_mut()
            .find(|f| f.id == file_id)
            .ok_or_else(|| StoreError::RunTestFileNotFound {
                run_id: run_id.to_string(),
                file_id: file_id.to_string(),
            })?;

        if let Some(status) = patch.status {
            file.status = status;
        }
        if let Some(duration) = patch.duration {
            file.duration = Some(duration);
        }
        if let Some(build_duration) = patch.build_duration {
            file.build_duration = Some(build_duration);
        }
        if let Some(error) = patch.error {
            file.error = Some(error);
        }
        Ok(file.clone())
    }

    /// Mark a run as started. False when it was started before.
    pub fn claim_run(&mut self, id: &str) -> bool {
        self.started.insert(id.to_string())
    }

    /// Remove a run and its suites
    pub fn remove_run(&mut self, id: &str) -> Option<Run> {
        let index = self.runs.iter().position(|r| r.id == id)?;
        self.suites.remove(id);
        self.started.remove(id);
        Some(self.runs.remove(index))
    }

    pub fn clear_runs(&mut self) {
        self.runs.clear();
        self.suites.clear();
        self.started.clear();
    }

    // Suites and tests

    /// Insert a suite, replacing one with the same id in the same run
    pub fn create_suite(&mut self, suite: TestSuite) -> TestSuite {
        let suites = self.suites.entry(suite.run_id.clone()).or_default();
        match suites.iter_mut().find(|s| s.id == suite.id) {
            Some(existing) => *existing = suite.clone(),
            None => suites.push(suite.clone()),
        }
        suite
    }

    pub fn suites_for_run(&self, run_id: &str) -> &[TestSuite] {
        self.suites.get(run_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn suite(&self, run_id: &str, suite_id: &str) -> Option<&TestSuite> {
        self.suites_for_run(run_id).iter().find(|s| s.id == suite_id)
    }

    fn suite_mut(&mut self, run_id: &str, suite_id: &str) -> Result<&mut TestSuite, StoreError> {
        self.suites
            .get_mut(run_id)
            .and_then(|suites| suites.iter_mut().find(|s| s.id == suite_id))
            .ok_or_else(|| StoreError::SuiteNotFound {
                run_id: run_id.to_string(),
                suite_id: suite_id.to_string(),
            })
    }

    pub fn update_suite(
        &mut self,
        run_id: &str,
        suite_id: &str,
        patch: SuitePatch,
    ) -> Result<TestSuite, StoreError> {
        let suite = self.suite_mut(run_id, suite_id)?;
        if let Some(status) = patch.status {
            suite.status = status;
        }
        if let Some(duration) = patch.duration {
            suite.duration = Some(duration);
        }
        if let Some(test_errors) = patch.test_errors {
            suite.test_errors = test_errors;
        }
        if let Some(other_errors) = patch.other_errors {
            suite.other_errors = other_errors;
        }
        Ok(suite.clone())
    }

    /// Fail every unfinished suite of one run file, along with its unfinished
    /// tests. Returns the suites that changed.
    pub fn fail_open_suites(
        &mut self,
        run_id: &str,
        run_test_file_id: &str,
        reason: &str,
    ) -> Vec<TestSuite> {
        let Some(suites) = self.suites.get_mut(run_id) else {
            return Vec::new();
        };

        suites
            .iter_mut()
            .filter(|s| s.run_test_file_id == run_test_file_id && !s.status.is_terminal())
            .map(|suite| {
                for test in suite.tests.iter_mut().filter(|t| !t.status.is_terminal()) {
                    test.status = Status::Error;
                    suite.test_errors += 1;
                }
                suite.status = Status::Error;
                suite.other_errors.push(ErrorInfo::new(reason));
                suite.clone()
            })
            .collect()
    }

    pub fn update_test(
        &mut self,
        run_id: &str,
        suite_id: &str,
        test_id: &str,
        patch: TestPatch,
    ) -> Result<Test, StoreError> {
        let suite = self.suite_mut(run_id, suite_id)?;
        let test = suite
            .tests
            .iter_mut()
            .find(|t| t.id == test_id)
            .ok_or_else(|| StoreError::TestNotFound {
                suite_id: suite_id.to_string(),
                test_id: test_id.to_string(),
            })?;

        if let Some(status) = patch.status {
            test.status = status;
        }
        if let Some(duration) = patch.duration {
            test.duration = Some(duration);
        }
        if let Some(error) = patch.error {
            test.error = Some(error);
        }
        Ok(test.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn run(id: &str) -> Run {
        Run {
            id: id.to_string(),
            title: "calm-river".to_string(),
            emoji: "🚀".to_string(),
            progress: 0.0,
            status: Status::InProgress,
            duration: None,
            created_at: Utc::now(),
            run_test_files: vec![RunTestFile {
                id: format!("{id}_f0"),
                slug: "a-suite-yaml".to_string(),
                run_id: id.to_string(),
                test_file_id: "a.suite.yaml".to_string(),
                status: Status::InProgress,
                duration: None,
                build_duration: None,
                error: None,
            }],
        }
    }

    fn suite(run_id: &str) -> TestSuite {
        TestSuite {
            id: "a.suite.yaml#s0".to_string(),
            run_id: run_id.to_string(),
            run_test_file_id: format!("{run_id}_f0"),
            title: "math".to_string(),
            file_path: "a.suite.yaml".to_string(),
            status: Status::InProgress,
            duration: None,
            tests: vec![Test::pending("a.suite.yaml#s0t0", "adds")],
            test_errors: 0,
            other_errors: Vec::new(),
        }
    }

    #[test]
    fn test_last_run_alias() {
        let mut store = RunStore::new();
        store.insert_run(run("r1"));
        store.insert_run(run("r2"));
        assert_eq!(store.run(LAST_RUN).map(|r| r.id.as_str()), Some("r2"));
        assert_eq!(store.run("r1").map(|r| r.id.as_str()), Some("r1"));
        assert!(store.run("missing").is_none());
    }

    #[test]
    fn test_update_returns_new_record() {
        let mut store = RunStore::new();
        store.insert_run(run("r1"));

        let updated = store
            .update_run(
                "r1",
                RunPatch {
                    progress: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.progress, 0.5);
        assert_eq!(updated.status, Status::InProgress);

        let file = store
            .update_run_test_file(
                "r1",
                "r1_f0",
                RunTestFilePatch {
                    build_duration: Some(3.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(file.build_duration, Some(3.0));
        assert_eq!(store.run("r1").unwrap().run_test_files[0].build_duration, Some(3.0));
    }

    #[test]
    fn test_unknown_records() {
        let mut store = RunStore::new();
        assert_eq!(
            store.update_run("nope", RunPatch::default()).unwrap_err(),
            StoreError::RunNotFound("nope".to_string())
        );
        store.insert_run(run("r1"));
        assert!(matches!(
            store.update_run_test_file("r1", "x", RunTestFilePatch::default()),
            Err(StoreError::RunTestFileNotFound { .. })
        ));
        assert!(matches!(
            store.update_suite("r1", "x", SuitePatch::default()),
            Err(StoreError::SuiteNotFound { .. })
        ));
    }

    #[test]
    fn test_previous_status_tracking() {
        let mut store = RunStore::new();
        store.register_test_files(vec![TestFile::new("a.suite.yaml", "/p/a.suite.yaml")]);

        store.update_test_file("a.suite.yaml", TestFilePatch::status(Status::InProgress)).unwrap();
        store.update_test_file("a.suite.yaml", TestFilePatch::status(Status::Success)).unwrap();
        assert_eq!(store.test_files()[0].previous_status, None);

        store.update_test_file("a.suite.yaml", TestFilePatch::status(Status::InProgress)).unwrap();
        let file = store
            .update_test_file("a.suite.yaml", TestFilePatch::status(Status::Error))
            .unwrap();
        assert_eq!(file.status, Status::Error);
        assert_eq!(file.previous_status, Some(Status::Success));
    }

    #[test]
    fn test_register_keeps_history() {
        let mut store = RunStore::new();
        store.register_test_files(vec![TestFile::new("a.suite.yaml", "/p/a.suite.yaml")]);
        store.update_test_file("a.suite.yaml", TestFilePatch::status(Status::Success)).unwrap();
        store.register_test_files(vec![
            TestFile::new("a.suite.yaml", "/p/a.suite.yaml"),
            TestFile::new("b.suite.yaml", "/p/b.suite.yaml"),
        ]);
        assert_eq!(store.test_files().len(), 2);
        assert_eq!(store.test_files()[0].status, Status::Success);
    }

    #[test]
    fn test_suites_are_scoped_by_run() {
        let mut store = RunStore::new();
        store.insert_run(run("r1"));
        store.insert_run(run("r2"));
        store.create_suite(suite("r1"));
        store.create_suite(suite("r2"));

        store
            .update_test("r1", "a.suite.yaml#s0", "a.suite.yaml#s0t0", TestPatch::status(Status::Success))
            .unwrap();
        assert_eq!(store.suite("r1", "a.suite.yaml#s0").unwrap().tests[0].status, Status::Success);
        assert_eq!(store.suite("r2", "a.suite.yaml#s0").unwrap().tests[0].status, Status::Idle);

        let removed = store.remove_run("r1").unwrap();
        assert_eq!(removed.id, "r1");
        assert!(store.suites_for_run("r1").is_empty());
        assert_eq!(store.suites_for_run("r2").len(), 1);

        store.clear_runs();
        assert!(store.runs().is_empty());
        assert!(store.suites_for_run("r2").is_empty());
    }

    #[test]
    fn test_claim_run_once() {
        let mut store = RunStore::new();
        store.insert_run(run("r1"));
        assert!(store.claim_run("r1"));
        assert!(!store.claim_run("r1"));

        store.remove_run("r1");
        store.insert_run(run("r1"));
        assert!(store.claim_run("r1"));
    }

    #[test]
    fn test_fail_open_suites() {
        let mut store = RunStore::new();
        store.insert_run(run("r1"));
        let mut open = suite("r1");
        open.tests.push(Test::pending("a.suite.yaml#s0t1", "subtracts"));
        store.create_suite(open);
        let mut done = suite("r1");
        done.id = "a.suite.yaml#s1".to_string();
        done.status = Status::Success;
        store.create_suite(done);
        store
            .update_test("r1", "a.suite.yaml#s0", "a.suite.yaml#s0t0", TestPatch::status(Status::Success))
            .unwrap();

        let failed = store.fail_open_suites("r1", "r1_f0", "a.suite.yaml: timed out");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "a.suite.yaml#s0");
        assert_eq!(failed[0].status, Status::Error);
        assert_eq!(failed[0].test_errors, 1);
        assert_eq!(failed[0].other_errors[0].message, "a.suite.yaml: timed out");
        assert_eq!(failed[0].tests[0].status, Status::Success);
        assert_eq!(failed[0].tests[1].status, Status::Error);

        assert_eq!(store.suite("r1", "a.suite.yaml#s1").unwrap().status, Status::Success);
        assert!(store.fail_open_suites("r1", "r1_f0", "again").is_empty());
    }
}
