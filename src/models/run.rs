//! Run hierarchy records
//!
//! Run → RunTestFile → TestSuite → Test, plus the long-lived TestFile that a
//! RunTestFile points at. Every record is plain data; the coordinator's store
//! is the only place that mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::Status;

/// A message with an optional (already trimmed) stack
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// One execution campaign over a set of test files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub title: String,
    pub emoji: String,
    /// Fraction of files resolved, 0.0 ..= 1.0
    pub progress: f64,
    pub status: Status,
    /// Total wall time in milliseconds, set when the run finishes
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub run_test_files: Vec<RunTestFile>,
}

impl Run {
    pub fn run_test_file(&self, id: &str) -> Option<&RunTestFile> {
        self.run_test_files.iter().find(|f| f.id == id)
    }

    pub fn has_errors(&self) -> bool {
        self.run_test_files.iter().any(|f| f.status.is_error())
    }
}

/// Binds a run to one selected test file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunTestFile {
    pub id: String,
    pub slug: String,
    pub run_id: String,
    pub test_file_id: String,
    pub status: Status,
    pub duration: Option<f64>,
    pub build_duration: Option<f64>,
    pub error: Option<ErrorInfo>,
}

/// Turn a relative path into a url-friendly slug
pub fn slugify(relative_path: &str) -> String {
    relative_path
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '.') { '-' } else { c })
        .collect()
}

/// A discovered file containing tests, shared across runs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestFile {
    /// Path relative to the target directory; doubles as the id
    pub id: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub status: Status,
    /// Status from the run this file's current status superseded
    pub previous_status: Option<Status>,
    pub duration: Option<f64>,
    /// Modules executed while running this file
    pub modules: Vec<String>,
}

impl TestFile {
    pub fn new(relative_path: impl Into<String>, absolute_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        Self {
            id: relative_path.clone(),
            relative_path,
            absolute_path: absolute_path.into(),
            status: Status::Idle,
            previous_status: None,
            duration: None,
            modules: Vec::new(),
        }
    }
}

/// A `describe`-like grouping of tests inside one file, for one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestSuite {
    pub id: String,
    pub run_id: String,
    pub run_test_file_id: String,
    pub title: String,
    pub file_path: String,
    pub status: Status,
    pub duration: Option<f64>,
    pub tests: Vec<Test>,
    pub test_errors: usize,
    pub other_errors: Vec<ErrorInfo>,
}

impl TestSuite {
    /// Suite status is never set directly, always derived from its counts
    pub fn derive_status(test_count: usize, test_errors: usize, other_errors: usize) -> Status {
        if test_count == 0 {
            Status::Skipped
        } else if test_errors > 0 || other_errors > 0 {
            Status::Error
        } else {
            Status::Success
        }
    }
}

/// One assertion unit inside a suite
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Test {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub duration: Option<f64>,
    pub error: Option<TestError>,
}

impl Test {
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: Status::Idle,
            duration: None,
            error: None,
        }
    }
}

/// Failure details of a test, enriched for display
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    pub stack: Option<String>,
    /// Trimmed source line at the failure position
    pub snippet: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}
