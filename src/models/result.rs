//! Final per-file report produced by a worker

use serde::{Deserialize, Serialize};

use super::ErrorInfo;

/// Outcome of one test as seen at the end of the file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub id: String,
    pub title: String,
    pub failed: bool,
}

/// Snapshot of a suite once all of its tests ran
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub id: String,
    pub title: String,
    pub file_path: String,
    pub test_errors: usize,
    pub other_errors: Vec<ErrorInfo>,
    pub tests: Vec<TestOutcome>,
}

/// The worker's report for one executed file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileExecutionResult {
    /// Path relative to the target directory
    pub file_path: String,
    /// Milliseconds spent executing suites
    pub duration: f64,
    /// Module paths loaded while executing, for watch invalidation
    pub modules: Vec<String>,
    pub suites: Vec<SuiteResult>,
}
