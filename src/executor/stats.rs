//! Suite and test counts over file results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{FileExecutionResult, Status, SuiteResult, TestSuite};

/// Aggregate counts for one file or a whole run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub suite_count: usize,
    pub error_suite_count: usize,
    pub test_count: usize,
    pub error_test_count: usize,
}

impl Stats {
    /// Status a file gets from its own stats
    pub fn file_status(&self) -> Status {
        if self.test_count == 0 {
            Status::Skipped
        } else if self.error_test_count > 0 || self.error_suite_count > 0 {
            Status::Error
        } else {
            Status::Success
        }
    }

    pub fn passed_test_count(&self) -> usize {
        self.test_count - self.error_test_count
    }

    pub fn pass_rate(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            (self.passed_test_count() as f64 / self.test_count as f64) * 100.0
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Suites: {}/{} passed | Tests: {}/{} passed",
            self.suite_count - self.error_suite_count,
            self.suite_count,
            self.passed_test_count(),
            self.test_count
        )
    }
}

fn suite_status(suite: &SuiteResult) -> Status {
    TestSuite::derive_status(suite.tests.len(), suite.test_errors, suite.other_errors.len())
}

/// Reduce file results into counts. Pure; call it per file or per run.
pub fn get_stats(results: &[FileExecutionResult]) -> Stats {
    results
        .iter()
        .flat_map(|r| &r.suites)
        .fold(Stats::default(), |mut stats, suite| {
            stats.suite_count += 1;
            if suite_status(suite).is_error() {
                stats.error_suite_count += 1;
            }
            stats.test_count += suite.tests.len();
            stats.error_test_count += suite.test_errors.min(suite.tests.len());
            stats
        })
}
