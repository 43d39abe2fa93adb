//! Status of runs, files, suites and tests

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by every record in the run hierarchy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Never executed (only test files start here)
    #[default]
    Idle,
    InProgress,
    Success,
    Error,
    Skipped,
}

impl Status {
    pub fn symbol(&self) -> &'static str {
        match self {
            Status::Idle => "·",
            Status::InProgress => "…",
            Status::Success => "✓",
            Status::Error => "✗",
            Status::Skipped => "○",
        }
    }

    /// Terminal statuses never change again within the same run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Error | Status::Skipped)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "IDLE"),
            Status::InProgress => write!(f, "RUNNING"),
            Status::Success => write!(f, "PASS"),
            Status::Error => write!(f, "FAIL"),
            Status::Skipped => write!(f, "SKIP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(Status::Skipped.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        assert!(!Status::Idle.is_terminal());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: Status = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(parsed, Status::Skipped);
    }
}
