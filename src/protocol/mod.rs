//! Worker → coordinator event protocol
//!
//! A closed set of lifecycle events. Within one file execution the events of a
//! suite always arrive as
//! `SUITE_START → (TEST_START → TEST_SUCCESS | TEST_ERROR)* → SUITE_COMPLETED`
//! and suites never interleave. Nothing is guaranteed across files, so
//! consumers must key their state by the ids carried in each payload.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::models::ErrorInfo;

/// Test reference announced with its suite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    pub id: String,
    pub title: String,
}

/// Suite announcement sent before any of its tests run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuiteInfo {
    pub id: String,
    pub title: String,
    pub file_path: String,
    pub tests: Vec<TestInfo>,
}

/// Structured assertion payload (expected vs actual), kept as raw JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatcherResult {
    #[serde(default)]
    pub expected: Option<serde_json::Value>,
    #[serde(default)]
    pub actual: Option<serde_json::Value>,
}

/// Every message a worker can emit. Durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    BuildFailed {
        error: ErrorInfo,
    },
    BuildCompleted {
        file_path: String,
        duration: f64,
    },
    SuiteStart {
        suite: SuiteInfo,
    },
    TestStart {
        suite_id: String,
        test_id: String,
    },
    TestSuccess {
        suite_id: String,
        test_id: String,
        duration: f64,
    },
    TestError {
        suite_id: String,
        test_id: String,
        duration: f64,
        error: ErrorInfo,
        stack: Option<String>,
        matcher_result: Option<MatcherResult>,
    },
    SuiteCompleted {
        suite_id: String,
        test_errors: usize,
        other_errors: Vec<ErrorInfo>,
        duration: f64,
    },
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::BuildFailed { .. } => "BUILD_FAILED",
            WorkerEvent::BuildCompleted { .. } => "BUILD_COMPLETED",
            WorkerEvent::SuiteStart { .. } => "SUITE_START",
            WorkerEvent::TestStart { .. } => "TEST_START",
            WorkerEvent::TestSuccess { .. } => "TEST_SUCCESS",
            WorkerEvent::TestError { .. } => "TEST_ERROR",
            WorkerEvent::SuiteCompleted { .. } => "SUITE_COMPLETED",
        }
    }

    /// Suite this event belongs to, if any
    pub fn suite_id(&self) -> Option<&str> {
        match self {
            WorkerEvent::SuiteStart { suite } => Some(&suite.id),
            WorkerEvent::TestStart { suite_id, .. }
            | WorkerEvent::TestSuccess { suite_id, .. }
            | WorkerEvent::TestError { suite_id, .. }
            | WorkerEvent::SuiteCompleted { suite_id, .. } => Some(suite_id),
            WorkerEvent::BuildFailed { .. } | WorkerEvent::BuildCompleted { .. } => None,
        }
    }
}

/// Write end of one submission's event stream
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    /// Create a sink and the receiver its events are relayed to
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never blocks; events are dropped once nobody listens anymore
    pub fn emit(&self, event: WorkerEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("Dropping {} event, listener is gone", e.0.kind());
        }
    }
}
