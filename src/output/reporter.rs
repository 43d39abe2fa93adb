//! Live console output while a run executes

use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::coordinator::{Change, NotificationKind, RunNotification};
use crate::models::Status;
use crate::utils::format_duration;

/// Prints test and suite outcomes as notifications arrive
#[derive(Clone, Debug)]
pub struct ConsoleReporter {
    colorize: bool,
    /// Suite titles by suite id, for prefixing test lines
    suite_titles: HashMap<String, String>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            colorize: true,
            suite_titles: HashMap::new(),
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Consume notifications until the channel closes
    pub fn spawn(mut self, mut rx: broadcast::Receiver<RunNotification>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if let Some(line) = self.line(&notification) {
                            println!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Console output skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn paint(&self, text: String, status: Status) -> String {
        if !self.colorize {
            return text;
        }
        match status {
            Status::Success => format!("\x1b[32m{text}\x1b[0m"),
            Status::Error => format!("\x1b[31m{text}\x1b[0m"),
            Status::Skipped => format!("\x1b[33m{text}\x1b[0m"),
            Status::InProgress | Status::Idle => text,
        }
    }

    fn test_name(&self, suite_id: &str, title: &str) -> String {
        match self.suite_titles.get(suite_id) {
            Some(suite) => format!("{suite} › {title}"),
            None => title.to_string(),
        }
    }

    /// The console line for a notification, if it deserves one
    pub fn line(&mut self, notification: &RunNotification) -> Option<String> {
        let run = &notification.run;
        match (&notification.kind, &notification.change) {
            (NotificationKind::Added, _) => Some(format!(
                "{} Run {} ({} files)",
                run.emoji,
                run.title,
                run.run_test_files.len()
            )),
            (NotificationKind::Removed, _) => None,
            (NotificationKind::Updated, Change::Test { suite_id, test }) => {
                let duration = test.duration.map(format_duration).unwrap_or_default();
                let name = self.test_name(suite_id, &test.title);
                match test.status {
                    Status::Success => Some(self.paint(
                        format!("  ✓ {} ({})", name, duration),
                        Status::Success,
                    )),
                    Status::Error => {
                        let mut line = format!("  ✗ {} ({})", name, duration);
                        if let Some(error) = &test.error {
                            line.push_str(&format!(": {}", error.message));
                            if let Some(stack) = &error.stack {
                                line.push_str(&stack_frames(stack));
                            }
                        }
                        Some(self.paint(line, Status::Error))
                    }
                    _ => None,
                }
            }
            (NotificationKind::Updated, Change::Suite(suite)) => {
                self.suite_titles.insert(suite.id.clone(), suite.title.clone());
                if !suite.status.is_terminal() {
                    return Some(format!("{} {}", suite.file_path, suite.title));
                }
                let mut line = format!(
                    "  {} {} [{}]",
                    suite.status.symbol(),
                    suite.title,
                    suite.status
                );
                for error in &suite.other_errors {
                    line.push_str(&format!("\n    {}", error.message));
                }
                Some(self.paint(line, suite.status))
            }
            (NotificationKind::Updated, Change::File(file)) => file
                .error
                .as_ref()
                .filter(|_| file.status == Status::Error)
                .map(|e| self.paint(format!("✗ {}", e.message), Status::Error)),
            (NotificationKind::Updated, Change::Run) => run.status.is_terminal().then(|| {
                let duration = run.duration.map(format_duration).unwrap_or_default();
                self.paint(
                    format!("{} Run {} finished: {} ({})", run.emoji, run.title, run.status, duration),
                    run.status,
                )
            }),
        }
    }
}

/// The `at ...` lines of a stack, indented under the failing test
fn stack_frames(stack: &str) -> String {
    stack
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("at "))
        .map(|l| format!("\n      {l}"))
        .collect()
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorInfo, Run, Test, TestError, TestSuite};
    use chrono::Utc;

    fn run(status: Status) -> Run {
        Run {
            id: "r1".to_string(),
            title: "calm-river".to_string(),
            emoji: "🚀".to_string(),
            progress: 1.0,
            status,
            duration: Some(20.0),
            created_at: Utc::now(),
            run_test_files: Vec::new(),
        }
    }

    fn updated(change: Change, status: Status) -> RunNotification {
        RunNotification {
            kind: NotificationKind::Updated,
            run: run(status),
            change,
        }
    }

    fn suite(status: Status) -> TestSuite {
        TestSuite {
            id: "s0".to_string(),
            run_id: "r1".to_string(),
            run_test_file_id: "r1_f0".to_string(),
            title: "math".to_string(),
            file_path: "math.suite.yaml".to_string(),
            status,
            duration: None,
            tests: Vec::new(),
            test_errors: 0,
            other_errors: Vec::new(),
        }
    }

    #[test]
    fn test_test_lines() {
        let mut reporter = ConsoleReporter::new().no_color();

        let mut test = Test::pending("t0", "adds");
        test.status = Status::Success;
        test.duration = Some(3.0);
        let line = reporter.line(&updated(
            Change::Test {
                suite_id: "s0".to_string(),
                test: test.clone(),
            },
            Status::InProgress,
        ));
        assert_eq!(line.as_deref(), Some("  ✓ adds (3ms)"));

        let started = reporter.line(&updated(Change::Suite(suite(Status::InProgress)), Status::InProgress));
        assert_eq!(started.as_deref(), Some("math.suite.yaml math"));

        test.status = Status::Error;
        test.error = Some(TestError {
            message: "boom".to_string(),
            ..Default::default()
        });
        let line = reporter.line(&updated(
            Change::Test {
                suite_id: "s0".to_string(),
                test,
            },
            Status::InProgress,
        ));
        assert_eq!(line.as_deref(), Some("  ✗ math › adds (3ms): boom"));
    }

    #[test]
    fn test_failure_prints_stack_frames() {
        let mut reporter = ConsoleReporter::new().no_color();
        reporter.line(&updated(Change::Suite(suite(Status::InProgress)), Status::InProgress));

        let mut test = Test::pending("t1", "divides");
        test.status = Status::Error;
        test.duration = Some(4.0);
        test.error = Some(TestError {
            message: "expected 2".to_string(),
            stack: Some("Error: expected 2\n    at divides (/p/math.suite.yaml:3:5)".to_string()),
            ..Default::default()
        });
        let line = reporter
            .line(&updated(
                Change::Test {
                    suite_id: "s0".to_string(),
                    test,
                },
                Status::InProgress,
            ))
            .unwrap();
        assert_eq!(
            line,
            "  ✗ math › divides (4ms): expected 2\n      at divides (/p/math.suite.yaml:3:5)"
        );
    }

    #[test]
    fn test_suite_and_run_lines() {
        let mut reporter = ConsoleReporter::new().no_color();
        let mut suite = suite(Status::Error);
        suite.other_errors = vec![ErrorInfo::new("afterAll hook failed: nope")];

        let line = reporter
            .line(&updated(Change::Suite(suite), Status::InProgress))
            .unwrap();
        assert!(line.contains("math [FAIL]"));
        assert!(line.contains("afterAll hook failed: nope"));

        assert!(reporter.line(&updated(Change::Run, Status::InProgress)).is_none());
        let finished = reporter.line(&updated(Change::Run, Status::Success)).unwrap();
        assert_eq!(finished, "🚀 Run calm-river finished: PASS (20ms)");
    }
}
