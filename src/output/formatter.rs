//! Output formatters for finished runs
//!
//! Provides JSON, Table, and summary output formats.

use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::executor::Stats;
use crate::models::{Run, Status, TestSuite};
use crate::utils::format_duration;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// A run together with its suites, as shown to users
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run: Run,
    pub suites: Vec<TestSuite>,
    pub stats: Stats,
}

impl RunReport {
    pub fn new(run: Run, suites: Vec<TestSuite>) -> Self {
        let stats = suites.iter().fold(Stats::default(), |mut stats, suite| {
            stats.suite_count += 1;
            if suite.status == Status::Error {
                stats.error_suite_count += 1;
            }
            stats.test_count += suite.tests.len();
            stats.error_test_count += suite
                .tests
                .iter()
                .filter(|t| t.status == Status::Error)
                .count();
            stats
        });
        Self { run, suites, stats }
    }

    fn file_suites<'a>(&'a self, run_test_file_id: &'a str) -> impl Iterator<Item = &'a TestSuite> {
        self.suites
            .iter()
            .filter(move |s| s.run_test_file_id == run_test_file_id)
    }
}

/// Result formatter
pub struct RunFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl RunFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_summary(report),
        }
    }

    fn status(&self, status: Status) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        match status {
            Status::Success => format!("\x1b[32m{label}\x1b[0m"),
            Status::Error => format!("\x1b[31m{label}\x1b[0m"),
            Status::Skipped => format!("\x1b[33m{label}\x1b[0m"),
            Status::InProgress | Status::Idle => label,
        }
    }

    fn format_table(&self, report: &RunReport) -> String {
        let run = &report.run;
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  {} {:56}║\n", run.emoji, run.title));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for file in &run.run_test_files {
            let duration = file.duration.map(format_duration).unwrap_or_default();
            output.push_str(&format!(
                "║  {} {:40} {:>8}\n",
                self.status(file.status),
                file.test_file_id,
                duration
            ));
            if let Some(error) = &file.error {
                output.push_str(&format!("║      {}\n", error.message));
            }

            for suite in report.file_suites(&file.id) {
                for error in &suite.other_errors {
                    output.push_str(&format!("║      {}: {}\n", suite.title, error.message));
                }
                for test in suite.tests.iter().filter(|t| t.status == Status::Error) {
                    output.push_str(&format!("║      ✗ {} › {}\n", suite.title, test.title));
                    let Some(error) = &test.error else {
                        continue;
                    };
                    output.push_str(&format!("║        {}\n", error.message));
                    if let (Some(line), Some(snippet)) = (error.line, &error.snippet) {
                        output.push_str(&format!("║        {:>4} | {}\n", line, snippet));
                    }
                    if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                        output.push_str(&format!("║        expected: {expected}\n"));
                        output.push_str(&format!("║        actual:   {actual}\n"));
                    }
                }
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  {} ({:.1}%)\n",
            report.stats,
            report.stats.pass_rate()
        ));
        output.push_str(&format!(
            "║  Status: {} | Duration: {}\n",
            self.status(run.status),
            run.duration.map(format_duration).unwrap_or_else(|| "-".to_string())
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_summary(&self, report: &RunReport) -> String {
        format!(
            "{} {} {}: {}/{} tests passed in {} files ({})",
            report.run.emoji,
            report.run.title,
            report.run.status,
            report.stats.passed_test_count(),
            report.stats.test_count,
            report.run.run_test_files.len(),
            report
                .run
                .duration
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

impl Default for RunFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a report to a file
pub fn write_report_to_file(path: &str, report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    let formatter = RunFormatter::new(format).no_color();
    let content = formatter.format(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorInfo, RunTestFile, Test, TestError};
    use chrono::Utc;

    fn report() -> RunReport {
        let run = Run {
            id: "r1".to_string(),
            title: "brave-falcon".to_string(),
            emoji: "🦊".to_string(),
            progress: 1.0,
            status: Status::Error,
            duration: Some(1500.0),
            created_at: Utc::now(),
            run_test_files: vec![
                RunTestFile {
                    id: "r1_f0".to_string(),
                    slug: "math-suite-yaml".to_string(),
                    run_id: "r1".to_string(),
                    test_file_id: "math.suite.yaml".to_string(),
                    status: Status::Error,
                    duration: Some(12.0),
                    build_duration: Some(1.0),
                    error: None,
                },
                RunTestFile {
                    id: "r1_f1".to_string(),
                    slug: "broken-suite-yaml".to_string(),
                    run_id: "r1".to_string(),
                    test_file_id: "broken.suite.yaml".to_string(),
                    status: Status::Error,
                    duration: None,
                    build_duration: None,
                    error: Some(ErrorInfo::new("broken.suite.yaml: Failed to build")),
                },
            ],
        };

        let mut failing = Test::pending("math.suite.yaml#s0t1", "divides");
        failing.status = Status::Error;
        failing.error = Some(TestError {
            message: "Expected stdout to match".to_string(),
            line: Some(9),
            snippet: Some("- title: divides".to_string()),
            expected: Some("\"2\"".to_string()),
            actual: Some("\"3\"".to_string()),
            ..Default::default()
        });
        let mut passing = Test::pending("math.suite.yaml#s0t0", "adds");
        passing.status = Status::Success;

        let suite = TestSuite {
            id: "math.suite.yaml#s0".to_string(),
            run_id: "r1".to_string(),
            run_test_file_id: "r1_f0".to_string(),
            title: "math".to_string(),
            file_path: "math.suite.yaml".to_string(),
            status: Status::Error,
            duration: Some(10.0),
            tests: vec![passing, failing],
            test_errors: 1,
            other_errors: Vec::new(),
        };

        RunReport::new(run, vec![suite])
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_report_stats() {
        let stats = report().stats;
        assert_eq!(stats.suite_count, 1);
        assert_eq!(stats.error_suite_count, 1);
        assert_eq!(stats.test_count, 2);
        assert_eq!(stats.error_test_count, 1);
    }

    #[test]
    fn test_table_shows_pass_rate() {
        let output = RunFormatter::new(OutputFormat::Table).no_color().format(&report());
        assert!(output.contains("Tests: 1/2 passed (50.0%)"));
    }

    #[test]
    fn test_table_shows_failures() {
        let output = RunFormatter::new(OutputFormat::Table).no_color().format(&report());
        assert!(output.contains("brave-falcon"));
        assert!(output.contains("✗ math › divides"));
        assert!(output.contains("   9 | - title: divides"));
        assert!(output.contains("expected: \"2\""));
        assert!(output.contains("broken.suite.yaml: Failed to build"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_summary() {
        let output = RunFormatter::new(OutputFormat::Summary).format(&report());
        assert_eq!(output, "🦊 brave-falcon FAIL: 1/2 tests passed in 2 files (1.50s)");
    }

    #[test]
    fn test_json() {
        let output = RunFormatter::new(OutputFormat::Json).format(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["run"]["status"], "error");
        assert_eq!(value["stats"]["test_count"], 2);
    }
}
