//! YAML suite files
//!
//! ```yaml
//! suites:
//!   - title: math
//!     before_each:
//!       - stub: { SCALE: "2" }
//!     tests:
//!       - title: doubles
//!         run: echo $((21 * SCALE))
//!         expect: { stdout: "42" }
//! ```
//!
//! Every hook step and test body is a shell command. `stub` entries go into
//! the test-double registry and are exported to the command environment;
//! they are reset before each test.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::collab::{BuildError, BuiltModule, ModuleBuilder};
use crate::engine::{step, RunOptions, StepFn, SuiteDef, TestContext, TestFailure, TestModule};
use crate::utils::Timer;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteFile {
    #[serde(default)]
    suites: Vec<SuiteSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteSpec {
    title: String,
    #[serde(default)]
    before_all: Vec<StepSpec>,
    #[serde(default)]
    before_each: Vec<StepSpec>,
    #[serde(default)]
    after_each: Vec<StepSpec>,
    #[serde(default)]
    after_all: Vec<StepSpec>,
    #[serde(default)]
    tests: Vec<TestSpec>,
}

/// A hook step: a bare command or a command with stubs
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Command(String),
    Detailed {
        run: Option<String>,
        #[serde(default)]
        stub: BTreeMap<String, String>,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestSpec {
    title: String,
    run: Option<String>,
    #[serde(default)]
    stub: BTreeMap<String, String>,
    #[serde(default)]
    expect: Expectation,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Expectation {
    exit_code: Option<i32>,
    stdout: Option<String>,
}

/// Where a test or suite is declared, for stack frames
#[derive(Clone, Debug)]
struct Frame {
    name: String,
    file: PathBuf,
    line: usize,
    col: usize,
}

impl Frame {
    fn render(&self, message: &str) -> String {
        format!(
            "Error: {}\n    at {} ({}:{}:{})",
            message,
            self.name,
            self.file.display(),
            self.line,
            self.col
        )
    }
}

struct CommandOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Builds `*.suite.yaml` files into executable modules
#[derive(Clone, Debug, Default)]
pub struct YamlModuleBuilder;

impl YamlModuleBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModuleBuilder for YamlModuleBuilder {
    async fn build(&self, entry: &Path, _options: &RunOptions) -> Result<BuiltModule, BuildError> {
        let timer = Timer::start(format!("build {}", entry.display()));
        let source = tokio::fs::read_to_string(entry)
            .await
            .map_err(|source| BuildError::Io {
                path: entry.to_path_buf(),
                source,
            })?;

        let module = parse_module(&source, entry)?;
        debug!(
            "Built {} ({} suites, {} tests)",
            entry.display(),
            module.suites.len(),
            module.test_count()
        );

        Ok(BuiltModule {
            module,
            modules: vec![entry.to_path_buf()],
            duration: timer.stop(),
        })
    }
}

fn parse_module(source: &str, entry: &Path) -> Result<TestModule, BuildError> {
    let file: SuiteFile = serde_yaml::from_str(source).map_err(|e| BuildError::Invalid {
        path: entry.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut locator = Locator::new(source);
    let mut suites = Vec::with_capacity(file.suites.len());

    for spec in file.suites {
        if spec.title.trim().is_empty() {
            return Err(BuildError::Invalid {
                path: entry.to_path_buf(),
                message: "suite without a title".to_string(),
            });
        }

        let suite_frame = locator.frame(&spec.title, entry);
        let hooks = |steps: Vec<StepSpec>| -> Vec<StepFn> {
            steps.into_iter().map(|s| hook_step(s, suite_frame.clone())).collect()
        };

        let mut suite = SuiteDef::new(spec.title.clone());
        suite.before_all = hooks(spec.before_all);
        suite.before_each = hooks(spec.before_each);
        suite.after_each = hooks(spec.after_each);
        suite.after_all = hooks(spec.after_all);

        for test in spec.tests {
            let frame = locator.frame(&test.title, entry);
            suite = suite.test(test.title.clone(), test_step(test, frame));
        }
        suites.push(suite);
    }

    Ok(TestModule::new(suites))
}

/// Finds `title:` declarations in source order
struct Locator<'a> {
    lines: Vec<&'a str>,
    cursor: usize,
}

impl<'a> Locator<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines().collect(),
            cursor: 0,
        }
    }

    fn frame(&mut self, title: &str, file: &Path) -> Frame {
        let found = self.lines[self.cursor.min(self.lines.len())..]
            .iter()
            .enumerate()
            .find_map(|(offset, line)| {
                let (col, declared) = declared_title(line)?;
                (declared == title).then_some((self.cursor + offset, col))
            });

        let (index, col) = found.unwrap_or((self.cursor, 0));
        self.cursor = index + 1;
        Frame {
            name: title.to_string(),
            file: file.to_path_buf(),
            line: index + 1,
            col: col + 1,
        }
    }
}

/// Column and value of a `title:` key on one line, quotes removed
fn declared_title(line: &str) -> Option<(usize, &str)> {
    let col = line.find("title:")?;
    let value = line[col + "title:".len()..].trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)));
    Some((col, unquoted.unwrap_or(value)))
}

async fn run_command(command: &str, ctx: &TestContext) -> Result<CommandOutput, TestFailure> {
    ctx.doubles.record_call(command);
    debug!(
        "Running `{}` (call {} in this test)",
        command,
        ctx.doubles.call_count(command)
    );
    // Dropped on timeout or pool shutdown; the shell must not outlive it
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(ctx.entry_dir())
        .envs(ctx.doubles.stubs())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| TestFailure::new(format!("Failed to spawn `{command}`: {e}")))?;

    Ok(CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
    })
}

fn hook_step(spec: StepSpec, frame: Frame) -> StepFn {
    let (run, stub) = match spec {
        StepSpec::Command(command) => (Some(command), BTreeMap::new()),
        StepSpec::Detailed { run, stub } => (run, stub),
    };
    let run = Arc::new(run);
    let stub = Arc::new(stub);

    step(move |ctx| {
        let run = run.clone();
        let stub = stub.clone();
        let frame = frame.clone();
        async move {
            for (key, value) in stub.iter() {
                ctx.doubles.stub(key.clone(), value.clone());
            }
            let Some(command) = run.as_deref() else {
                return Ok(());
            };

            let output = run_command(command, &ctx).await?;
            if output.code != 0 {
                let mut message = format!("`{command}` exited with code {}", output.code);
                if !output.stderr.is_empty() {
                    message = format!("{message}: {}", output.stderr);
                }
                return Err(TestFailure::new(message.clone()).with_stack(frame.render(&message)));
            }
            Ok(())
        }
    })
}

fn test_step(spec: TestSpec, frame: Frame) -> StepFn {
    let spec = Arc::new(spec);

    step(move |ctx| {
        let spec = spec.clone();
        let frame = frame.clone();
        async move {
            for (key, value) in &spec.stub {
                ctx.doubles.stub(key.clone(), value.clone());
            }
            let Some(command) = spec.run.as_deref() else {
                return Ok(());
            };

            let output = run_command(command, &ctx).await?;
            check_expectation(&spec.expect, &output, &frame)
        }
    })
}

fn check_expectation(expect: &Expectation, output: &CommandOutput, frame: &Frame) -> Result<(), TestFailure> {
    let expected_code = expect.exit_code.unwrap_or(0);
    if output.code != expected_code {
        let mut message = format!("Expected exit code {expected_code}, got {}", output.code);
        if !output.stderr.is_empty() {
            message = format!("{message}\n{}", output.stderr);
        }
        return Err(TestFailure::new(message.clone())
            .with_stack(frame.render(&message))
            .with_matcher(expected_code.into(), output.code.into()));
    }

    if let Some(expected) = &expect.stdout {
        if output.stdout != expected.trim_end() {
            let message = "Expected stdout to match".to_string();
            return Err(TestFailure::new(message.clone())
                .with_stack(frame.render(&message))
                .with_matcher(expected.trim_end().into(), output.stdout.clone().into()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_suites;
    use crate::models::SuiteResult;
    use crate::executor::{DispatchError, FileJob, WorkerPool};
    use crate::protocol::{EventSink, WorkerEvent};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const SOURCE: &str = r#"suites:
  - title: arithmetic
    before_each:
      - stub: { SCALE: "2" }
    tests:
      - title: doubles
        run: echo $((21 * SCALE))
        expect: { stdout: "42" }
      - title: wrong answer
        run: echo 41
        expect:
          stdout: "42"
  - title: exit codes
    tests:
      - title: expects failure
        run: exit 3
        expect: { exit_code: 3 }
      - title: unexpected failure
        run: exit 1
"#;

    async fn execute(source: &str) -> (Vec<SuiteResult>, Vec<WorkerEvent>, NamedTempFile) {
        let mut file = tempfile::Builder::new().suffix(".suite.yaml").tempfile().unwrap();
        file.write_all(source.as_bytes()).unwrap();

        let built = YamlModuleBuilder::new()
            .build(file.path(), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(built.modules, vec![file.path().to_path_buf()]);

        let (sink, mut rx) = EventSink::channel();
        let results = run_suites(built.module, file.path(), "x.suite.yaml", &RunOptions::default(), &sink).await;
        drop(sink);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (results, events, file)
    }

    #[tokio::test]
    async fn test_runs_commands_with_stubs() {
        let (results, _, _file) = execute(SOURCE).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "arithmetic");
        assert!(!results[0].tests[0].failed);
        assert!(results[0].tests[1].failed);
        assert!(!results[1].tests[0].failed);
        assert!(results[1].tests[1].failed);
    }

    #[tokio::test]
    async fn test_failure_points_at_test() {
        let (_, events, file) = execute(SOURCE).await;

        let failure = events
            .iter()
            .find_map(|e| match e {
                WorkerEvent::TestError {
                    test_id,
                    stack,
                    matcher_result,
                    ..
                } if test_id.ends_with("#s0t1") => Some((stack.clone(), matcher_result.clone())),
                _ => None,
            })
            .unwrap();

        let stack = failure.0.unwrap();
        let location = format!("{}:9:9)", file.path().display());
        assert!(stack.ends_with(&location), "{stack}");

        let matcher = failure.1.unwrap();
        assert_eq!(matcher.expected, Some(serde_json::json!("42")));
        assert_eq!(matcher.actual, Some(serde_json::json!("41")));
    }

    #[tokio::test]
    async fn test_exit_code_matcher() {
        let (_, events, _file) = execute(SOURCE).await;
        let matcher = events
            .iter()
            .find_map(|e| match e {
                WorkerEvent::TestError {
                    test_id,
                    matcher_result,
                    ..
                } if test_id.ends_with("#s1t1") => matcher_result.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(matcher.expected, Some(serde_json::json!(0)));
        assert_eq!(matcher.actual, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_failing_hook() {
        let source = "suites:\n  - title: setup\n    before_all:\n      - exit 2\n    tests:\n      - title: runs\n        run: \"true\"\n";
        let (results, _, _file) = execute(source).await;
        assert_eq!(results[0].other_errors.len(), 1);
        assert!(results[0].other_errors[0]
            .message
            .starts_with("beforeAll hook failed: `exit 2` exited with code 2"));
        assert!(!results[0].tests[0].failed);
    }

    #[tokio::test]
    async fn test_invalid_yaml_is_build_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"suites:\n  - tests: [").unwrap();
        let result = YamlModuleBuilder::new().build(file.path(), &RunOptions::default()).await;
        assert!(matches!(result, Err(BuildError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = YamlModuleBuilder::new()
            .build(Path::new("/definitely/not/here.suite.yaml"), &RunOptions::default())
            .await;
        assert!(matches!(result, Err(BuildError::Io { .. })));
    }

    #[test]
    fn test_locator_follows_source_order() {
        let source = "- title: same\n- title: other\n- title: same\n";
        let mut locator = Locator::new(source);
        let file = Path::new("f.suite.yaml");
        assert_eq!(locator.frame("same", file).line, 1);
        assert_eq!(locator.frame("same", file).line, 3);
    }

    #[test]
    fn test_locator_matches_whole_titles() {
        let source = "suites:\n  - title: \"adds all\"\n    tests:\n      - title: 'adds'\n      - title: add\n";
        let file = Path::new("f.suite.yaml");

        let mut locator = Locator::new(source);
        let frame = locator.frame("adds", file);
        assert_eq!((frame.line, frame.col), (4, 9));
        assert_eq!(locator.frame("add", file).line, 5);

        assert_eq!(Locator::new(source).frame("adds all", file).line, 2);
    }

    #[tokio::test]
    async fn test_timeout_kills_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let entry = dir.path().join("slow.suite.yaml");
        std::fs::write(
            &entry,
            format!(
                "suites:\n  - title: slow\n    tests:\n      - title: sleeps\n        run: sleep 1; touch {}\n",
                marker.display()
            ),
        )
        .unwrap();

        let options = RunOptions {
            target_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let limit = Duration::from_millis(200);
        let pool = WorkerPool::with_timeout(1, Arc::new(YamlModuleBuilder::new()), options, Some(limit)).unwrap();

        let result = pool.submit(FileJob::new(entry.clone())).unwrap().drive(|_| {}).await;
        assert_eq!(result, Err(DispatchError::Timeout(limit)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
