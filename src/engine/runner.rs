//! Suite execution state machine
//!
//! Runs one file's suites strictly in sequence and reports every transition
//! through the event sink.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use tracing::{debug, warn};

use super::module::{Doubles, StepFn, SuiteDef, TestContext, TestFailure, TestModule};
use super::stack::trim_stack;
use super::RunOptions;
use crate::collab::{BuildError, ModuleBuilder};
use crate::models::{ErrorInfo, FileExecutionResult, SuiteResult, TestOutcome};
use crate::protocol::{EventSink, SuiteInfo, TestInfo, WorkerEvent};
use crate::utils::{relative_path, Timer};

/// Run a hook or body, turning panics into failures
async fn run_step(step: &StepFn, ctx: TestContext) -> Result<(), TestFailure> {
    let step = step.clone();
    match AssertUnwindSafe(async move { (*step)(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(TestFailure::from_panic(payload)),
    }
}

fn hook_error(failure: &TestFailure, prefix: String, entry: &Path) -> ErrorInfo {
    let info = ErrorInfo::new(format!("{prefix}: {}", failure.message));
    match &failure.stack {
        Some(stack) => info.with_stack(trim_stack(stack, entry)),
        None => info,
    }
}

/// Execute every suite of a built module.
///
/// Failures never escape: a failing test is reported and the next one runs.
pub async fn run_suites(
    module: TestModule,
    entry: &Path,
    file_path: &str,
    options: &RunOptions,
    sink: &EventSink,
) -> Vec<SuiteResult> {
    let doubles = Doubles::new();
    let mut results = Vec::with_capacity(module.suites.len());

    for (index, suite) in module.suites.into_iter().enumerate() {
        let suite_id = format!("{file_path}#s{index}");
        let result = run_suite(suite, suite_id, entry, file_path, options, &doubles, sink).await;
        results.push(result);
    }

    results
}

async fn run_suite(
    suite: SuiteDef,
    suite_id: String,
    entry: &Path,
    file_path: &str,
    options: &RunOptions,
    doubles: &Doubles,
    sink: &EventSink,
) -> SuiteResult {
    let tests: Vec<TestInfo> = suite
        .tests
        .iter()
        .enumerate()
        .map(|(index, test)| TestInfo {
            id: format!("{suite_id}t{index}"),
            title: test.title.clone(),
        })
        .collect();

    sink.emit(WorkerEvent::SuiteStart {
        suite: SuiteInfo {
            id: suite_id.clone(),
            title: suite.title.clone(),
            file_path: file_path.to_string(),
            tests: tests.clone(),
        },
    });
    debug!("Suite '{}' started ({} tests)", suite.title, tests.len());

    let suite_timer = Timer::start(format!("suite {}", suite.title));
    let base_ctx = TestContext::new(entry, suite.title.clone(), doubles.clone());
    let mut test_errors = 0;
    let mut other_errors = Vec::new();
    let mut outcomes = Vec::with_capacity(tests.len());

    for hook in &suite.before_all {
        if let Err(e) = run_step(hook, base_ctx.clone()).await {
            warn!("beforeAll hook of '{}' failed: {}", suite.title, e);
            other_errors.push(hook_error(&e, "beforeAll hook failed".to_string(), entry));
        }
    }

    for (test, info) in suite.tests.iter().zip(&tests) {
        doubles.restore();
        let ctx = base_ctx.for_test(&test.title);
        let mut failure = None;

        for hook in &suite.before_each {
            if let Err(e) = run_step(hook, ctx.clone()).await {
                failure = Some(e.context("beforeEach hook failed"));
                break;
            }
        }

        let timer = Timer::start(format!("test {}", test.title));
        sink.emit(WorkerEvent::TestStart {
            suite_id: suite_id.clone(),
            test_id: info.id.clone(),
        });

        if failure.is_none() {
            if let Err(e) = run_step(&test.body, ctx.clone()).await {
                failure = Some(e);
            }
        }
        let duration = timer.elapsed_ms();

        let failed = failure.is_some();
        match failure {
            None => sink.emit(WorkerEvent::TestSuccess {
                suite_id: suite_id.clone(),
                test_id: info.id.clone(),
                duration,
            }),
            Some(e) => {
                test_errors += 1;
                sink.emit(WorkerEvent::TestError {
                    suite_id: suite_id.clone(),
                    test_id: info.id.clone(),
                    duration,
                    error: ErrorInfo::new(e.message.clone()),
                    stack: e.stack.as_deref().map(|s| trim_stack(s, entry)),
                    matcher_result: e.matcher,
                });
            }
        }

        for hook in &suite.after_each {
            if let Err(e) = run_step(hook, ctx.clone()).await {
                warn!("afterEach hook for '{}' failed: {}", test.title, e);
                other_errors.push(hook_error(
                    &e,
                    format!("afterEach hook failed for \"{}\"", test.title),
                    entry,
                ));
            }
        }

        outcomes.push(TestOutcome {
            id: info.id.clone(),
            title: info.title.clone(),
            failed,
        });
    }

    for hook in &suite.after_all {
        if let Err(e) = run_step(hook, base_ctx.clone()).await {
            warn!("afterAll hook of '{}' failed: {}", suite.title, e);
            other_errors.push(hook_error(&e, "afterAll hook failed".to_string(), entry));
        }
    }

    if options.empty_suite_error && suite.tests.is_empty() {
        other_errors.push(ErrorInfo::new(format!("Empty test suite: {}", suite.title)));
    }

    sink.emit(WorkerEvent::SuiteCompleted {
        suite_id: suite_id.clone(),
        test_errors,
        other_errors: other_errors.clone(),
        duration: suite_timer.stop(),
    });

    SuiteResult {
        id: suite_id,
        title: suite.title,
        file_path: file_path.to_string(),
        test_errors,
        other_errors,
        tests: outcomes,
    }
}

/// Build and execute one test file inside a worker.
///
/// A build failure is reported as `BUILD_FAILED` and no suite runs.
pub async fn execute_file(
    builder: &dyn ModuleBuilder,
    entry: &Path,
    options: &RunOptions,
    sink: &EventSink,
) -> Result<FileExecutionResult, BuildError> {
    let file_path = relative_path(&options.target_directory, entry);

    let built = match builder.build(entry, options).await {
        Ok(built) => built,
        Err(e) => {
            sink.emit(WorkerEvent::BuildFailed {
                error: ErrorInfo::new(e.to_string()),
            });
            return Err(e);
        }
    };
    sink.emit(WorkerEvent::BuildCompleted {
        file_path: file_path.clone(),
        duration: built.duration,
    });

    let timer = Timer::start(format!("file {file_path}"));
    let suites = run_suites(built.module, entry, &file_path, options, sink).await;
    let modules = built
        .modules
        .iter()
        .filter(|m| options.coverage.includes(m))
        .map(|m| m.to_string_lossy().into_owned())
        .collect();

    Ok(FileExecutionResult {
        file_path,
        duration: timer.stop(),
        modules,
        suites,
    })
}
