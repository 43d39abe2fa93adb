//! Executable test modules
//!
//! A `TestModule` is what the build collaborator hands to the engine: suites
//! of hooks and tests whose bodies are async closures.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::protocol::MatcherResult;

/// Error raised by a hook or test body
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct TestFailure {
    pub message: String,
    pub stack: Option<String>,
    pub matcher: Option<MatcherResult>,
}

impl TestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            matcher: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_matcher(mut self, expected: serde_json::Value, actual: serde_json::Value) -> Self {
        self.matcher = Some(MatcherResult {
            expected: Some(expected),
            actual: Some(actual),
        });
        self
    }

    /// Convert a caught panic payload into a failure
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "test panicked".to_string()
        };
        Self::new(message)
    }

    /// Prefix the message, keeping stack and matcher payload
    pub fn context(mut self, prefix: &str) -> Self {
        self.message = format!("{prefix}: {}", self.message);
        self
    }
}

pub type StepFuture = BoxFuture<'static, Result<(), TestFailure>>;

/// A hook or test body
pub type StepFn = Arc<dyn Fn(TestContext) -> StepFuture + Send + Sync>;

/// Wrap an async closure as a `StepFn`
pub fn step<F, Fut>(f: F) -> StepFn
where
    F: Fn(TestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TestFailure>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

#[derive(Debug, Default)]
struct DoublesState {
    stubs: BTreeMap<String, String>,
    calls: Vec<String>,
}

/// Shared test-double registry: stubbed values and recorded calls.
///
/// The engine restores it before every test so nothing leaks from one test
/// into the next.
#[derive(Clone, Debug, Default)]
pub struct Doubles {
    inner: Arc<Mutex<DoublesState>>,
}

impl Doubles {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DoublesState> {
        // A panicking test body must not poison the registry for the next test
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stub(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state().stubs.insert(key.into(), value.into());
    }

    pub fn stubs(&self) -> BTreeMap<String, String> {
        self.state().stubs.clone()
    }

    pub fn record_call(&self, name: impl Into<String>) {
        self.state().calls.push(name.into());
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == name).count()
    }

    /// Back to a clean slate
    pub fn restore(&self) {
        let mut state = self.state();
        state.stubs.clear();
        state.calls.clear();
    }
}

/// Handed to every hook and test body
#[derive(Clone, Debug)]
pub struct TestContext {
    pub entry: PathBuf,
    pub suite_title: String,
    pub test_title: Option<String>,
    pub doubles: Doubles,
}

impl TestContext {
    pub fn new(entry: impl Into<PathBuf>, suite_title: impl Into<String>, doubles: Doubles) -> Self {
        Self {
            entry: entry.into(),
            suite_title: suite_title.into(),
            test_title: None,
            doubles,
        }
    }

    pub fn for_test(&self, title: &str) -> Self {
        Self {
            test_title: Some(title.to_string()),
            ..self.clone()
        }
    }

    /// Directory containing the entry file
    pub fn entry_dir(&self) -> &Path {
        self.entry.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Clone)]
pub struct TestDef {
    pub title: String,
    pub body: StepFn,
}

impl TestDef {
    pub fn new(title: impl Into<String>, body: StepFn) -> Self {
        Self {
            title: title.into(),
            body,
        }
    }
}

/// One suite with its hooks, in declaration order
#[derive(Clone, Default)]
pub struct SuiteDef {
    pub title: String,
    pub before_all: Vec<StepFn>,
    pub before_each: Vec<StepFn>,
    pub after_each: Vec<StepFn>,
    pub after_all: Vec<StepFn>,
    pub tests: Vec<TestDef>,
}

impl SuiteDef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn before_all(mut self, hook: StepFn) -> Self {
        self.before_all.push(hook);
        self
    }

    pub fn before_each(mut self, hook: StepFn) -> Self {
        self.before_each.push(hook);
        self
    }

    pub fn after_each(mut self, hook: StepFn) -> Self {
        self.after_each.push(hook);
        self
    }

    pub fn after_all(mut self, hook: StepFn) -> Self {
        self.after_all.push(hook);
        self
    }

    pub fn test(mut self, title: impl Into<String>, body: StepFn) -> Self {
        self.tests.push(TestDef::new(title, body));
        self
    }
}

#[derive(Clone, Default)]
pub struct TestModule {
    pub suites: Vec<SuiteDef>,
}

impl TestModule {
    pub fn new(suites: Vec<SuiteDef>) -> Self {
        Self { suites }
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|s| s.tests.len()).sum()
    }
}

/// Which executed modules are reported back
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoverageOptions {
    pub root: PathBuf,
    /// Directory names or file name suffixes excluded from the module list
    pub ignored: Vec<String>,
}

impl CoverageOptions {
    pub fn includes(&self, module: &Path) -> bool {
        if !module.starts_with(&self.root) {
            return false;
        }
        let file_name = module
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        !self.ignored.iter().any(|pattern| {
            file_name.ends_with(pattern.as_str())
                || module.components().any(|c| c.as_os_str() == pattern.as_str())
        })
    }
}

/// Per-run settings shared by every file execution
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub target_directory: PathBuf,
    pub coverage: CoverageOptions,
    /// Record a non-test error for suites without tests
    pub empty_suite_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_restore() {
        let doubles = Doubles::new();
        doubles.stub("API_URL", "http://stub");
        doubles.record_call("fetch");
        doubles.record_call("fetch");

        assert_eq!(doubles.stubs().get("API_URL").map(String::as_str), Some("http://stub"));
        assert_eq!(doubles.call_count("fetch"), 2);

        doubles.restore();
        assert!(doubles.stubs().is_empty());
        assert_eq!(doubles.call_count("fetch"), 0);
        assert_eq!(doubles.stubs().get("API_URL"), None);
    }

    #[test]
    fn test_doubles_shared_between_clones() {
        let doubles = Doubles::new();
        let clone = doubles.clone();
        clone.stub("A", "1");
        assert_eq!(doubles.stubs().len(), 1);
    }

    #[test]
    fn test_failure_from_panic() {
        let failure = TestFailure::from_panic(Box::new("boom"));
        assert_eq!(failure.message, "boom");

        let failure = TestFailure::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(failure.message, "owned boom");

        let failure = TestFailure::from_panic(Box::new(42u8));
        assert_eq!(failure.message, "test panicked");
    }

    #[test]
    fn test_failure_context() {
        let failure = TestFailure::new("refused")
            .with_stack("Error: refused")
            .context("beforeEach hook failed");
        assert_eq!(failure.message, "beforeEach hook failed: refused");
        assert!(failure.stack.is_some());
    }

    #[test]
    fn test_suite_builder() {
        let noop = step(|_| async { Ok(()) });
        let suite = SuiteDef::new("math")
            .before_each(noop.clone())
            .test("adds", noop.clone())
            .test("subtracts", noop);
        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.before_each.len(), 1);
        assert_eq!(TestModule::new(vec![suite]).test_count(), 2);
    }

    #[test]
    fn test_coverage_filter() {
        let coverage = CoverageOptions {
            root: PathBuf::from("/project"),
            ignored: vec![".suite.yaml".to_string(), "vendor".to_string()],
        };
        assert!(coverage.includes(Path::new("/project/src/lib.sh")));
        assert!(coverage.includes(Path::new("/project/vendored.sh")));
        assert!(!coverage.includes(Path::new("/project/a.suite.yaml")));
        assert!(!coverage.includes(Path::new("/project/vendor/lib.sh")));
        assert!(!coverage.includes(Path::new("/elsewhere/lib.sh")));
    }
}
