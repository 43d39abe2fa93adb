//! Data models for test runs
//!
//! This module contains all data structures shared by the worker side and the
//! coordinator side.

mod result;
mod run;
mod status;

pub use result::{FileExecutionResult, SuiteResult, TestOutcome};
pub use run::{slugify, ErrorInfo, Run, RunTestFile, Test, TestError, TestFile, TestSuite};
pub use status::Status;
