//! Worker execution engine
//!
//! Runs a built test module inside a pool worker: suites and tests in
//! declaration order, hooks around them, test doubles reset between tests,
//! and a protocol event for every transition.

mod module;
mod runner;
mod stack;

pub use module::{
    step, CoverageOptions, RunOptions, StepFn, SuiteDef, TestContext, TestFailure, TestModule,
};
pub use runner::{execute_file, run_suites};
