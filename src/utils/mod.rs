//! Shared helpers: logging setup, timing and path handling

pub mod logger;
pub mod paths;
pub mod timer;

pub use paths::relative_path;
pub use timer::{format_duration, Timer};
