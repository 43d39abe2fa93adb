//! Filesystem-backed collaborators used by the binary

mod content;
mod discovery;
mod suite_file;
mod watcher;

pub use content::DiskContentLoader;
pub use discovery::{discover_test_files, FileMatcher};
pub use suite_file::YamlModuleBuilder;
pub use watcher::PollingWatcher;
