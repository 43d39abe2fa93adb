//! Test file discovery

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::models::TestFile;
use crate::utils::relative_path;

/// Which files under the target directory are test files
#[derive(Clone, Debug)]
pub struct FileMatcher {
    /// File name suffixes, e.g. `.suite.yaml`
    pub suffixes: Vec<String>,
    /// Directory or file names skipped entirely
    pub ignored: Vec<String>,
}

impl FileMatcher {
    pub fn new(suffixes: Vec<String>, ignored: Vec<String>) -> Self {
        Self { suffixes, ignored }
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.iter().any(|i| i == name)
    }

    pub fn is_test_file(&self, name: &str) -> bool {
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

/// Walk `root` and return every test file, sorted by relative path
pub fn discover_test_files(root: &Path, matcher: &FileMatcher) -> Result<Vec<TestFile>> {
    let mut found = Vec::new();
    walk(root, matcher, &mut found)?;

    let mut files: Vec<TestFile> = found
        .into_iter()
        .map(|(path, _)| TestFile::new(relative_path(root, &path), path))
        .collect();
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    debug!("Discovered {} test files in {}", files.len(), root.display());
    Ok(files)
}

/// Like `discover_test_files`, with each file's modification time
pub fn scan_modified(root: &Path, matcher: &FileMatcher) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut found = Vec::new();
    walk(root, matcher, &mut found)?;
    Ok(found)
}

fn walk(dir: &Path, matcher: &FileMatcher, found: &mut Vec<(PathBuf, SystemTime)>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if matcher.is_ignored(&name) {
            continue;
        }

        let path = entry.path();
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        if metadata.is_dir() {
            walk(&path, matcher, found)?;
        } else if matcher.is_test_file(&name) {
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((path, modified));
        }
    }
    Ok(())
}
