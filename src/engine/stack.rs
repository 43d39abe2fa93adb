//! Stack trace trimming

use std::path::Path;

/// Cut a stack so it ends with the last line that mentions the entry file.
///
/// Frames below that line belong to the runner and are never shown. A stack
/// that never mentions the entry file is returned unchanged.
pub fn trim_stack(stack: &str, entry: &Path) -> String {
    let Some(name) = entry.file_name().map(|n| n.to_string_lossy()) else {
        return stack.to_string();
    };

    match stack.rfind(name.as_ref()) {
        Some(index) => match stack[index..].find('\n') {
            Some(end) => stack[..index + end].to_string(),
            None => stack.to_string(),
        },
        None => stack.to_string(),
    }
}
