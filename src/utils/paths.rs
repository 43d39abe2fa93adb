//! Path helpers

use std::path::Path;

/// `path` relative to `root` with forward slashes; unchanged when outside `root`
pub fn relative_path(root: &Path, path: &Path) -> String {
    let Ok(relative) = path.strip_prefix(root) else {
        return path.to_string_lossy().into_owned();
    };
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/project"), Path::new("/project/src/a.suite.yaml")),
            "src/a.suite.yaml"
        );
    }

    #[test]
    fn test_outside_root() {
        assert_eq!(
            relative_path(Path::new("/project"), Path::new("/other/a.suite.yaml")),
            "/other/a.suite.yaml"
        );
    }
}
