//! Locating a test failure in its source file

/// 1-based line and column of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorPosition {
    pub line: usize,
    pub col: usize,
}

/// Find the deepest stack frame pointing into `relative_path` and read its
/// `:line:col` suffix.
pub fn error_position(relative_path: &str, stack: &str) -> Option<ErrorPosition> {
    stack
        .lines()
        .rev()
        .filter_map(|frame| {
            let start = frame.rfind(relative_path)? + relative_path.len();
            parse_location(&frame[start..])
        })
        .next()
}

fn parse_location(rest: &str) -> Option<ErrorPosition> {
    let mut parts = rest.strip_prefix(':')?.splitn(3, ':');
    let line = leading_number(parts.next()?)?;
    let col = parts.next().and_then(leading_number).unwrap_or(1);
    (line > 0).then_some(ErrorPosition { line, col })
}

fn leading_number(s: &str) -> Option<usize> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Trimmed source line at `line` (1-based)
pub fn snippet(source: &str, line: usize) -> Option<String> {
    source
        .lines()
        .nth(line.checked_sub(1)?)
        .map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_frame() {
        let stack = "Error: boom\n    at adds (/work/math.suite.yaml:12:9)";
        assert_eq!(
            error_position("math.suite.yaml", stack),
            Some(ErrorPosition { line: 12, col: 9 })
        );
    }

    #[test]
    fn test_uses_last_matching_frame() {
        let stack = "Error\n at a (/w/x.suite.yaml:1:1)\n at b (/w/x.suite.yaml:7:3)\n at runner";
        assert_eq!(
            error_position("x.suite.yaml", stack),
            Some(ErrorPosition { line: 7, col: 3 })
        );
    }

    #[test]
    fn test_no_matching_frame() {
        assert_eq!(error_position("x.suite.yaml", "Error: boom"), None);
        assert_eq!(error_position("x.suite.yaml", "at x.suite.yaml"), None);
    }

    #[test]
    fn test_snippet() {
        let source = "suites:\n  - title: math\n    tests:\n      - run: false  \n";
        assert_eq!(snippet(source, 4).as_deref(), Some("- run: false"));
        assert_eq!(snippet(source, 0), None);
        assert_eq!(snippet(source, 99), None);
    }
}
