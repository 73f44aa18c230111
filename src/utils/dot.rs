//! DOT label escaping for the call graph dump.

/// Escapes a string for use inside a quoted DOT label.
///
/// # Arguments
///
/// * `s` - The string to escape
///
/// # Returns
///
/// A new string with quotes, backslashes, newlines and angle brackets escaped.
#[must_use]
pub fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_dot_method_names() {
        assert_eq!(
            escape_dot("java.util.List<T> \"x\""),
            "java.util.List\\<T\\> \\\"x\\\""
        );
        assert_eq!(escape_dot("a\r\nb"), "a\\nb");
    }
}
