//! Small helpers shared across modules.

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Quotes `value` for a POSIX shell if it contains anything beyond a safe set.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_leaves_plain_paths() {
        assert_eq!(
            shell_quote("ilmsdump.out/resume-3f2a9c1.json"),
            "ilmsdump.out/resume-3f2a9c1.json"
        );
    }

    #[test]
    fn test_shell_quote_wraps_spaces_and_quotes() {
        assert_eq!(shell_quote("my dir/r.json"), "'my dir/r.json'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote(""), "''");
    }
}
