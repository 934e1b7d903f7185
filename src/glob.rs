//! Shell-style glob matching used by RBAC policies and project source allow-lists.
//!
//! `*` matches any run of characters (including `/`), `?` matches exactly one
//! character. Everything else is literal.

use regex::Regex;

/// Compile a glob pattern into an anchored regex
fn compile(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

/// Check whether `text` matches `pattern`.
///
/// An uncompilable pattern never matches.
pub fn matches(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains(['*', '?']) {
        return pattern == text;
    }
    compile(pattern).is_some_and(|re| re.is_match(text))
}
