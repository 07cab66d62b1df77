//! Pattern compilation for expect.

use regex::{Regex, RegexBuilder};

/// Compile one expect pattern.
///
/// `^`/`$` match at line boundaries and `.` matches newlines, so a pattern can
/// span several captured lines in the search window.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
}

/// Compile a list of expect patterns, failing on the first invalid one.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| compile_pattern(p.as_ref())).collect()
}

/// Capture groups of a match as strings; unmatched optional groups are empty.
pub fn capture_groups(captures: &regex::Captures<'_>) -> Vec<String> {
    captures
        .iter()
        .skip(1)
        .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect()
}
