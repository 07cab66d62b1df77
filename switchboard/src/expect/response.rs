//! Result of an expect.

use std::fmt;
use std::time::Duration;

use super::ExpectMode;

/// One pattern match found while expecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Index of the pattern in the caller's list.
    pub pattern_index: usize,

    /// Text the pattern matched.
    pub matched: String,

    /// Capture groups; unmatched optional groups are empty.
    pub groups: Vec<String>,
}

/// Outcome of an expect.
///
/// On success `before` holds everything captured up to the start of the final
/// match and `after` everything from there on. On timeout `before` holds all
/// captured text and `after` is empty.
#[derive(Debug, Clone)]
pub struct ExpectResponse {
    /// Index of the last matching pattern, `None` if nothing matched.
    pub index: Option<usize>,

    pub before: String,

    pub after: String,

    /// Text of the last match.
    pub matched: Option<String>,

    /// Capture groups of the last match.
    pub groups: Vec<String>,

    /// Every match found, in the order found.
    pub match_list: Vec<ExpectMatch>,

    /// Patterns that did not match.
    pub remaining: Vec<String>,

    pub timed_out: bool,

    pub elapsed: Duration,

    pub mode: ExpectMode,
}

impl ExpectResponse {
    /// Create a successful response from the matches found.
    pub fn matched(
        mode: ExpectMode,
        before: impl Into<String>,
        after: impl Into<String>,
        match_list: Vec<ExpectMatch>,
        remaining: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self::from_matches(mode, before.into(), after.into(), match_list, remaining, elapsed, false)
    }

    /// Create a timed out response carrying any partial matches.
    pub fn timed_out(
        mode: ExpectMode,
        captured: impl Into<String>,
        match_list: Vec<ExpectMatch>,
        remaining: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self::from_matches(mode, captured.into(), String::new(), match_list, remaining, elapsed, true)
    }

    fn from_matches(
        mode: ExpectMode,
        before: String,
        after: String,
        match_list: Vec<ExpectMatch>,
        remaining: Vec<String>,
        elapsed: Duration,
        timed_out: bool,
    ) -> Self {
        let last = match_list.last();
        Self {
            index: last.map(|m| m.pattern_index),
            matched: last.map(|m| m.matched.clone()),
            groups: last.map(|m| m.groups.clone()).unwrap_or_default(),
            before,
            after,
            match_list,
            remaining,
            timed_out,
            elapsed,
            mode,
        }
    }

    /// Check if the expect completed before its timeout.
    pub fn is_success(&self) -> bool {
        !self.timed_out
    }

    /// Indices of every pattern that matched.
    pub fn matched_indices(&self) -> Vec<usize> {
        self.match_list.iter().map(|m| m.pattern_index).collect()
    }

    /// Get the `before` lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.before.lines()
    }
}

impl fmt::Display for ExpectResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.before, self.after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(pattern_index: usize, matched: &str) -> ExpectMatch {
        ExpectMatch {
            pattern_index,
            matched: matched.to_string(),
            groups: Vec::new(),
        }
    }

    #[test]
    fn test_timed_out_keeps_partial_matches() {
        let response = ExpectResponse::timed_out(
            ExpectMode::All,
            "X\n",
            vec![found(0, "X")],
            vec!["Y".to_string()],
            Duration::from_millis(10),
        );
        assert!(!response.is_success());
        assert_eq!(response.index, Some(0));
        assert_eq!(response.matched.as_deref(), Some("X"));
        assert_eq!(response.after, "");
        assert_eq!(response.remaining, vec!["Y"]);
    }

    #[test]
    fn test_nothing_matched() {
        let response =
            ExpectResponse::timed_out(ExpectMode::Any, "", Vec::new(), vec!["A".into()], Duration::ZERO);
        assert_eq!(response.index, None);
        assert!(response.groups.is_empty());
        assert!(response.matched_indices().is_empty());
    }
}
