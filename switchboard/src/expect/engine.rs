//! Pattern matching state for one expect.
//!
//! The engine is fed captured lines and decides when the expect is
//! satisfied. It does no I/O and keeps no clock beyond its start time, so the
//! async wait in [`super::wait`] only has to deliver lines and enforce the
//! deadline.

use std::collections::HashSet;
use std::time::Instant;

use regex::Regex;

use super::response::{ExpectMatch, ExpectResponse};
use super::ExpectMode;
use crate::channel::{capture_groups, compile_patterns, SearchWindow};

/// Match found in the current window.
struct Found {
    pattern_index: usize,
    start: usize,
    end: usize,
    matched: String,
    groups: Vec<String>,
}

/// Matching state machine for one expect.
#[derive(Debug)]
pub struct ExpectEngine {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
    mode: ExpectMode,
    window: SearchWindow,
    captured: String,
    match_list: Vec<ExpectMatch>,
    started: Instant,
}

impl ExpectEngine {
    /// Compile `patterns` and start matching.
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        mode: ExpectMode,
        search_window_size: usize,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            compiled: compile_patterns(patterns)?,
            mode,
            window: SearchWindow::new(search_window_size),
            captured: String::new(),
            match_list: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn mode(&self) -> ExpectMode {
        self.mode
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn search_window_size(&self) -> usize {
        self.window.search_window_size()
    }

    /// Matches found so far.
    pub fn matches(&self) -> &[ExpectMatch] {
        &self.match_list
    }

    /// Everything fed so far.
    pub fn captured(&self) -> &str {
        &self.captured
    }

    /// Feed one captured line. Returns the response once the expect is
    /// satisfied.
    pub fn feed(&mut self, line: &str) -> Option<ExpectResponse> {
        if self.compiled.is_empty() {
            return None;
        }
        self.captured.push_str(line);
        for chunk in self.window.chunks(line) {
            self.window.push(chunk);
            while let Some(found) = self.search() {
                let start = self.window.absolute_offset(found.start);
                self.match_list.push(ExpectMatch {
                    pattern_index: found.pattern_index,
                    matched: found.matched,
                    groups: found.groups,
                });
                if self.match_list.len() >= self.expected_matches() {
                    return Some(self.success(start));
                }
                // Matched text cannot satisfy a later pattern
                self.window.trim_to(found.end);
            }
        }
        None
    }

    /// Give up and report whatever matched.
    pub fn finish_timed_out(&self) -> ExpectResponse {
        ExpectResponse::timed_out(
            self.mode,
            self.captured.clone(),
            self.match_list.clone(),
            self.remaining(),
            self.started.elapsed(),
        )
    }

    /// Patterns not yet matched.
    pub fn remaining(&self) -> Vec<String> {
        match self.mode {
            ExpectMode::Sequential => self.patterns[self.match_list.len().min(self.patterns.len())..].to_vec(),
            ExpectMode::Any | ExpectMode::All => {
                let matched = self.matched_set();
                self.patterns
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !matched.contains(i))
                    .map(|(_, p)| p.clone())
                    .collect()
            }
        }
    }

    fn expected_matches(&self) -> usize {
        match self.mode {
            ExpectMode::Any => 1,
            ExpectMode::All | ExpectMode::Sequential => self.compiled.len(),
        }
    }

    fn matched_set(&self) -> HashSet<usize> {
        self.match_list.iter().map(|m| m.pattern_index).collect()
    }

    /// Patterns eligible for the next search, in search order.
    fn candidates(&self) -> Vec<usize> {
        match self.mode {
            ExpectMode::Any => (0..self.compiled.len()).collect(),
            ExpectMode::All => {
                let matched = self.matched_set();
                (0..self.compiled.len()).filter(|i| !matched.contains(i)).collect()
            }
            ExpectMode::Sequential => {
                let next = self.match_list.len();
                if next < self.compiled.len() { vec![next] } else { Vec::new() }
            }
        }
    }

    fn search(&self) -> Option<Found> {
        self.candidates().into_iter().find_map(|index| {
            let caps = self.window.search(&self.compiled[index])?;
            let whole = caps.get(0)?;
            Some(Found {
                pattern_index: index,
                start: whole.start(),
                end: whole.end(),
                matched: whole.as_str().to_string(),
                groups: capture_groups(&caps),
            })
        })
    }

    fn success(&self, start: usize) -> ExpectResponse {
        let start = start.min(self.captured.len());
        ExpectResponse::matched(
            self.mode,
            &self.captured[..start],
            &self.captured[start..],
            self.match_list.clone(),
            self.remaining(),
            self.started.elapsed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(patterns: &[&str], mode: ExpectMode) -> ExpectEngine {
        ExpectEngine::new(patterns, mode, 2000).unwrap()
    }

    #[test]
    fn test_any_returns_first_listed_match() {
        let mut e = engine(&["login:", r"root@(\w+):~#"], ExpectMode::Any);
        assert!(e.feed("booting\n").is_none());
        let r = e.feed("root@rpi:~# ").unwrap();
        assert!(r.is_success());
        assert_eq!(r.index, Some(1));
        assert_eq!(r.groups, vec!["rpi"]);
        assert_eq!(r.before, "booting\n");
        assert_eq!(r.after, "root@rpi:~# ");
        assert_eq!(r.remaining, vec!["login:"]);
    }

    #[test]
    fn test_all_remembers_matches_across_lines() {
        let mut e = engine(&["X", "Y"], ExpectMode::All);
        assert!(e.feed("Y ready\n").is_none());
        assert_eq!(e.matches().len(), 1);
        let r = e.feed("X ready\n").unwrap();
        assert_eq!(r.index, Some(0));
        assert_eq!(r.matched_indices(), vec![1, 0]);
        assert!(r.remaining.is_empty());
        assert_eq!(r.before, "Y ready\n");
    }

    #[test]
    fn test_all_matches_on_one_line() {
        let mut e = engine(&["alpha", "beta"], ExpectMode::All);
        let r = e.feed("alpha beta\n").unwrap();
        assert_eq!(r.matched_indices(), vec![0, 1]);
        assert_eq!(r.after, "beta\n");
    }

    #[test]
    fn test_matched_text_is_not_reused() {
        let mut e = engine(&["ok", "ok"], ExpectMode::All);
        assert!(e.feed("ok\n").is_none());
        assert!(e.feed("ok\n").is_some());
    }

    #[test]
    fn test_sequential_requires_order() {
        let mut e = engine(&["first", "second"], ExpectMode::Sequential);
        assert!(e.feed("second\n").is_none());
        assert!(e.matches().is_empty());
        assert!(e.feed("first\n").is_none());
        let r = e.feed("second\n").unwrap();
        assert_eq!(r.index, Some(1));
        assert_eq!(r.before, "second\nfirst\n");
    }

    #[test]
    fn test_timeout_reports_partial_matches() {
        let mut e = engine(&["X", "Y"], ExpectMode::All);
        e.feed("X\n");
        let r = e.finish_timed_out();
        assert!(r.timed_out);
        assert_eq!(r.index, Some(0));
        assert_eq!(r.before, "X\n");
        assert_eq!(r.after, "");
        assert_eq!(r.remaining, vec!["Y"]);
    }

    #[test]
    fn test_old_output_leaves_window() {
        let lines = ["start\n", "xxxxxxxxxxxxxxxx\n", "end\n"];

        let mut small = ExpectEngine::new(&["start.*end"], ExpectMode::Any, 4).unwrap();
        assert!(lines.iter().all(|l| small.feed(l).is_none()));

        let mut large = ExpectEngine::new(&["start.*end"], ExpectMode::Any, 2000).unwrap();
        assert!(lines.iter().any(|l| large.feed(l).is_some()));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ExpectEngine::new(&["(bad"], ExpectMode::Any, 10).is_err());
    }
}
