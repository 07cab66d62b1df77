//! Line classification: is a captured line device log or command response?
//!
//! Expect and `read_new_lines` filter on a [`LineType`]; the classifier
//! configured on the switchboard decides which lines pass.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

/// Kind of line a caller is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    #[default]
    All,
    Log,
    Response,
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LineType::All => "all",
            LineType::Log => "log",
            LineType::Response => "response",
        })
    }
}

/// Decides whether a line from a port belongs to the requested line type.
pub trait LineClassifier: Send + Sync {
    fn accept(&self, port: usize, line: &str, line_type: LineType) -> bool;
}

/// Every line is unknown and accepted for every line type. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllUnknown;

impl LineClassifier for AllUnknown {
    fn accept(&self, _port: usize, _line: &str, _line_type: LineType) -> bool {
        true
    }
}

/// Every line is a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllLog;

impl LineClassifier for AllLog {
    fn accept(&self, _port: usize, _line: &str, line_type: LineType) -> bool {
        matches!(line_type, LineType::All | LineType::Log)
    }
}

/// Every line is a response line.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllResponse;

impl LineClassifier for AllResponse {
    fn accept(&self, _port: usize, _line: &str, line_type: LineType) -> bool {
        matches!(line_type, LineType::All | LineType::Response)
    }
}

/// Lines from `log_ports` are logs; everything else is a response.
#[derive(Debug, Clone)]
pub struct PortLog {
    log_ports: Vec<usize>,
}

impl PortLog {
    /// Port 1 is the log port when `log_ports` is empty.
    pub fn new(log_ports: Vec<usize>) -> Self {
        let log_ports = if log_ports.is_empty() { vec![1] } else { log_ports };
        Self { log_ports }
    }
}

impl Default for PortLog {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LineClassifier for PortLog {
    fn accept(&self, port: usize, _line: &str, line_type: LineType) -> bool {
        if self.log_ports.contains(&port) {
            matches!(line_type, LineType::All | LineType::Log)
        } else {
            matches!(line_type, LineType::All | LineType::Response)
        }
    }
}

/// Lines matching a regex are of `match_type`; others are unknown.
#[derive(Debug, Clone)]
struct RegexClassifier {
    pattern: Regex,
    match_type: LineType,
}

impl RegexClassifier {
    fn new(pattern: &str, match_type: LineType, anchored: bool) -> Result<Self, regex::Error> {
        // Anchored mode matches only at the start of the line
        let pattern = if anchored {
            Regex::new(&format!(r"\A(?:{})", pattern))?
        } else {
            Regex::new(pattern)?
        };
        Ok(Self {
            pattern,
            match_type,
        })
    }

    fn accept(&self, line: &str, line_type: LineType) -> bool {
        if line_type == LineType::All {
            return true;
        }
        let is_type = self.pattern.is_match(line);
        if line_type == self.match_type {
            is_type
        } else {
            !is_type
        }
    }
}

/// Lines matching the pattern are logs; all others are unknown.
#[derive(Debug, Clone)]
pub struct RegexLog(RegexClassifier);

impl RegexLog {
    pub fn new(log_pattern: &str) -> Result<Self, regex::Error> {
        RegexClassifier::new(log_pattern, LineType::Log, false).map(Self)
    }

    /// Pattern must match at the start of the line.
    pub fn anchored(log_pattern: &str) -> Result<Self, regex::Error> {
        RegexClassifier::new(log_pattern, LineType::Log, true).map(Self)
    }
}

impl LineClassifier for RegexLog {
    fn accept(&self, _port: usize, line: &str, line_type: LineType) -> bool {
        self.0.accept(line, line_type)
    }
}

/// Lines matching the pattern are responses; all others are unknown.
#[derive(Debug, Clone)]
pub struct RegexResponse(RegexClassifier);

impl RegexResponse {
    pub fn new(response_pattern: &str) -> Result<Self, regex::Error> {
        RegexClassifier::new(response_pattern, LineType::Response, false).map(Self)
    }

    pub fn anchored(response_pattern: &str) -> Result<Self, regex::Error> {
        RegexClassifier::new(response_pattern, LineType::Response, true).map(Self)
    }
}

impl LineClassifier for RegexResponse {
    fn accept(&self, _port: usize, line: &str, line_type: LineType) -> bool {
        self.0.accept(line, line_type)
    }
}

/// One classifier per port. Ports without one accept everything.
#[derive(Clone, Default)]
pub struct Multiport {
    classifiers: Vec<Arc<dyn LineClassifier>>,
}

impl Multiport {
    pub fn new(classifiers: Vec<Arc<dyn LineClassifier>>) -> Self {
        Self { classifiers }
    }
}

impl LineClassifier for Multiport {
    fn accept(&self, port: usize, line: &str, line_type: LineType) -> bool {
        match self.classifiers.get(port) {
            Some(classifier) => classifier.accept(port, line, line_type),
            None => true,
        }
    }
}

impl fmt::Debug for Multiport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiport")
            .field("ports", &self.classifiers.len())
            .finish()
    }
}
