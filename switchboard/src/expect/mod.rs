//! Expect: wait until captured output matches a set of patterns.
//!
//! The [`ExpectEngine`] holds the matching state. The waiter subscribes to
//! the lines published by the port tasks, feeds the engine, and gives up at
//! the deadline or when every port it listens on closes.

mod engine;
mod response;
mod wait;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::LineType;

pub use engine::ExpectEngine;
pub use response::{ExpectMatch, ExpectResponse};
pub(crate) use wait::ExpectWaiter;

/// Default bound on an expect.
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a pattern list is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectMode {
    /// Any one pattern.
    #[default]
    Any,
    /// Every pattern, in any order.
    All,
    /// Every pattern, in list order.
    Sequential,
}

impl fmt::Display for ExpectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExpectMode::Any => "any",
            ExpectMode::All => "all",
            ExpectMode::Sequential => "sequential",
        })
    }
}

impl FromStr for ExpectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(ExpectMode::Any),
            "all" => Ok(ExpectMode::All),
            "sequential" => Ok(ExpectMode::Sequential),
            other => Err(format!(
                "invalid expect mode {:?}, expecting one of any, all, sequential",
                other
            )),
        }
    }
}

/// Options for one expect.
#[derive(Debug, Clone)]
pub struct ExpectOptions {
    pub mode: ExpectMode,

    pub timeout: Duration,

    /// Chunk size of the search window; the window holds two chunks.
    /// `None` uses the switchboard's configured size.
    pub search_window_size: Option<usize>,

    /// Port to listen on. `None` listens on every port.
    pub port: Option<usize>,

    /// Lines the classifier must accept to be searched.
    pub line_type: LineType,

    /// Fail with a timeout error instead of returning a timed out response.
    pub raise_for_timeout: bool,
}

impl Default for ExpectOptions {
    fn default() -> Self {
        Self {
            mode: ExpectMode::Any,
            timeout: DEFAULT_EXPECT_TIMEOUT,
            search_window_size: None,
            port: None,
            line_type: LineType::All,
            raise_for_timeout: false,
        }
    }
}

impl ExpectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ExpectMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn search_window_size(mut self, size: usize) -> Self {
        self.search_window_size = Some(size);
        self
    }

    pub fn port(mut self, port: usize) -> Self {
        self.port = Some(port);
        self
    }

    pub fn line_type(mut self, line_type: LineType) -> Self {
        self.line_type = line_type;
        self
    }

    pub fn raise_for_timeout(mut self, raise: bool) -> Self {
        self.raise_for_timeout = raise;
        self
    }
}
