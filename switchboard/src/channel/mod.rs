//! Line-level helpers shared by capture and expect.
//!
//! Framing raw output into lines, classifying lines as log or response,
//! ANSI stripping, and the tail-limited search window used by expect.

mod ansi;
mod buffer;
mod framer;
mod identifier;
mod patterns;

pub use ansi::strip_ansi;
pub use buffer::SearchWindow;
pub use framer::{DataFramer, InterwovenLogFramer, NewlineFramer};
pub use identifier::{
    AllLog, AllResponse, AllUnknown, LineClassifier, LineType, Multiport, PortLog, RegexLog,
    RegexResponse,
};
pub use patterns::{capture_groups, compile_pattern, compile_patterns};
