//! Log event parsing.
//!
//! Filters loaded from JSON filter files are applied to every captured line.
//! Matches are appended to the device's event file, one JSON object per line,
//! and the file answers the history queries.

mod event_parser;
mod filter;
mod record;

pub use event_parser::{event_file_path_for, EventParser};
pub use filter::{
    filter_files, full_filter_name, parse_filter_document, read_filter_file, Filter,
    FILTER_JSON_FORMAT_MAJOR_VERSION,
};
pub use record::{parse_timestamp, EventRecord, ParserResult};
