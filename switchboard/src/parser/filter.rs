//! Filter files: named regexes that turn log lines into events.
//!
//! ```json
//! {
//!     "description": "Assertion event filter",
//!     "version": {"major": 1, "minor": 0},
//!     "filters": [
//!         {"name": "state", "regex_match": "ASSERT: (.+)", "description": "assert message"}
//!     ]
//! }
//! ```
//!
//! A filter named `state` in `crashes.json` produces events labelled
//! `crashes.state`.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ParserError;

/// Only filter files with this major version are accepted.
pub const FILTER_JSON_FORMAT_MAJOR_VERSION: i64 = 1;

/// A compiled filter.
#[derive(Debug, Clone)]
pub struct Filter {
    /// `<file stem>.<name>`.
    pub label: String,
    pub regex: Regex,
    pub description: Option<String>,
}

impl Filter {
    /// Capture groups if the filter matches `line`. Unmatched optional
    /// groups are returned as empty strings.
    pub fn apply(&self, line: &str) -> Option<Vec<String>> {
        self.regex
            .captures(line)
            .map(|caps| crate::channel::capture_groups(&caps))
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// Event label for filter `name` loaded from `path`.
pub fn full_filter_name(name: &str, path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.{}", stem, name)
}

/// Read and validate one filter file.
pub fn read_filter_file(path: &Path) -> Result<Vec<Filter>, ParserError> {
    let text = std::fs::read_to_string(path).map_err(|source| ParserError::Access {
        path: path.to_path_buf(),
        source,
    })?;
    parse_filter_document(&text, path)
}

/// Validate a filter document. `path` names the file in errors and labels.
pub fn parse_filter_document(text: &str, path: &Path) -> Result<Vec<Filter>, ParserError> {
    let document: Value = serde_json::from_str(text).map_err(|source| ParserError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })?;
    let document = as_object(&document, path, "document")?;

    let version = as_object(required(document, path, "version")?, path, "version")?;
    let major = as_integer(required(version, path, "major")?, path, "major")?;
    as_integer(required(version, path, "minor")?, path, "minor")?;
    if major != FILTER_JSON_FORMAT_MAJOR_VERSION {
        return Err(ParserError::UnsupportedVersion {
            path: path.to_path_buf(),
            major,
        });
    }

    let entries = required(document, path, "filters")?
        .as_array()
        .ok_or_else(|| wrong_type(path, "filters", "a list"))?;

    let mut filters: Vec<Filter> = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry = as_object(entry, path, "filters")?;
        let name = as_string(required(entry, path, "name")?, path, "name")?;
        let pattern = as_string(required(entry, path, "regex_match")?, path, "regex_match")?;
        let label = full_filter_name(name, path);
        if filters.iter().any(|f| f.label == label) {
            return Err(ParserError::DuplicateFilter {
                path: path.to_path_buf(),
                label,
            });
        }
        let regex = Regex::new(pattern).map_err(|source| ParserError::InvalidRegex {
            path: path.to_path_buf(),
            pattern: pattern.to_string(),
            source,
        })?;
        filters.push(Filter {
            label,
            regex,
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    Ok(filters)
}

/// Filter files named by `path`: the file itself, or every `*.json` file in
/// the directory, sorted by name.
pub fn filter_files(path: &Path) -> Result<Vec<PathBuf>, ParserError> {
    let access = |source| ParserError::Access {
        path: path.to_path_buf(),
        source,
    };
    let metadata = std::fs::metadata(path).map_err(access)?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).map_err(access)? {
        let file = entry.map_err(access)?.path();
        if file.extension().is_some_and(|ext| ext == "json") {
            files.push(file);
        } else {
            log::debug!("Skipping file {} missing .json extension", file.display());
        }
    }
    files.sort();
    Ok(files)
}

fn required<'a>(object: &'a Map<String, Value>, path: &Path, key: &str) -> Result<&'a Value, ParserError> {
    object.get(key).ok_or_else(|| ParserError::MissingKey {
        path: path.to_path_buf(),
        key: key.to_string(),
    })
}

fn as_object<'a>(value: &'a Value, path: &Path, key: &str) -> Result<&'a Map<String, Value>, ParserError> {
    value.as_object().ok_or_else(|| wrong_type(path, key, "an object"))
}

fn as_integer(value: &Value, path: &Path, key: &str) -> Result<i64, ParserError> {
    value.as_i64().ok_or_else(|| wrong_type(path, key, "an integer"))
}

fn as_string<'a>(value: &'a Value, path: &Path, key: &str) -> Result<&'a str, ParserError> {
    value.as_str().ok_or_else(|| wrong_type(path, key, "a string"))
}

fn wrong_type(path: &Path, key: &str, expected: &'static str) -> ParserError {
    ParserError::WrongType {
        path: path.to_path_buf(),
        key: key.to_string(),
        expected,
    }
}
