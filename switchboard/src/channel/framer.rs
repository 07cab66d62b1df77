//! Data framers turn raw device text into lines.
//!
//! A complete line always keeps its trailing `\n`. A trailing fragment with no
//! newline is returned last, as-is.

use regex::Regex;

/// Splits incoming device text into lines.
pub trait DataFramer: Send + Sync {
    /// Split `data` into lines.
    fn get_lines(&self, data: &str) -> Vec<String>;
}

/// Split on `\n`, collapsing any `\r` run before it (`"a\r\r\n"` becomes `"a\n"`).
fn split_clean(data: &str) -> impl Iterator<Item = String> + '_ {
    data.split_inclusive('\n').map(|line| match line.strip_suffix('\n') {
        Some(body) => {
            let mut clean = body.trim_end_matches('\r').to_string();
            clean.push('\n');
            clean
        }
        None => line.to_string(),
    })
}

/// Default framer: one line per newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewlineFramer;

impl DataFramer for NewlineFramer {
    fn get_lines(&self, data: &str) -> Vec<String> {
        split_clean(data).collect()
    }
}

/// Extracts log lines that a device interleaves into its command responses.
///
/// Group 1 of `log_line_pattern` is the log line. Whatever remains of the
/// response line after removing the whole match is yielded after it.
#[derive(Debug, Clone)]
pub struct InterwovenLogFramer {
    log_line: Regex,
    add_newline: bool,
}

impl InterwovenLogFramer {
    pub fn new(log_line_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            log_line: Regex::new(log_line_pattern)?,
            add_newline: false,
        })
    }

    /// Append `\n` to extracted log lines whose group omits it.
    pub fn add_newline(mut self, add_newline: bool) -> Self {
        self.add_newline = add_newline;
        self
    }
}

impl DataFramer for InterwovenLogFramer {
    fn get_lines(&self, data: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for raw_line in split_clean(data) {
            if !raw_line.ends_with('\n') {
                lines.push(raw_line);
                continue;
            }
            let Some(caps) = self.log_line.captures(&raw_line) else {
                lines.push(raw_line);
                continue;
            };
            let Some(whole) = caps.get(0) else {
                lines.push(raw_line);
                continue;
            };
            let mut log_line = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            if self.add_newline {
                log_line.push('\n');
            }
            let rest = format!("{}{}", &raw_line[..whole.start()], &raw_line[whole.end()..]);
            lines.push(log_line);
            if !rest.is_empty() {
                lines.push(rest);
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_framer_keeps_partial() {
        let lines = NewlineFramer.get_lines("one\r\ntwo\nthr");
        assert_eq!(lines, vec!["one\n", "two\n", "thr"]);
    }

    #[test]
    fn test_newline_framer_collapses_carriage_returns() {
        assert_eq!(NewlineFramer.get_lines("a\r\r\n"), vec!["a\n"]);
        assert_eq!(NewlineFramer.get_lines("\n"), vec!["\n"]);
    }

    #[test]
    fn test_interwoven_log_extracted() {
        let framer = InterwovenLogFramer::new(r"(<\d+>[^\n]*\n)").unwrap();
        let lines = framer.get_lines("versi<6>kernel: usb 1-1 reset\non 1.2\n");
        assert_eq!(lines, vec!["<6>kernel: usb 1-1 reset\n", "versi", "on 1.2\n"]);

        let lines = framer.get_lines("plain response\n");
        assert_eq!(lines, vec!["plain response\n"]);
    }

    #[test]
    fn test_interwoven_add_newline() {
        let framer = InterwovenLogFramer::new(r"\[LOG (.*?)\]")
            .unwrap()
            .add_newline(true);
        let lines = framer.get_lines("ok [LOG wifi up] done\n");
        assert_eq!(lines, vec!["wifi up\n", "ok  done\n"]);
    }
}
