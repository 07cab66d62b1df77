//! Search window with tail-limited pattern search.
//!
//! Expect only ever searches the most recent `2 * search_window_size` bytes
//! of output. Lines are appended in `search_window_size` chunks so a single
//! huge line cannot push a match out of the window before it is searched.

use regex::{Captures, Regex};

/// Rolling window of recent output for pattern search.
#[derive(Debug)]
pub struct SearchWindow {
    /// Text currently searchable.
    window: String,

    /// Chunk size used when appending lines.
    search_window_size: usize,

    /// Total bytes ever appended. Lets callers map window offsets back to
    /// offsets in the full capture.
    consumed: usize,
}

impl SearchWindow {
    /// Create a window searching the last `2 * search_window_size` bytes.
    ///
    /// # Arguments
    ///
    /// * `search_window_size` - Chunk size; the window holds two chunks.
    pub fn new(search_window_size: usize) -> Self {
        let search_window_size = search_window_size.max(1);
        Self {
            window: String::with_capacity(search_window_size * 2),
            search_window_size,
            consumed: 0,
        }
    }

    /// Split a line into the chunks it is appended in.
    pub fn chunks<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < line.len() {
            let end = ceil_char_boundary(line, start + self.search_window_size);
            chunks.push(&line[start..end]);
            start = end;
        }
        chunks
    }

    /// Append one chunk, dropping the oldest text beyond the window capacity.
    pub fn push(&mut self, chunk: &str) {
        self.consumed += chunk.len();
        self.window.push_str(chunk);
        let capacity = self.search_window_size * 2;
        if self.window.len() > capacity {
            let cut = ceil_char_boundary(&self.window, self.window.len() - capacity);
            self.window.drain(..cut);
        }
    }

    /// Search the window.
    pub fn search<'w>(&'w self, pattern: &Regex) -> Option<Captures<'w>> {
        pattern.captures(&self.window)
    }

    /// Drop everything up to `end` so text already matched cannot match again.
    pub fn trim_to(&mut self, end: usize) {
        let end = ceil_char_boundary(&self.window, end.min(self.window.len()));
        self.window.drain(..end);
    }

    /// Convert an offset in the window into an offset in the full capture.
    pub fn absolute_offset(&self, offset: usize) -> usize {
        self.consumed - self.window.len() + offset
    }

    /// Get the searchable text.
    pub fn as_str(&self) -> &str {
        &self.window
    }

    /// Get the current window length.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Check if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Get the chunk size.
    pub fn search_window_size(&self) -> usize {
        self.search_window_size
    }
}

impl Default for SearchWindow {
    fn default() -> Self {
        Self::new(crate::config::SEARCH_WINDOW_SIZE)
    }
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
