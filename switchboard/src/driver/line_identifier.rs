//! Read position handle for `read_new_lines`.

/// Marks the next unread line on every port.
///
/// Obtained from [`Switchboard::get_line_identifier`](super::Switchboard::get_line_identifier);
/// each `read_new_lines` call returns what was captured since the mark and
/// moves it forward, so historical output is never processed twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIdentifier {
    marks: Vec<u64>,
}

impl LineIdentifier {
    pub(crate) fn new(marks: Vec<u64>) -> Self {
        Self { marks }
    }

    /// Sequence number of the next unread line on `port`.
    pub fn mark(&self, port: usize) -> Option<u64> {
        self.marks.get(port).copied()
    }

    pub(crate) fn advance(&mut self, port: usize, next: u64) {
        if let Some(mark) = self.marks.get_mut(port) {
            *mark = (*mark).max(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_only_move_forward() {
        let mut id = LineIdentifier::new(vec![3, 0]);
        id.advance(0, 7);
        id.advance(0, 5);
        id.advance(9, 1);
        assert_eq!(id.mark(0), Some(7));
        assert_eq!(id.mark(1), Some(0));
        assert_eq!(id.mark(2), None);
    }
}
