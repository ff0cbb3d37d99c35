//! Analyzer stdout protocol
//!
//! Analyzers print zero or more `PROGRESS:<int>` lines followed by one
//! `RESULT:<json>` line. Anything else on stdout is ignored.

pub const PROGRESS_PREFIX: &str = "PROGRESS:";
pub const RESULT_PREFIX: &str = "RESULT:";

/// Progress percentage from a `PROGRESS:` line
///
/// Malformed values yield `None` and are ignored by the caller.
pub fn parse_progress_line(line: &str) -> Option<u32> {
    line.trim()
        .strip_prefix(PROGRESS_PREFIX)
        .and_then(|value| value.trim().parse().ok())
}

/// JSON text of a `RESULT:` line
pub fn parse_result_line(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(RESULT_PREFIX)
        .map(str::trim)
}

/// Forwards only strictly increasing progress values
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<u32>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(value)` when `value` exceeds everything seen so far
    pub fn observe(&mut self, value: u32) -> Option<u32> {
        match self.last {
            Some(last) if value <= last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lines() {
        assert_eq!(parse_progress_line("PROGRESS:42"), Some(42));
        assert_eq!(parse_progress_line("PROGRESS: 7\r"), Some(7));
        assert_eq!(parse_progress_line("PROGRESS:abc"), None);
        assert_eq!(parse_progress_line("PROGRESS:-5"), None);
        assert_eq!(parse_progress_line("progress:5"), None);
        assert_eq!(parse_progress_line("loading model"), None);
    }

    #[test]
    fn test_result_line() {
        assert_eq!(parse_result_line("RESULT:{\"tempo\":120}"), Some("{\"tempo\":120}"));
        assert_eq!(parse_result_line("RESULT:"), Some(""));
        assert_eq!(parse_result_line("PROGRESS:10"), None);
    }

    #[test]
    fn test_tracker_drops_non_increasing() {
        let mut tracker = ProgressTracker::new();
        let forwarded: Vec<u32> = [10, 5, 10, 30, 20, 100]
            .into_iter()
            .filter_map(|v| tracker.observe(v))
            .collect();

        assert_eq!(forwarded, vec![10, 30, 100]);
        assert_eq!(tracker.last(), Some(100));
    }

    #[test]
    fn test_tracker_forwards_zero_first() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.observe(0), Some(0));
        assert_eq!(tracker.observe(0), None);
    }
}
