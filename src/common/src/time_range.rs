use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Absolute time range of a query, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Build a range from epoch milliseconds. Out of range values clamp to the epoch.
    pub fn from_millis(from_ms: i64, to_ms: i64) -> Self {
        Self {
            from: DateTime::from_timestamp_millis(from_ms).unwrap_or_default(),
            to: DateTime::from_timestamp_millis(to_ms).unwrap_or_default(),
        }
    }

    /// Span in nanoseconds. Inverted ranges yield zero.
    pub fn span_nanos(&self) -> u64 {
        let span = self.to - self.from;
        let nanos = span
            .num_nanoseconds()
            .unwrap_or_else(|| span.num_milliseconds().saturating_mul(1_000_000));
        nanos.max(0) as u64
    }

    /// Span in milliseconds. Inverted ranges yield zero.
    pub fn span_millis(&self) -> i64 {
        (self.to - self.from).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span() {
        let range = TimeRange::from_millis(0, 5 * 60 * 1000);
        assert_eq!(range.span_millis(), 300_000);
        assert_eq!(range.span_nanos(), 300_000_000_000);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let range = TimeRange::from_millis(10_000, 0);
        assert_eq!(range.span_millis(), 0);
        assert_eq!(range.span_nanos(), 0);
    }
}
