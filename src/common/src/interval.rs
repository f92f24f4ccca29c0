//! Query interval (step) calculation.
//!
//! Turns a time range and a data point budget into a step that lies on a
//! fixed ladder of human friendly durations, and parses/formats the interval
//! strings used by dashboards (`15s`, `1m`, `>10s`, `1d`).

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::time_range::TimeRange;

/// Resolution used when a query carries no max data points hint.
pub const DEFAULT_RESOLUTION: u64 = 1500;

/// Point budget of the safe interval, bounding resolution for the backend.
pub const SAFE_RESOLUTION: u64 = 11000;

/// Minimum interval used when neither the query nor the datasource sets one.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(15);

const MILLISECOND: u64 = 1_000_000;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

/// (upper bound, rounded value) pairs in nanoseconds.
const LADDER: &[(u64, u64)] = &[
    (10 * MILLISECOND, MILLISECOND),
    (15 * MILLISECOND, 10 * MILLISECOND),
    (35 * MILLISECOND, 20 * MILLISECOND),
    (75 * MILLISECOND, 50 * MILLISECOND),
    (150 * MILLISECOND, 100 * MILLISECOND),
    (350 * MILLISECOND, 200 * MILLISECOND),
    (750 * MILLISECOND, 500 * MILLISECOND),
    (1500 * MILLISECOND, SECOND),
    (3500 * MILLISECOND, 2 * SECOND),
    (7500 * MILLISECOND, 5 * SECOND),
    (12500 * MILLISECOND, 10 * SECOND),
    (17500 * MILLISECOND, 15 * SECOND),
    (25 * SECOND, 20 * SECOND),
    (45 * SECOND, 30 * SECOND),
    (90 * SECOND, MINUTE),
    (210 * SECOND, 2 * MINUTE),
    (450 * SECOND, 5 * MINUTE),
    (750 * SECOND, 10 * MINUTE),
    (1050 * SECOND, 15 * MINUTE),
    (25 * MINUTE, 20 * MINUTE),
    (45 * MINUTE, 30 * MINUTE),
    (90 * MINUTE, HOUR),
    (150 * MINUTE, 2 * HOUR),
    (270 * MINUTE, 3 * HOUR),
    (9 * HOUR, 6 * HOUR),
    (DAY, 12 * HOUR),
    (2 * DAY, DAY),
    (WEEK, DAY),
    (3 * WEEK, WEEK),
];

/// Everything below six weeks that fell off the ladder rounds to 30 days.
const MONTH_BOUND: u64 = 6 * WEEK;
const MONTH: u64 = 30 * DAY;

static DATE_UNIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([dwMy])$").expect("valid date unit pattern"));

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|ms|s|m|h))+$")
        .expect("valid duration pattern")
});

static DURATION_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h)").expect("valid component pattern")
});

static PURE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("valid number pattern"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("invalid interval: {0:?}")]
    Invalid(String),
    #[error("interval out of range: {0:?}")]
    OutOfRange(String),
}

/// A step duration together with its dashboard text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub text: String,
    pub value: Duration,
}

impl Interval {
    pub fn new(value: Duration) -> Self {
        Self {
            text: format_duration(value),
            value,
        }
    }
}

/// Computes query steps from a time range and a resolution.
#[derive(Debug, Clone, Copy)]
pub struct IntervalCalculator {
    default_resolution: u64,
}

impl Default for IntervalCalculator {
    fn default() -> Self {
        Self {
            default_resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl IntervalCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step for `max_data_points` points over `range`, never below `min_interval`.
    ///
    /// When the raw step is already under the minimum the minimum is returned
    /// as is, without snapping it onto the ladder.
    pub fn calculate(
        &self,
        range: &TimeRange,
        min_interval: Duration,
        max_data_points: i64,
    ) -> Interval {
        let resolution = if max_data_points > 0 {
            max_data_points as u64
        } else {
            self.default_resolution
        };

        let raw = Duration::from_nanos(range.span_nanos() / resolution);
        if raw < min_interval {
            return Interval::new(min_interval);
        }

        Interval::new(round_interval(raw).max(min_interval))
    }

    /// Ladder-rounded step for a fixed point budget, with no minimum floor.
    pub fn calculate_safe_interval(&self, range: &TimeRange, safe_resolution: u64) -> Interval {
        let raw = Duration::from_nanos(range.span_nanos() / safe_resolution.max(1));
        Interval::new(round_interval(raw))
    }
}

/// Snap a duration onto the step ladder.
pub fn round_interval(interval: Duration) -> Duration {
    let nanos = interval.as_nanos().min(u64::MAX as u128) as u64;
    let rounded = LADDER
        .iter()
        .find(|(bound, _)| nanos <= *bound)
        .map(|(_, value)| *value)
        .unwrap_or(if nanos < MONTH_BOUND { MONTH } else { YEAR });
    Duration::from_nanos(rounded)
}

/// Format using the largest whole unit, truncating the rest (`90s` -> `1m`).
pub fn format_duration(interval: Duration) -> String {
    let nanos = interval.as_nanos();
    let units: [(u64, &str); 6] = [
        (YEAR, "y"),
        (DAY, "d"),
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (MILLISECOND, "ms"),
    ];

    units
        .iter()
        .find(|(unit, _)| nanos >= *unit as u128)
        .map(|(unit, suffix)| format!("{}{suffix}", nanos / *unit as u128))
        .unwrap_or_else(|| "1ms".to_string())
}

/// Format a duration exactly, e.g. `1m15s`, `2h`, `250ms`.
pub fn format_exact(interval: Duration) -> String {
    let mut remaining = interval.as_nanos();
    if remaining == 0 {
        return "0s".to_string();
    }

    let units: [(u64, &str); 6] = [
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (MILLISECOND, "ms"),
        (1000, "us"),
        (1, "ns"),
    ];

    let mut out = String::new();
    for (unit, suffix) in units {
        let count = remaining / unit as u128;
        if count > 0 {
            out.push_str(&format!("{count}{suffix}"));
            remaining -= count * unit as u128;
        }
    }
    out
}

/// Parse a dashboard interval string.
///
/// Accepts a leading `<` or `>`, bare numbers (seconds), the calendar units
/// `d`, `w`, `M`, `y` and compound durations such as `1h30m` or `1.5s`.
pub fn parse_interval(interval: &str) -> Result<Duration, IntervalError> {
    let mut formatted = interval.trim().replacen('<', "", 1).replacen('>', "", 1);
    if PURE_NUMBER.is_match(&formatted) {
        formatted.push('s');
    }
    parse_duration(&formatted)
}

/// Parse a duration with calendar units (`d`, `w`, `M`, `y`) or compound form.
pub fn parse_duration(input: &str) -> Result<Duration, IntervalError> {
    if let Some(captures) = DATE_UNIT_PATTERN.captures(input) {
        let count: u64 = captures[1]
            .parse()
            .map_err(|_| IntervalError::OutOfRange(input.to_string()))?;
        let unit = match &captures[2] {
            "d" => DAY,
            "w" => WEEK,
            "M" => MONTH,
            _ => YEAR,
        };
        return count
            .checked_mul(unit)
            .map(Duration::from_nanos)
            .ok_or_else(|| IntervalError::OutOfRange(input.to_string()));
    }

    if input == "0" {
        return Ok(Duration::ZERO);
    }

    if !DURATION_PATTERN.is_match(input) {
        return Err(IntervalError::Invalid(input.to_string()));
    }

    let mut total = 0f64;
    for captures in DURATION_COMPONENT.captures_iter(input) {
        let value: f64 = captures[1]
            .parse()
            .map_err(|_| IntervalError::Invalid(input.to_string()))?;
        let unit = match &captures[2] {
            "ns" => 1,
            "us" | "µs" => 1000,
            "ms" => MILLISECOND,
            "s" => SECOND,
            "m" => MINUTE,
            _ => HOUR,
        };
        total += value * unit as f64;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(IntervalError::OutOfRange(input.to_string()));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
