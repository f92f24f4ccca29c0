//! Built-in variable substitution for PromQL expressions.

use std::time::Duration;

use common::TimeRange;
use common::interval::{DEFAULT_MIN_INTERVAL, IntervalError, format_duration, format_exact};

/// Built-in variables, each with its bare and braced spelling.
const VARIABLES: &[(Variable, [&str; 2])] = &[
    (Variable::Interval, ["$__interval", "${__interval}"]),
    (Variable::IntervalMs, ["$__interval_ms", "${__interval_ms}"]),
    (Variable::Range, ["$__range", "${__range}"]),
    (Variable::RangeS, ["$__range_s", "${__range_s}"]),
    (Variable::RangeMs, ["$__range_ms", "${__range_ms}"]),
    (Variable::RateInterval, ["$__rate_interval", "${__rate_interval}"]),
    (Variable::RateIntervalMs, ["$__rate_interval_ms", "${__rate_interval_ms}"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Interval,
    IntervalMs,
    Range,
    RangeS,
    RangeMs,
    RateInterval,
    RateIntervalMs,
}

fn spellings(variable: Variable) -> [&'static str; 2] {
    VARIABLES
        .iter()
        .find(|(v, _)| *v == variable)
        .map(|(_, forms)| *forms)
        .unwrap_or_default()
}

/// Whether an interval string is one of the interval variables rather than a duration.
pub fn is_variable(interval: &str) -> bool {
    let interval = interval.trim();
    [
        Variable::Interval,
        Variable::IntervalMs,
        Variable::RateInterval,
        Variable::RateIntervalMs,
    ]
    .into_iter()
    .any(|v| spellings(v).contains(&interval))
}

pub fn is_rate_interval(interval: &str) -> bool {
    spellings(Variable::RateInterval).contains(&interval.trim())
}

/// `max(interval + scrape, 4 * scrape)`, with a 15s scrape interval by default.
pub fn rate_interval(
    interval: Duration,
    scrape_interval: Option<Duration>,
) -> Result<Duration, IntervalError> {
    let scrape = scrape_interval.unwrap_or(DEFAULT_MIN_INTERVAL);
    let sum = interval
        .checked_add(scrape)
        .ok_or_else(|| IntervalError::OutOfRange(format!("rate interval of {interval:?}")))?;
    let floor = scrape
        .checked_mul(4)
        .ok_or_else(|| IntervalError::OutOfRange(format!("scrape interval {scrape:?}")))?;
    Ok(sum.max(floor))
}

/// Resolved variable values, applied longest token first so that
/// `$__interval` never matches inside `$__interval_ms`.
#[derive(Debug, Clone)]
pub struct Substitutions {
    table: Vec<(&'static str, String)>,
}

impl Substitutions {
    /// `step_is_rate_interval` marks queries whose interval was `$__rate_interval`,
    /// in which case the step already is the rate interval.
    pub fn new(
        step: Duration,
        range: &TimeRange,
        scrape_interval: Option<Duration>,
        step_is_rate_interval: bool,
    ) -> Result<Self, IntervalError> {
        let range_ms = range.span_millis();
        let range_s = (range_ms as f64 / 1000.0).round() as i64;
        let rate = if step_is_rate_interval {
            step
        } else {
            rate_interval(step, scrape_interval)?
        };

        let mut table: Vec<(&'static str, String)> = VARIABLES
            .iter()
            .flat_map(|(variable, forms)| {
                let value = match variable {
                    Variable::Interval => format_duration(step),
                    Variable::IntervalMs => step.as_millis().to_string(),
                    Variable::Range => format!("{range_s}s"),
                    Variable::RangeS => range_s.to_string(),
                    Variable::RangeMs => range_ms.to_string(),
                    Variable::RateInterval => format_exact(rate),
                    Variable::RateIntervalMs => rate.as_millis().to_string(),
                };
                (*forms).map(|form| (form, value.clone()))
            })
            .collect();
        table.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        Ok(Self { table })
    }

    pub fn apply(&self, expr: &str) -> String {
        if !expr.contains('$') {
            return expr.to_string();
        }

        self.table
            .iter()
            .fold(expr.to_string(), |acc, (token, value)| acc.replace(token, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn substitutions(step: Duration, range_ms: i64) -> Substitutions {
        Substitutions::new(step, &TimeRange::from_millis(0, range_ms), None, false).unwrap()
    }

    #[test]
    fn test_interval_variables() {
        let subs = substitutions(Duration::from_secs(120), 3_600_000);

        assert_eq!(subs.apply("rate(x[$__interval])"), "rate(x[2m])");
        assert_eq!(subs.apply("rate(x[${__interval}])"), "rate(x[2m])");
        assert_eq!(subs.apply("$__interval_ms"), "120000");
        assert_eq!(subs.apply("${__interval_ms}"), "120000");
        assert_eq!(
            subs.apply("$__interval $__interval_ms ${__interval} ${__interval_ms}"),
            "2m 120000 2m 120000"
        );
    }

    #[test]
    fn test_range_variables() {
        let subs = substitutions(Duration::from_secs(15), 3_600_000);

        assert_eq!(subs.apply("increase(x[$__range])"), "increase(x[3600s])");
        assert_eq!(subs.apply("${__range}"), "3600s");
        assert_eq!(subs.apply("$__range_s"), "3600");
        assert_eq!(subs.apply("${__range_s}"), "3600");
        assert_eq!(subs.apply("$__range_ms"), "3600000");
        assert_eq!(subs.apply("${__range_ms}"), "3600000");
    }

    #[test]
    fn test_range_seconds_round_half_away_from_zero() {
        assert_eq!(substitutions(Duration::from_secs(1), 499).apply("$__range_s"), "0");
        assert_eq!(substitutions(Duration::from_secs(1), 500).apply("$__range_s"), "1");
        assert_eq!(substitutions(Duration::from_secs(1), 999).apply("$__range"), "1s");
        assert_eq!(substitutions(Duration::from_secs(1), 1_499).apply("$__range_s"), "1");
        assert_eq!(substitutions(Duration::from_secs(1), 1_500).apply("$__range_s"), "2");
    }

    #[test]
    fn test_rate_interval() {
        let subs = substitutions(Duration::from_secs(60), 3_600_000);
        // max(60s + 15s, 60s)
        assert_eq!(subs.apply("rate(x[$__rate_interval])"), "rate(x[1m15s])");
        assert_eq!(subs.apply("rate(x[${__rate_interval}])"), "rate(x[1m15s])");
        assert_eq!(subs.apply("$__rate_interval_ms"), "75000");

        let subs = Substitutions::new(
            Duration::from_secs(10),
            &TimeRange::from_millis(0, 3_600_000),
            Some(Duration::from_secs(30)),
            false,
        )
        .unwrap();
        // max(10s + 30s, 120s)
        assert_eq!(subs.apply("$__rate_interval"), "2m");
    }

    #[test]
    fn test_rate_interval_step() {
        let subs = Substitutions::new(
            Duration::from_secs(90),
            &TimeRange::from_millis(0, 3_600_000),
            None,
            true,
        )
        .unwrap();
        assert_eq!(subs.apply("rate(x[$__rate_interval])"), "rate(x[1m30s])");
    }

    #[test]
    fn test_rate_interval_overflow() {
        assert!(rate_interval(Duration::MAX, None).is_err());
        assert!(rate_interval(Duration::ZERO, Some(Duration::MAX / 2)).is_err());
        assert_eq!(
            rate_interval(Duration::from_secs(60), None).unwrap(),
            Duration::from_secs(75)
        );

        let result = Substitutions::new(
            Duration::MAX,
            &TimeRange::from_millis(0, 3_600_000),
            None,
            false,
        );
        assert!(matches!(result, Err(IntervalError::OutOfRange(_))));
    }

    #[test]
    fn test_expression_without_variables_is_unchanged() {
        let subs = substitutions(Duration::from_secs(120), 3_600_000);
        for expr in ["up", "sum by (job) (rate(http_requests_total[5m]))", "$foo + ${bar}"] {
            assert_eq!(subs.apply(expr), expr);
        }
    }

    #[test]
    fn test_is_variable() {
        assert!(is_variable("$__interval"));
        assert!(is_variable("${__rate_interval}"));
        assert!(is_variable(" $__interval_ms "));
        assert!(!is_variable("15s"));
        assert!(!is_variable("$__range"));

        assert!(is_rate_interval("$__rate_interval"));
        assert!(!is_rate_interval("$__interval"));
    }
}
