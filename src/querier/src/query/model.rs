use std::time::Duration;

use chrono::{DateTime, Utc};
use common::interval::{DEFAULT_MIN_INTERVAL, IntervalError, SAFE_RESOLUTION, parse_interval};
use common::{IntervalCalculator, TimeRange};
use serde::Deserialize;

use super::DataQuery;
use super::error::QuerierError;
use super::interpolation::{self, Substitutions};

/// Per-query JSON sent by dashboards and alert rules.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryModel {
    pub expr: String,
    pub legend_format: String,
    /// Minimum step, e.g. `30s`, `>1m` or a variable such as `$__interval`
    pub interval: String,
    pub interval_factor: i64,
    pub range: bool,
    pub instant: bool,
    pub exemplar: bool,
    pub utc_offset_sec: i64,
}

/// Normalized query, ready to be executed.
#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusQuery {
    pub ref_id: String,
    pub expr: String,
    pub step: Duration,
    pub legend_format: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub range_query: bool,
    pub instant_query: bool,
    pub exemplar_query: bool,
    pub utc_offset_sec: i64,
}

/// Datasource level inputs of query parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseContext {
    /// Scrape interval of the datasource, if configured
    pub scrape_interval: Option<Duration>,
    /// The request comes from alert evaluation
    pub from_alert: bool,
}

impl PrometheusQuery {
    pub fn parse(
        query: &DataQuery,
        context: &ParseContext,
        calculator: &IntervalCalculator,
    ) -> Result<Self, QuerierError> {
        let model = QueryModel::deserialize(&query.json)?;

        let step = calculate_step(&model, query, context, calculator)?;
        let substitutions = Substitutions::new(
            step,
            &query.time_range,
            context.scrape_interval,
            interpolation::is_rate_interval(&model.interval),
        )?;
        let expr = substitutions.apply(&model.expr);

        // Saved queries from before the range/instant flags existed are range queries
        let range_query = model.range || !model.instant;

        Ok(Self {
            ref_id: query.ref_id.clone(),
            expr,
            step,
            legend_format: model.legend_format,
            start: query.time_range.from,
            end: query.time_range.to,
            range_query,
            instant_query: model.instant,
            exemplar_query: model.exemplar && !context.from_alert,
            utc_offset_sec: model.utc_offset_sec,
        })
    }
}

/// Minimum step, taken from the first source that is set.
///
/// Sources in precedence order: the request's `intervalMs` (read once into
/// [`DataQuery::interval_ms`]), the query's `interval` string, the
/// datasource scrape interval.
pub fn min_interval(
    model: &QueryModel,
    query: &DataQuery,
    scrape_interval: Option<Duration>,
) -> Result<Duration, QuerierError> {
    let interval_ms = u64::try_from(query.interval_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);

    let interval = if model.interval.trim().is_empty() || interpolation::is_variable(&model.interval)
    {
        None
    } else {
        Some(parse_interval(&model.interval)?)
    };

    let sources = [interval_ms, interval, scrape_interval];
    Ok(sources
        .into_iter()
        .flatten()
        .next()
        .unwrap_or(DEFAULT_MIN_INTERVAL))
}

fn calculate_step(
    model: &QueryModel,
    query: &DataQuery,
    context: &ParseContext,
    calculator: &IntervalCalculator,
) -> Result<Duration, QuerierError> {
    let min_interval = min_interval(model, query, context.scrape_interval)?;
    let range: &TimeRange = &query.time_range;

    let calculated = calculator.calculate(range, min_interval, query.max_data_points);
    let safe = calculator.calculate_safe_interval(range, SAFE_RESOLUTION);
    let adjusted = calculated.value.max(safe.value);

    if interpolation::is_rate_interval(&model.interval) {
        return interpolation::rate_interval(adjusted, context.scrape_interval)
            .map_err(QuerierError::from);
    }

    let factor = if model.interval_factor > 0 {
        u32::try_from(model.interval_factor).map_err(|_| {
            IntervalError::OutOfRange(format!("interval factor {}", model.interval_factor))
        })?
    } else {
        1
    };
    adjusted.checked_mul(factor).ok_or_else(|| {
        QuerierError::from(IntervalError::OutOfRange(format!(
            "step of {adjusted:?} times {factor}"
        )))
    })
}
