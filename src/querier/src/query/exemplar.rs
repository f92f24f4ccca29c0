//! Exemplar sampling.
//!
//! Backends can return far more exemplars than a panel can show. Events are
//! grouped into step aligned buckets and, within a bucket, only the highest
//! event plus events at least two standard deviations below the previously
//! kept one survive. NaN values sort below every number and never count
//! towards the deviation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use grafana_plugin_sdk::data::Frame;
use prom_api::{ExemplarQueryResult, Labels};
use serde_json::{Map, Value};

use super::model::PrometheusQuery;
use super::response::{TIME_FIELD, VALUE_FIELD, executed_query_string, notices};
use crate::client::Response;
use crate::data::{self, FrameError, string_field, time_field, value_field};

pub const EXEMPLAR_FRAME: &str = "exemplar";

/// Minimum distance to the previously kept value, in standard deviations.
const DEVIATION_FACTOR: f64 = 2.0;

/// One exemplar with the labels of its series merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExemplarEvent {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub labels: Labels,
}

/// Sample the exemplars of a query into a single frame.
///
/// No frame is produced when the backend returned no exemplars.
pub fn exemplars_to_frames(
    response: Response<Vec<ExemplarQueryResult>>,
    query: &PrometheusQuery,
) -> Result<Vec<Frame>, FrameError> {
    let events = flatten(response.data);
    if events.is_empty() {
        return Ok(Vec::new());
    }

    let sampled = sample(events, query.step);

    let mut custom = Map::new();
    custom.insert("resultType".to_string(), Value::from(EXEMPLAR_FRAME));

    let mut frame = events_frame(&sampled);
    frame.meta = Some(data::metadata(
        executed_query_string(query),
        custom,
        notices(&response.warnings, &response.infos),
    ));
    Ok(vec![data::checked(frame)?])
}

/// Flatten per-series exemplars into events that all carry every label key seen.
pub fn flatten(results: Vec<ExemplarQueryResult>) -> Vec<ExemplarEvent> {
    let mut keys = BTreeSet::new();
    let mut events = Vec::new();

    for result in results {
        for exemplar in result.exemplars {
            let mut labels = exemplar.labels;
            labels.extend(
                result
                    .series_labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            keys.extend(labels.keys().cloned());

            // Exemplar times are truncated to whole seconds
            let time = DateTime::from_timestamp(exemplar.timestamp.floor() as i64, 0)
                .unwrap_or_default();
            events.push(ExemplarEvent {
                time,
                value: exemplar.value,
                labels,
            });
        }
    }

    for event in &mut events {
        for key in &keys {
            event.labels.entry(key.clone()).or_default();
        }
    }
    events
}

/// Bucket events by step aligned time and thin out every bucket.
pub fn sample(events: Vec<ExemplarEvent>, step: Duration) -> Vec<ExemplarEvent> {
    let values: Vec<f64> = events
        .iter()
        .map(|event| event.value)
        .filter(|value| !value.is_nan())
        .collect();
    let deviation = standard_deviation(&values);

    let step_secs = step.as_secs_f64().max(0.001);
    let mut buckets: BTreeMap<String, Vec<ExemplarEvent>> = BTreeMap::new();
    for event in events {
        let aligned = (event.time.timestamp() as f64 / step_secs).floor() * step_secs;
        buckets.entry(format!("{aligned:.0}")).or_default().push(event);
    }

    let mut sampled = Vec::new();
    for (_, mut bucket) in buckets {
        // Stable, so equal values keep their arrival order
        bucket.sort_by(|a, b| descending(a.value, b.value));

        let mut kept: Vec<ExemplarEvent> = Vec::new();
        for event in bucket {
            let keep = match kept.last() {
                None => true,
                Some(previous) => {
                    deviation > 0.0
                        && previous.value - event.value >= DEVIATION_FACTOR * deviation
                }
            };
            if keep {
                kept.push(event);
            }
        }
        sampled.extend(kept);
    }
    sampled
}

/// Highest value first, NaN last.
fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// Sample standard deviation. Zero for fewer than two values.
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (squares / (n - 1.0)).sqrt()
}

fn events_frame(events: &[ExemplarEvent]) -> Frame {
    let times = events.iter().map(|event| event.time).collect();
    let values = events.iter().map(|event| event.value).collect();

    let mut label_columns: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for event in events {
        for (label, value) in &event.labels {
            label_columns
                .entry(label.as_str())
                .or_default()
                .push(value.clone());
        }
    }

    let mut fields = vec![
        time_field(TIME_FIELD, times, None),
        value_field(VALUE_FIELD, values, Labels::new(), None),
    ];
    fields.extend(
        label_columns
            .into_iter()
            .map(|(label, column)| string_field(label, column)),
    );

    Frame::new(EXEMPLAR_FRAME).with_fields(fields)
}
