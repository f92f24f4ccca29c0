//! Conversion of instant and range query results into frames.

use chrono::{DateTime, Utc};
use common::interval::format_exact;
use grafana_plugin_sdk::data::{Field, Frame, Metadata, Notice, Severity};
use prom_api::{InstantSample, Labels, QueryResult, RangeSeries, SamplePair, format_sample_value};
use serde_json::{Map, Value};

use super::error::QuerierError;
use super::legend::LegendFormatter;
use super::model::PrometheusQuery;
use crate::client::Response;
use crate::data::{self, time_field, value_field};

pub const TIME_FIELD: &str = "Time";
pub const VALUE_FIELD: &str = "Value";

/// Build one frame per series (matrix, vector) or a single frame (scalar).
pub fn query_result_to_frames(
    response: Response<QueryResult>,
    query: &PrometheusQuery,
    legend: &LegendFormatter,
) -> Result<Vec<Frame>, QuerierError> {
    let result_type = response.data.result_type();
    let frames = match response.data {
        QueryResult::Matrix(series) => series
            .into_iter()
            .map(|series| matrix_frame(series, query, legend))
            .collect::<Result<Vec<_>, _>>()?,
        QueryResult::Vector(samples) => samples
            .into_iter()
            .map(|sample| vector_frame(sample, query, legend))
            .collect::<Result<Vec<_>, _>>()?,
        QueryResult::Scalar(sample) => vec![scalar_frame(sample, query)],
    };

    let notices = notices(&response.warnings, &response.infos);
    frames
        .into_iter()
        .map(|mut frame| {
            frame.meta = Some(frame_meta(query, result_type, notices.clone()));
            data::checked(frame).map_err(QuerierError::from)
        })
        .collect()
}

/// Backend warnings and infos as frame notices.
pub fn notices(warnings: &[String], infos: &[String]) -> Vec<Notice> {
    warnings
        .iter()
        .map(|text| data::notice(Severity::Warning, text.as_str()))
        .chain(infos.iter().map(|text| data::notice(Severity::Info, text.as_str())))
        .collect()
}

fn frame_meta(query: &PrometheusQuery, result_type: &str, notices: Vec<Notice>) -> Metadata {
    let mut custom = Map::new();
    custom.insert("resultType".to_string(), Value::from(result_type));
    custom.insert("step".to_string(), Value::from(query.step.as_millis() as u64));

    data::metadata(executed_query_string(query), custom, notices)
}

pub fn executed_query_string(query: &PrometheusQuery) -> String {
    format!("Expr: {}\nStep: {}", query.expr, format_exact(query.step))
}

fn matrix_frame(
    series: RangeSeries,
    query: &PrometheusQuery,
    legend: &LegendFormatter,
) -> Result<Frame, QuerierError> {
    if series.histograms.is_some() {
        return Err(QuerierError::NotImplemented(
            "native histogram series".to_string(),
        ));
    }

    let (times, values) = columns(&series.values);
    Ok(series_frame(series.metric, times, values, query, legend))
}

fn vector_frame(
    sample: InstantSample,
    query: &PrometheusQuery,
    legend: &LegendFormatter,
) -> Result<Frame, QuerierError> {
    let pair = match (sample.value, sample.histogram) {
        (Some(pair), _) => pair,
        (None, Some(_)) => {
            return Err(QuerierError::NotImplemented(
                "native histogram samples".to_string(),
            ));
        }
        (None, None) => {
            return Err(QuerierError::InvalidResponse(
                "vector sample without value".to_string(),
            ));
        }
    };

    let (times, values) = columns(&[pair]);
    Ok(series_frame(sample.metric, times, values, query, legend))
}

fn scalar_frame(sample: SamplePair, query: &PrometheusQuery) -> Frame {
    let (times, values) = columns(&[sample]);
    Frame::new(format_sample_value(sample.value)).with_fields([
        step_time_field(times, query),
        value_field(VALUE_FIELD, values, Labels::new(), None),
    ])
}

fn series_frame(
    labels: Labels,
    times: Vec<DateTime<Utc>>,
    values: Vec<f64>,
    query: &PrometheusQuery,
    legend: &LegendFormatter,
) -> Frame {
    let name = legend.format(&labels, &query.legend_format, &query.expr);
    let display_name = (!name.is_empty()).then(|| name.clone());

    Frame::new(name).with_fields([
        step_time_field(times, query),
        value_field(VALUE_FIELD, values, labels, display_name),
    ])
}

fn step_time_field(times: Vec<DateTime<Utc>>, query: &PrometheusQuery) -> Field {
    time_field(TIME_FIELD, times, Some(query.step.as_millis() as f64))
}

fn columns(samples: &[SamplePair]) -> (Vec<DateTime<Utc>>, Vec<f64>) {
    samples
        .iter()
        .map(|sample| {
            (
                DateTime::from_timestamp_millis(sample.timestamp_millis()).unwrap_or_default(),
                sample.value,
            )
        })
        .unzip()
}
