//! Serde models of the Prometheus HTTP API (`/api/v1/query`,
//! `/api/v1/query_range`, `/api/v1/query_exemplars`).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

/// Label set of a series, ordered by label name.
pub type Labels = BTreeMap<String, String>;

/// Metric name label.
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope shared by every endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status: Status,
    pub data: Option<T>,
    pub error_type: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub infos: Vec<String>,
}

/// Result of an instant or range query.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryResult {
    Matrix(Vec<RangeSeries>),
    Vector(Vec<InstantSample>),
    Scalar(SamplePair),
}

impl QueryResult {
    pub fn result_type(&self) -> &'static str {
        match self {
            QueryResult::Matrix(_) => "matrix",
            QueryResult::Vector(_) => "vector",
            QueryResult::Scalar(_) => "scalar",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: Labels,
    #[serde(default)]
    pub values: Vec<SamplePair>,
    /// Native histogram samples, kept undecoded.
    #[serde(default)]
    pub histograms: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: Labels,
    pub value: Option<SamplePair>,
    #[serde(default)]
    pub histogram: Option<serde_json::Value>,
}

/// Exemplars of one series.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExemplarQueryResult {
    #[serde(default)]
    pub series_labels: Labels,
    #[serde(default)]
    pub exemplars: Vec<Exemplar>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Exemplar {
    #[serde(default)]
    pub labels: Labels,
    #[serde(deserialize_with = "deserialize_sample_value")]
    pub value: f64,
    /// Unix seconds with fractional part.
    pub timestamp: f64,
}

/// A `[<unix seconds>, "<value>"]` pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

impl SamplePair {
    /// Timestamp in epoch milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp * 1000.0).round() as i64
    }
}

impl<'de> Deserialize<'de> for SamplePair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SamplePairVisitor;

        impl<'de> Visitor<'de> for SamplePairVisitor {
            type Value = SamplePair;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [timestamp, \"value\"] pair")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<SamplePair, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let timestamp: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let raw: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let value = parse_sample_value(&raw)
                    .ok_or_else(|| de::Error::custom(format!("invalid sample value {raw:?}")))?;

                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }

                Ok(SamplePair { timestamp, value })
            }
        }

        deserializer.deserialize_seq(SamplePairVisitor)
    }
}

fn deserialize_sample_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_sample_value(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid sample value {raw:?}")))
}

/// Parse a sample value as Prometheus renders it, including `NaN`, `+Inf` and `-Inf`.
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

/// Render a sample value the way Prometheus does.
pub fn format_sample_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
