//! Frame building on top of the Grafana plugin SDK data model.
//!
//! Frames serialize to the Grafana data-frame JSON layout (`schema` plus
//! `data`) through the SDK types, so the HTTP API can hand them out as is.

use chrono::{DateTime, Utc};
use grafana_plugin_sdk::data::{Field, FieldConfig, Frame, Metadata, Notice, Severity};
use grafana_plugin_sdk::prelude::IntoField;
use prom_api::Labels;
use serde_json::{Map, Value};

pub use grafana_plugin_sdk::data::Error as FrameError;

/// Time column with the expected spacing of its values in milliseconds.
pub fn time_field(name: &str, times: Vec<DateTime<Utc>>, interval_ms: Option<f64>) -> Field {
    let mut field = times.into_field(name);
    if interval_ms.is_some() {
        field.config = Some(FieldConfig {
            interval: interval_ms,
            ..Default::default()
        });
    }
    field
}

/// Float column carrying series labels and an optional display name.
pub fn value_field(
    name: &str,
    values: Vec<f64>,
    labels: Labels,
    display_name: Option<String>,
) -> Field {
    let mut field = values.into_field(name);
    field.labels = labels;
    if display_name.is_some() {
        let mut config = FieldConfig::default();
        config.display_name_from_ds = display_name;
        field.config = Some(config);
    }
    field
}

pub fn string_field(name: &str, values: Vec<String>) -> Field {
    values.into_field(name)
}

pub fn notice(severity: Severity, text: impl Into<String>) -> Notice {
    let mut notice = Notice::new(text.into());
    notice.severity = severity.into();
    notice
}

pub fn metadata(
    executed_query_string: String,
    custom: Map<String, Value>,
    notices: Vec<Notice>,
) -> Metadata {
    let mut meta = Metadata::default();
    meta.executed_query_string = Some(executed_query_string);
    meta.custom = custom.into();
    meta.notices = notices.into();
    meta
}

/// Validate column lengths, keeping the frame for later serialization.
pub fn checked(frame: Frame) -> Result<Frame, FrameError> {
    frame.check()?;
    Ok(frame)
}

/// Number of rows, taken from the first field.
pub fn row_count(frame: &Frame) -> usize {
    frame
        .fields()
        .first()
        .map(|field| field.values().len())
        .unwrap_or(0)
}

/// Schema entry and JSON values of the named field.
#[cfg(test)]
pub(crate) fn column(frame: &Frame, name: &str) -> (Value, Value) {
    let json = serde_json::to_value(frame).expect("frame serializes");
    let index = frame
        .fields()
        .iter()
        .position(|field| field.name == name)
        .unwrap_or_else(|| panic!("no field {name}"));
    (
        json["schema"]["fields"][index].clone(),
        json["data"]["values"][index].clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn time(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_checked_rejects_ragged_frame() {
        let frame = Frame::new("ragged").with_fields([
            time_field("Time", vec![time(0), time(1000)], None),
            value_field("Value", vec![1.0], Labels::new(), None),
        ]);

        assert!(checked(frame).is_err());
    }

    #[test]
    fn test_series_frame_json() {
        let labels = Labels::from([("job".to_string(), "api".to_string())]);
        let mut frame = Frame::new("up").with_fields([
            time_field("Time", vec![time(1000), time(2000)], Some(1000.0)),
            value_field("Value", vec![1.5, f64::NAN], labels, Some("api".to_string())),
        ]);
        frame.meta = Some(metadata(
            "Expr: up\nStep: 1s".to_string(),
            Map::from_iter([("resultType".to_string(), json!("matrix"))]),
            vec![notice(Severity::Warning, "partial")],
        ));

        let frame = checked(frame).unwrap();
        assert_eq!(row_count(&frame), 2);

        let value = serde_json::to_value(&frame).unwrap();
        let schema = &value["schema"];
        assert_eq!(schema["name"], "up");
        assert_eq!(schema["fields"][0]["name"], "Time");
        assert_eq!(schema["fields"][0]["config"]["interval"], 1000.0);
        assert_eq!(schema["fields"][1]["labels"], json!({"job": "api"}));
        assert_eq!(schema["fields"][1]["config"]["displayNameFromDS"], "api");
        assert_eq!(schema["meta"]["custom"]["resultType"], "matrix");
        assert_eq!(schema["meta"]["executedQueryString"], "Expr: up\nStep: 1s");
        assert_eq!(schema["meta"]["notices"][0]["text"], "partial");
        assert_eq!(schema["meta"]["notices"][0]["severity"], "warning");

        assert_eq!(value["data"]["values"][0], json!([1000, 2000]));
        assert_eq!(value["data"]["values"][1][0], 1.5);
        assert!(value["data"]["values"][1][1].is_null());
    }

    #[test]
    fn test_string_field() {
        let frame = Frame::new("exemplar")
            .with_fields([string_field("traceID", vec!["a".into(), "b".into()])]);

        assert_eq!(row_count(&frame), 2);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["data"]["values"][0], json!(["a", "b"]));
    }

    #[test]
    fn test_empty_frame_has_no_rows() {
        assert_eq!(row_count(&Frame::new("empty")), 0);
    }
}
