use prom_api::{Labels, METRIC_NAME_LABEL};
use regex::{Captures, Regex};

/// Legend format that defers naming to label based display names.
pub const LEGEND_FORMAT_AUTO: &str = "__auto";

/// Renders series names from legend templates such as `{{job}} - {{ instance }}`.
#[derive(Debug, Clone)]
pub struct LegendFormatter {
    placeholder: Regex,
}

impl Default for LegendFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl LegendFormatter {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("valid legend pattern"),
        }
    }

    pub fn format(&self, labels: &Labels, legend_format: &str, expr: &str) -> String {
        let legend = if legend_format == LEGEND_FORMAT_AUTO {
            if labels.is_empty() {
                metric_string(labels)
            } else {
                String::new()
            }
        } else if legend_format.is_empty() {
            metric_string(labels)
        } else {
            self.placeholder
                .replace_all(legend_format, |caps: &Captures| {
                    labels.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };

        if legend == "{}" {
            return expr.to_string();
        }
        legend
    }
}

/// Prometheus text form of a series, e.g. `up{instance="a", job="b"}`.
pub fn metric_string(labels: &Labels) -> String {
    let name = labels.get(METRIC_NAME_LABEL).map(String::as_str).unwrap_or("");
    let pairs: Vec<String> = labels
        .iter()
        .filter(|(label, _)| label.as_str() != METRIC_NAME_LABEL)
        .map(|(label, value)| format!("{label}={value:?}"))
        .collect();

    if pairs.is_empty() {
        if name.is_empty() {
            return "{}".to_string();
        }
        return name.to_string();
    }
    format!("{name}{{{}}}", pairs.join(", "))
}
