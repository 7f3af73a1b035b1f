use datachat_core::types::{ToolSignature, Turn};
use datachat_core::Result;
use datachat_providers::Provider;
use serde_json::{json, Value};
use tracing::info;

use crate::runner::{run_agent_loop, RunOptions, ToolDispatch};

const CHART_INSTRUCTION: &str = r#"You are a data visualization expert agent. Your job is to:
1. Analyze the data provided (usually from SQL query results)
2. Determine the most appropriate chart type for the data
3. Produce a Mermaid chart in markdown format

Use the generate_chart tool to render the chart. Pass the data as a JSON
string with "labels" and "values" arrays, for example:
{"labels": ["Jan", "Feb", "Mar"], "values": [120, 95, 143]}

Guidelines:
- For time series data, prefer line charts
- For category comparisons, prefer bar charts
- For proportions of a whole, prefer pie charts
- Use clear, descriptive titles and labels
- Keep labels short to fit in the chart
- Round numbers appropriately for readability

After rendering, return the chart block to the user together with a short
explanation of what it shows."#;

/// Renders query results as Mermaid charts.
pub struct ChartAgent;

impl Default for ChartAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartAgent {
    pub fn new() -> Self {
        Self
    }

    pub fn tools(&self) -> Vec<ToolSignature> {
        vec![ToolSignature::new(
            "generate_chart",
            "Render a bar, line, or pie chart as a Mermaid code block",
        )]
    }

    pub async fn run(
        &self,
        provider: &dyn Provider,
        history: &mut Vec<Turn>,
        options: &RunOptions,
    ) -> Result<String> {
        run_agent_loop(
            provider,
            CHART_INSTRUCTION,
            history,
            &self.tools(),
            self,
            options,
        )
        .await
    }
}

impl ToolDispatch for ChartAgent {
    fn dispatch(&self, name: &str, arguments: &Value) -> Value {
        if name != "generate_chart" {
            return json!({"error": format!("unknown tool: {}", name)});
        }

        let chart_type = arguments
            .get("chart_type")
            .and_then(|v| v.as_str())
            .unwrap_or("bar");
        let title = arguments.get("title").and_then(|v| v.as_str()).unwrap_or("");

        let data = match arguments.get("data") {
            // The wire protocol carries the data as a JSON-encoded string,
            // but accept a direct object too.
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(v) => v,
                Err(e) => return json!({"error": format!("invalid chart data: {}", e)}),
            },
            Some(v) => v.clone(),
            None => return json!({"error": "missing 'data' argument"}),
        };

        let labels: Vec<String> = data
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .map(|l| match l {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let values: Vec<f64> = data
            .get("values")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default();

        if labels.is_empty() || values.is_empty() {
            return json!({"error": "chart data needs non-empty 'labels' and 'values' arrays"});
        }

        let y_label = data
            .get("y_label")
            .and_then(|v| v.as_str())
            .unwrap_or("Value");

        info!(chart_type = %chart_type, points = values.len(), "Rendering chart");

        let chart = match chart_type {
            "bar" => render_bar_chart(title, &labels, &values, y_label),
            "line" => render_line_chart(title, &labels, &values, y_label),
            "pie" => render_pie_chart(title, &labels, &values),
            other => return json!({"error": format!("unsupported chart type: {}", other)}),
        };

        json!({"chart": chart})
    }
}

/// Render a Mermaid bar chart from labels and values.
pub fn render_bar_chart(title: &str, labels: &[String], values: &[f64], y_label: &str) -> String {
    let ceiling = display_ceiling(max_value(values));
    format!(
        "```mermaid\nxychart-beta\n    title \"{}\"\n    x-axis {}\n    y-axis \"{}\" 0 --> {:.0}\n    bar {}\n```",
        title,
        labels_block(labels),
        y_label,
        ceiling,
        values_block(values)
    )
}

/// Render a Mermaid line chart from labels and values.
pub fn render_line_chart(title: &str, labels: &[String], values: &[f64], y_label: &str) -> String {
    let ceiling = display_ceiling(max_value(values));
    format!(
        "```mermaid\nxychart-beta\n    title \"{}\"\n    x-axis {}\n    y-axis \"{}\" 0 --> {:.0}\n    line {}\n```",
        title,
        labels_block(labels),
        y_label,
        ceiling,
        values_block(values)
    )
}

/// Render a Mermaid pie chart from labels and values.
pub fn render_pie_chart(title: &str, labels: &[String], values: &[f64]) -> String {
    let entries: Vec<String> = labels
        .iter()
        .zip(values.iter())
        .map(|(label, value)| format!("    \"{}\" : {:.0}", label, value))
        .collect();
    format!("```mermaid\npie title \"{}\"\n{}\n```", title, entries.join("\n"))
}

fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

/// Round the axis ceiling up to a readable number.
fn display_ceiling(value: f64) -> f64 {
    if value <= 10.0 {
        10.0
    } else if value <= 50.0 {
        50.0
    } else if value <= 100.0 {
        100.0
    } else if value <= 500.0 {
        500.0
    } else if value <= 1000.0 {
        1000.0
    } else {
        ((value / 1000.0) as i64 + 1) as f64 * 1000.0
    }
}

fn labels_block(labels: &[String]) -> String {
    let quoted: Vec<String> = labels.iter().map(|l| format!("\"{}\"", l)).collect();
    format!("[{}]", quoted.join(", "))
}

fn values_block(values: &[f64]) -> String {
    let rendered: Vec<String> = values.iter().map(|v| format!("{:.0}", v)).collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_ceiling_thresholds() {
        assert_eq!(display_ceiling(3.0), 10.0);
        assert_eq!(display_ceiling(10.0), 10.0);
        assert_eq!(display_ceiling(11.0), 50.0);
        assert_eq!(display_ceiling(50.0), 50.0);
        assert_eq!(display_ceiling(99.0), 100.0);
        assert_eq!(display_ceiling(135.0), 500.0);
        assert_eq!(display_ceiling(501.0), 1000.0);
        assert_eq!(display_ceiling(1001.0), 2000.0);
        assert_eq!(display_ceiling(2500.0), 3000.0);
    }

    #[test]
    fn test_render_bar_chart() {
        let labels = vec!["Jan".to_string(), "Feb".to_string(), "Mar".to_string()];
        let chart = render_bar_chart("Sales by Month", &labels, &[120.0, 95.0, 143.0], "Sales");
        assert!(chart.starts_with("```mermaid\nxychart-beta\n"));
        assert!(chart.contains("title \"Sales by Month\""));
        assert!(chart.contains("x-axis [\"Jan\", \"Feb\", \"Mar\"]"));
        assert!(chart.contains("y-axis \"Sales\" 0 --> 500"));
        assert!(chart.contains("bar [120, 95, 143]"));
    }

    #[test]
    fn test_render_line_chart_uses_line_series() {
        let labels = vec!["Q1".to_string(), "Q2".to_string()];
        let chart = render_line_chart("Trend", &labels, &[5.0, 8.0], "Count");
        assert!(chart.contains("line [5, 8]"));
        assert!(chart.contains("0 --> 10"));
    }

    #[test]
    fn test_render_pie_chart() {
        let labels = vec!["A".to_string(), "B".to_string()];
        let chart = render_pie_chart("Split", &labels, &[3.0, 7.0]);
        assert_eq!(
            chart,
            "```mermaid\npie title \"Split\"\n    \"A\" : 3\n    \"B\" : 7\n```"
        );
    }

    #[test]
    fn test_dispatch_renders_bar_chart_from_json_string() {
        let agent = ChartAgent::new();
        let result = agent.dispatch(
            "generate_chart",
            &json!({
                "chart_type": "bar",
                "title": "Orders",
                "data": r#"{"labels": ["Jan", "Feb"], "values": [10, 20], "y_label": "Orders"}"#
            }),
        );
        let chart = result["chart"].as_str().unwrap();
        assert!(chart.contains("bar [10, 20]"));
        assert!(chart.contains("y-axis \"Orders\""));
    }

    #[test]
    fn test_dispatch_rejects_bad_data() {
        let agent = ChartAgent::new();
        let result = agent.dispatch(
            "generate_chart",
            &json!({"chart_type": "bar", "title": "x", "data": "not json"}),
        );
        assert!(result["error"].as_str().unwrap().contains("invalid chart data"));

        let result = agent.dispatch(
            "generate_chart",
            &json!({"chart_type": "bar", "title": "x", "data": {"labels": [], "values": []}}),
        );
        assert!(result.get("error").is_some());
    }

    #[test]
    fn test_dispatch_unsupported_type() {
        let agent = ChartAgent::new();
        let result = agent.dispatch(
            "generate_chart",
            &json!({
                "chart_type": "heatmap",
                "title": "x",
                "data": {"labels": ["a"], "values": [1]}
            }),
        );
        assert!(result["error"].as_str().unwrap().contains("unsupported chart type"));
    }
}
