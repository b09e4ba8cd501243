use async_trait::async_trait;
use serde_json::{json, Value};

use drover_types::{ToolResult, ToolSchema};

use crate::{Tool, ToolDeps};

/// Render a JSON array (or object) in table/list/csv/markdown/summary form,
/// with optional field selection, filtering and sorting.
pub struct FormatOutputTool;

#[async_trait]
impl Tool for FormatOutputTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "format_output".to_string(),
            description: "Format JSON data as a table, list, CSV, markdown or summary".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "data": {"type": "string"},
                    "format_type": {"type": "string"},
                    "title": {"type": "string"},
                    "fields": {"type": "array", "items": {"type": "string"}},
                    "sort_by": {"type": "string"},
                    "filter_by": {"type": "string"}
                },
                "required": ["data"]
            }),
        }
    }

    async fn execute(&self, _deps: &ToolDeps, args: Value) -> anyhow::Result<ToolResult> {
        let raw = args["data"].as_str().unwrap_or("");
        let format_type = args["format_type"].as_str().unwrap_or("table").to_lowercase();
        let title = args["title"].as_str().unwrap_or("");
        let fields: Option<Vec<String>> = args["fields"].as_array().map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        });
        let sort_by = args["sort_by"].as_str().unwrap_or("");
        let filter_by = args["filter_by"].as_str().unwrap_or("");

        let output = format_data(raw, &format_type, title, fields.as_deref(), sort_by, filter_by);
        Ok(ToolResult {
            output,
            metadata: json!({"format_type": format_type}),
        })
    }
}

pub fn format_data(
    raw: &str,
    format_type: &str,
    title: &str,
    fields: Option<&[String]>,
    sort_by: &str,
    filter_by: &str,
) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return "Error: Invalid JSON data provided".to_string();
    };

    let mut rows: Vec<Value> = match parsed {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return "Error: Data must be a JSON object or array".to_string(),
    };

    if rows.is_empty() {
        return "No data to format".to_string();
    }

    apply_filter(&mut rows, filter_by);
    apply_sort(&mut rows, sort_by);

    let headers = select_headers(&rows, fields);

    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(&format!("\n# {title}\n\n"));
    }

    match format_type {
        "json" => {
            let projected: Vec<Value> = rows.iter().map(|row| project(row, &headers)).collect();
            out.push_str(&serde_json::to_string_pretty(&projected).unwrap_or_default());
        }
        "list" => {
            for row in &rows {
                let line: Vec<String> = headers
                    .iter()
                    .map(|h| format!("{h}: {}", cell(row, h)))
                    .collect();
                out.push_str(&format!("• {}\n", line.join(" | ")));
            }
        }
        "csv" => {
            out.push_str(&headers.join(","));
            out.push('\n');
            for row in &rows {
                let line: Vec<String> = headers.iter().map(|h| cell(row, h)).collect();
                out.push_str(&line.join(","));
                out.push('\n');
            }
        }
        "markdown" => {
            out.push_str(&format!("| {} |\n", headers.join(" | ")));
            out.push_str(&format!(
                "| {} |\n",
                headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
            ));
            for row in &rows {
                let line: Vec<String> = headers.iter().map(|h| cell(row, h)).collect();
                out.push_str(&format!("| {} |\n", line.join(" | ")));
            }
        }
        "summary" => {
            out.push_str(&format!("Total records: {}\n", rows.len()));
            out.push_str(&format!("Columns: {}\n", headers.join(", ")));
        }
        // "table" and anything unrecognised
        _ => {
            out.push_str(&headers.join(" | "));
            out.push('\n');
            out.push_str(
                &headers
                    .iter()
                    .map(|h| "-".repeat(h.len()))
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
            out.push('\n');
            for row in &rows {
                let line: Vec<String> = headers.iter().map(|h| cell(row, h)).collect();
                out.push_str(&line.join(" | "));
                out.push('\n');
            }
        }
    }

    out
}

fn select_headers(rows: &[Value], fields: Option<&[String]>) -> Vec<String> {
    let all: Vec<String> = rows
        .first()
        .and_then(|row| row.as_object())
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    match fields {
        Some(wanted) => {
            let filtered: Vec<String> = all
                .iter()
                .filter(|h| wanted.contains(h))
                .cloned()
                .collect();
            if filtered.is_empty() {
                all
            } else {
                filtered
            }
        }
        None => all,
    }
}

fn cell(row: &Value, header: &str) -> String {
    match row.get(header) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn project(row: &Value, headers: &[String]) -> Value {
    let Some(obj) = row.as_object() else {
        return row.clone();
    };
    Value::Object(
        obj.iter()
            .filter(|(k, _)| headers.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Filters are `field=value`, `field>number` or `field<number`; anything
/// that does not parse leaves the rows untouched.
fn apply_filter(rows: &mut Vec<Value>, filter_by: &str) {
    if filter_by.is_empty() {
        return;
    }
    if let Some((field, value)) = filter_by.split_once('=') {
        let (field, value) = (field.trim(), value.trim());
        rows.retain(|row| cell(row, field) == value);
    } else if let Some((field, value)) = filter_by.split_once('>') {
        if let Ok(threshold) = value.trim().parse::<f64>() {
            let field = field.trim().to_string();
            rows.retain(|row| {
                row.get(&field)
                    .and_then(Value::as_f64)
                    .map(|n| n > threshold)
                    .unwrap_or(false)
            });
        }
    } else if let Some((field, value)) = filter_by.split_once('<') {
        if let Ok(threshold) = value.trim().parse::<f64>() {
            let field = field.trim().to_string();
            rows.retain(|row| {
                row.get(&field)
                    .and_then(Value::as_f64)
                    .map(|n| n < threshold)
                    .unwrap_or(false)
            });
        }
    }
}

fn apply_sort(rows: &mut [Value], sort_by: &str) {
    if sort_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        let left = a.get(sort_by);
        let right = b.get(sort_by);
        match (left.and_then(Value::as_f64), right.and_then(Value::as_f64)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => cell(a, sort_by).cmp(&cell(b, sort_by)),
        }
    });
}
