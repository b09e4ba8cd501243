use std::fmt::Write as _;
use std::path::Path;

use serde_json::Value;

use crate::text::read_text_with_fallback;
use crate::{truncate_output, DocumentError, ExtractLimits, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int,
    Float,
    Bool,
    Str,
    Empty,
}

impl ColumnKind {
    fn name(self) -> &'static str {
        match self {
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::Bool => "bool",
            ColumnKind::Str => "str",
            ColumnKind::Empty => "empty",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Int | ColumnKind::Float)
    }
}

fn classify_value(value: &str) -> ColumnKind {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return ColumnKind::Empty;
    }
    if trimmed.parse::<i64>().is_ok() {
        return ColumnKind::Int;
    }
    if trimmed.parse::<f64>().is_ok() {
        return ColumnKind::Float;
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return ColumnKind::Bool;
    }
    ColumnKind::Str
}

fn merge_kinds(a: ColumnKind, b: ColumnKind) -> ColumnKind {
    use ColumnKind::*;
    match (a, b) {
        (Empty, other) | (other, Empty) => other,
        (Int, Int) => Int,
        (Int, Float) | (Float, Int) | (Float, Float) => Float,
        (Bool, Bool) => Bool,
        _ => Str,
    }
}

/// Human-readable digest of a CSV/TSV file: shape, column dtypes, head
/// rows, and count/mean/min/max for the numeric columns.
pub fn summarize_delimited(path: &Path, delimiter: u8, limits: &ExtractLimits) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DocumentError::InvalidDocument(format!("failed to open table: {e}")))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DocumentError::InvalidDocument(format!("failed to read header row: {e}")))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let columns = headers.len().min(limits.max_cols);

    let mut kinds = vec![ColumnKind::Empty; columns];
    let mut numeric: Vec<Vec<f64>> = vec![Vec::new(); columns];
    let mut head: Vec<Vec<String>> = Vec::new();
    let mut row_count = 0usize;

    for record in reader.records() {
        let record =
            record.map_err(|e| DocumentError::InvalidDocument(format!("bad row: {e}")))?;
        row_count += 1;

        if head.len() < 5 {
            head.push(
                record
                    .iter()
                    .take(columns)
                    .map(|v| v.to_string())
                    .collect(),
            );
        }
        for (i, value) in record.iter().take(columns).enumerate() {
            let kind = classify_value(value);
            kinds[i] = merge_kinds(kinds[i], kind);
            if kind.is_numeric() {
                if let Ok(n) = value.trim().parse::<f64>() {
                    numeric[i].push(n);
                }
            }
        }
    }

    let label = if delimiter == b'\t' { "TSV" } else { "CSV" };
    let mut out = String::new();
    let _ = writeln!(out, "{label} summary: {row_count} rows x {} columns", headers.len());

    let _ = writeln!(out, "Columns:");
    for (i, header) in headers.iter().take(columns).enumerate() {
        let _ = writeln!(out, "  {} ({})", header, kinds[i].name());
    }
    if headers.len() > columns {
        let _ = writeln!(out, "  ...{} more columns omitted", headers.len() - columns);
    }

    if !head.is_empty() {
        let _ = writeln!(out, "Head:");
        let _ = writeln!(
            out,
            "  {}",
            headers
                .iter()
                .take(columns)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        );
        for row in &head {
            let _ = writeln!(out, "  {}", row.join(" | "));
        }
    }

    let mut numeric_lines = Vec::new();
    for (i, values) in numeric.iter().enumerate() {
        if kinds[i].is_numeric() && !values.is_empty() {
            let count = values.len();
            let sum: f64 = values.iter().sum();
            let mean = sum / count as f64;
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            numeric_lines.push(format!(
                "  {}: count={count} mean={mean:.2} min={min} max={max}",
                headers[i]
            ));
        }
    }
    if !numeric_lines.is_empty() {
        let _ = writeln!(out, "Numeric summary:");
        for line in numeric_lines {
            let _ = writeln!(out, "{line}");
        }
    }

    Ok(truncate_output(out, limits.max_output_chars))
}

/// Digest of a JSON or JSONL file: shape description plus a pretty-printed
/// body truncated to `max_json_chars`.
pub fn summarize_json(path: &Path, extension: &str, limits: &ExtractLimits) -> Result<String> {
    let raw = read_text_with_fallback(path)?;

    if extension == "jsonl" {
        return summarize_jsonl(&raw, limits);
    }

    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| DocumentError::InvalidDocument(format!("invalid JSON: {e}")))?;

    let shape = match &value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(10).map(String::as_str).collect();
            format!(
                "JSON object with {} keys: {}{}",
                map.len(),
                keys.join(", "),
                if map.len() > 10 { ", ..." } else { "" }
            )
        }
        Value::Array(items) => format!("JSON array with {} items", items.len()),
        other => format!("JSON scalar ({})", json_type_name(other)),
    };

    let pretty = serde_json::to_string_pretty(&value).unwrap_or(raw);
    let body = truncate_output(pretty, limits.max_json_chars);
    Ok(format!("{shape}\n{body}"))
}

fn summarize_jsonl(raw: &str, limits: &ExtractLimits) -> Result<String> {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut out = format!("JSONL file with {} records", lines.len());
    if let Some(first) = lines.first() {
        match serde_json::from_str::<Value>(first) {
            Ok(value) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
                out.push_str("\nFirst record:\n");
                out.push_str(&truncate_output(pretty, limits.max_json_chars));
            }
            Err(e) => {
                return Err(DocumentError::InvalidDocument(format!(
                    "invalid JSONL first record: {e}"
                )))
            }
        }
    }
    Ok(out)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn csv_summary_reports_shape_dtypes_and_stats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.csv");
        fs::write(
            &path,
            "name,age,score,active\nAda,36,91.5,true\nGrace,45,88.0,false\nAlan,41,95.25,true\n",
        )
        .unwrap();

        let summary = summarize_delimited(&path, b',', &ExtractLimits::default()).unwrap();
        assert!(summary.contains("CSV summary: 3 rows x 4 columns"));
        assert!(summary.contains("name (str)"));
        assert!(summary.contains("age (int)"));
        assert!(summary.contains("score (float)"));
        assert!(summary.contains("active (bool)"));
        assert!(summary.contains("Ada | 36 | 91.5 | true"));
        assert!(summary.contains("age: count=3"));
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.tsv");
        fs::write(&path, "a\tb\n1\t2\n").unwrap();
        let summary = summarize_delimited(&path, b'\t', &ExtractLimits::default()).unwrap();
        assert!(summary.contains("TSV summary: 1 rows x 2 columns"));
    }

    #[test]
    fn json_object_summary_counts_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"alpha":1,"beta":[1,2,3]}"#).unwrap();
        let summary = summarize_json(&path, "json", &ExtractLimits::default()).unwrap();
        assert!(summary.starts_with("JSON object with 2 keys: alpha, beta"));
        assert!(summary.contains("\"beta\""));
    }

    #[test]
    fn json_array_summary_counts_items() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, r#"[1,2,3,4]"#).unwrap();
        let summary = summarize_json(&path, "json", &ExtractLimits::default()).unwrap();
        assert!(summary.starts_with("JSON array with 4 items"));
    }

    #[test]
    fn long_json_bodies_are_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        let big: Vec<String> = (0..5000).map(|i| format!("item-{i}")).collect();
        fs::write(&path, serde_json::to_string(&big).unwrap()).unwrap();
        let summary = summarize_json(&path, "json", &ExtractLimits::default()).unwrap();
        assert!(summary.contains("...[truncated]..."));
    }

    #[test]
    fn jsonl_counts_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n").unwrap();
        let summary = summarize_json(&path, "jsonl", &ExtractLimits::default()).unwrap();
        assert!(summary.starts_with("JSONL file with 3 records"));
        assert!(summary.contains("First record:"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(summarize_json(&path, "json", &ExtractLimits::default()).is_err());
    }
}
