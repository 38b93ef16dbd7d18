use crate::core::normalize::PREFERRED_COLUMNS;
use crate::domain::model::{ExperimentTable, Row};
use crate::utils::error::{Result, TelemetryError};
use serde_json::Value;
use std::collections::BTreeSet;

pub fn build_table(experiment_id: impl Into<String>, rows: Vec<Row>) -> ExperimentTable {
    ExperimentTable {
        experiment_id: experiment_id.into(),
        columns: column_order(&rows),
        rows,
    }
}

/// Preferred columns first (only those present in some row), then the
/// pass-through columns in lexicographic order.
pub fn column_order(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = PREFERRED_COLUMNS
        .iter()
        .filter(|column| rows.iter().any(|row| has_preferred(row, column)))
        .map(|column| column.to_string())
        .collect();

    let extras: BTreeSet<&String> = rows.iter().flat_map(|row| row.extra.keys()).collect();
    columns.extend(
        extras
            .into_iter()
            .filter(|key| !PREFERRED_COLUMNS.contains(&key.as_str()))
            .cloned(),
    );

    columns
}

fn has_preferred(row: &Row, column: &str) -> bool {
    if row.extra.contains_key(column) {
        return true;
    }
    match column {
        "weight" => row.weight.is_some(),
        "date" => row.date.is_some(),
        "time" => row.time.is_some(),
        "experimental_runtime" => row.experimental_runtime.is_some(),
        "sequence" => row.sequence.is_some(),
        "station" => row.station.is_some(),
        _ => false,
    }
}

/// Preferred columns fall back to the raw stored value when it could not be coerced.
pub fn cell(row: &Row, column: &str) -> String {
    let typed = match column {
        "weight" => row.weight.map(format_number),
        "date" => row.date.clone(),
        "time" => row.time.clone(),
        "experimental_runtime" => row.experimental_runtime.map(format_runtime),
        "sequence" => row.sequence.map(|s| s.to_string()),
        "station" => row.station.clone(),
        _ => None,
    };
    typed
        .or_else(|| row.extra.get(column).map(render_value))
        .unwrap_or_default()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() => format_number(f),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        nested => nested.to_string(),
    }
}

/// 整數值的浮點數保留一位小數 (12 -> "12.0")
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// `HH:MM:SS`, with `.fff` only when the runtime has a fractional part.
pub fn format_runtime(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as i64;
    let sign = if total_ms < 0 { "-" } else { "" };
    let total_ms = total_ms.abs();

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    if millis > 0 {
        format!("{}{:02}:{:02}:{:02}.{:03}", sign, hours, minutes, secs, millis)
    } else {
        format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, secs)
    }
}

pub fn to_csv(table: &ExperimentTable) -> Result<String> {
    if table.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(table.columns.iter().map(|column| cell(row, column)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TelemetryError::ProcessingError {
            message: format!("failed to flush CSV output: {}", e.error()),
        })?;

    String::from_utf8(bytes).map_err(|e| TelemetryError::ProcessingError {
        message: format!("CSV output is not valid UTF-8: {}", e),
    })
}
