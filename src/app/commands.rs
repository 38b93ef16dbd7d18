//! Text renderings behind the CLI subcommands.

use crate::core::store::ExperimentStore;
use crate::core::table::{cell, format_number, format_runtime};
use crate::domain::model::{ExperimentSummary, ExperimentTable};
use crate::domain::ports::DocumentSource;
use crate::utils::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Realtime,
    Historical,
}

pub async fn status<S: DocumentSource>(store: &ExperimentStore<S>) -> Result<String> {
    if let Some(active) = store.active_experiment().await? {
        let mut line = format!("Running Experiment: {}", active.id);
        if let Some(last) = active.last_seen {
            line.push_str(&format!(" (last reading {})", format_timestamp(last)));
        }
        return Ok(line);
    }

    let experiments = store.list_experiments().await?;
    let mut lines = vec![
        "No experiment running".to_string(),
        format!("Total experiments: {}", experiments.len()),
    ];
    lines.extend(experiments.iter().map(|e| format!("  {}", e.id)));
    Ok(lines.join("\n"))
}

pub async fn list<S: DocumentSource>(store: &ExperimentStore<S>) -> Result<String> {
    let experiments = store.list_experiments().await?;
    Ok(render_experiments(&experiments))
}

/// 顯示實驗摘要；未指定編號時顯示執行中的實驗 (即時模式)
pub async fn show<S: DocumentSource>(
    store: &ExperimentStore<S>,
    id: Option<&str>,
    realtime: bool,
    tail: usize,
) -> Result<String> {
    let (experiment_id, mode) = match id {
        Some(id) if realtime => (id.to_string(), ViewMode::Realtime),
        Some(id) => (id.to_string(), ViewMode::Historical),
        None => match store.active_experiment().await? {
            Some(active) => (active.id, ViewMode::Realtime),
            None => {
                return Ok("Select a running or historical experiment to view data.".to_string())
            }
        },
    };

    let table = store
        .load_experiment_data(&experiment_id, mode == ViewMode::Realtime)
        .await?;
    Ok(render_table_summary(&table, mode, tail))
}

pub fn render_experiments(experiments: &[ExperimentSummary]) -> String {
    if experiments.is_empty() {
        return "No experiments found.".to_string();
    }

    let header = ["id", "readings", "first", "last", "stations", "status"];
    let rows: Vec<Vec<String>> = experiments
        .iter()
        .map(|e| {
            vec![
                e.id.clone(),
                e.readings.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                e.first_seen.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
                e.last_seen.map(format_timestamp).unwrap_or_else(|| "-".to_string()),
                if e.stations.is_empty() {
                    "-".to_string()
                } else {
                    e.stations.iter().cloned().collect::<Vec<_>>().join(",")
                },
                e.status.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    render_grid(&header.map(String::from), &rows)
}

pub fn render_table_summary(table: &ExperimentTable, mode: ViewMode, tail: usize) -> String {
    let title = match mode {
        ViewMode::Realtime => format!("Real-Time Plotting for Experiment {}", table.experiment_id),
        ViewMode::Historical => format!("Experiment {} - Historical Data", table.experiment_id),
    };

    if table.is_empty() {
        let message = match mode {
            ViewMode::Realtime => "Waiting for new data...",
            ViewMode::Historical => "No data found for this experiment.",
        };
        return format!("{}\n{}", title, message);
    }

    let mut lines = vec![title, format!("Rows: {}", table.len())];

    let weights: Vec<f64> = table.rows.iter().filter_map(|row| row.weight).collect();
    if let (Some(min), Some(max)) = (
        weights.iter().copied().reduce(f64::min),
        weights.iter().copied().reduce(f64::max),
    ) {
        lines.push(format!(
            "Weight (g): min {}, max {}, latest {}",
            format_number(min),
            format_number(max),
            weights.last().map(|w| format_number(*w)).unwrap_or_default()
        ));
    }

    if let Some(span) = table
        .rows
        .iter()
        .filter_map(|row| row.experimental_runtime)
        .reduce(f64::max)
    {
        lines.push(format!("Experimental time: {}", format_runtime(span)));
    }

    if tail > 0 {
        let start = table.len().saturating_sub(tail);
        let rows: Vec<Vec<String>> = table.rows[start..]
            .iter()
            .map(|row| table.columns.iter().map(|column| cell(row, column)).collect())
            .collect();
        lines.push(String::new());
        lines.push(render_grid(&table.columns, &rows));
    }

    lines.join("\n")
}

fn render_grid(header: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    let format_line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_line(header)];
    lines.extend(rows.iter().map(|row| format_line(row.as_slice())));
    lines.join("\n")
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
