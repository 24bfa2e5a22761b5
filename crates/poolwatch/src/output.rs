//! Output formatting: table, JSON, YAML.
//!
//! Cache entries hold untyped JSON, so tables are built column-by-column
//! from whatever the pool returned: objects become key/value tables, arrays
//! of objects become one row per element.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use owo_colors::OwoColorize;
use poolwatch_core::{CacheEntry, EntryPhase, Resource, StreamState};
use serde::Serialize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::{ColorMode, OutputFormat};

/// Rows shown in a table before the rest is elided.
const MAX_TABLE_ROWS: usize = 20;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

fn paint_phase(phase: EntryPhase, color: bool) -> String {
    let label = phase.to_string();
    if !color {
        return label;
    }
    match phase {
        EntryPhase::Fresh => label.green().to_string(),
        EntryPhase::Fetching => label.cyan().to_string(),
        EntryPhase::Stale => label.yellow().to_string(),
        EntryPhase::Failed => label.red().to_string(),
        EntryPhase::Idle => label.dimmed().to_string(),
    }
}

pub fn describe_stream(state: StreamState) -> String {
    match state {
        StreamState::Disconnected => "disconnected".into(),
        StreamState::Connecting => "connecting".into(),
        StreamState::Connected => "live".into(),
        StreamState::Reconnecting { attempt } => format!("reconnecting (attempt {attempt})"),
    }
}

// ── Entry rendering ──────────────────────────────────────────────────

/// Structured form of one update, for JSON and YAML output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryReport<'a> {
    resource: String,
    key: String,
    phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    data: Option<&'a Value>,
}

/// Render one cache entry in the chosen format.
pub fn render_entry(
    format: OutputFormat,
    resource: &Resource,
    entry: &CacheEntry,
    stream: StreamState,
    color: bool,
) -> String {
    let report = EntryReport {
        resource: resource.to_string(),
        key: resource.key().to_string(),
        phase: entry.phase.to_string(),
        updated_at: entry.updated_at.map(|t| t.to_rfc3339()),
        error: entry.error.as_deref(),
        data: entry.data.as_deref(),
    };

    match format {
        OutputFormat::Table => render_table(resource, entry, stream, color),
        OutputFormat::Json => render_json(&report, false),
        OutputFormat::JsonCompact => render_json(&report, true),
        OutputFormat::Yaml => render_yaml(&report),
    }
}

fn render_table(resource: &Resource, entry: &CacheEntry, stream: StreamState, color: bool) -> String {
    let age = entry
        .updated_at
        .and_then(|at| (chrono::Utc::now() - at).to_std().ok())
        .map(|d| format!(", updated {} ago", humantime::format_duration(truncate(d))))
        .unwrap_or_default();

    let title = if color {
        resource.to_string().bold().to_string()
    } else {
        resource.to_string()
    };
    let mut out = format!(
        "{title} [{}{age}, stream {}]",
        paint_phase(entry.phase, color),
        describe_stream(stream)
    );

    if let Some(ref error) = entry.error {
        out.push('\n');
        if color {
            out.push_str(&format!("error: {error}").red().to_string());
        } else {
            out.push_str(&format!("error: {error}"));
        }
    }
    if let Some(ref data) = entry.data {
        out.push('\n');
        out.push_str(&value_table(data));
    }
    out
}

/// Whole seconds are enough for "updated ... ago".
fn truncate(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

/// Tabulate an arbitrary JSON value.
pub fn value_table(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut builder = Builder::default();
            builder.push_record(["field", "value"]);
            for (key, value) in map {
                builder.push_record([key.clone(), cell(value)]);
            }
            builder.build().with(Style::rounded()).to_string()
        }
        Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => {
            let columns = columns(items);
            let mut builder = Builder::default();
            builder.push_record(columns.iter().cloned());
            for item in items.iter().take(MAX_TABLE_ROWS) {
                builder.push_record(columns.iter().map(|c| item.get(c).map(cell).unwrap_or_default()));
            }
            let mut table = builder.build().with(Style::rounded()).to_string();
            if items.len() > MAX_TABLE_ROWS {
                table.push_str(&format!("\n... {} more", items.len() - MAX_TABLE_ROWS));
            }
            table
        }
        other => cell(other),
    }
}

/// Column names in first-seen order across all rows.
fn columns(items: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for key in items.iter().filter_map(Value::as_object).flat_map(|m| m.keys()) {
        if !columns.iter().any(|c| c == key) {
            columns.push(key.clone());
        }
    }
    columns
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!("[{} items]", items.len()),
        Value::Object(map) => format!("{{{} fields}}", map.len()),
        other => other.to_string(),
    }
}

// ── Shared renderers ─────────────────────────────────────────────────

pub(crate) fn render_json<T: Serialize + ?Sized>(data: &T, compact: bool) -> String {
    if compact {
        serde_json::to_string(data).expect("serialization should not fail")
    } else {
        serde_json::to_string_pretty(data).expect("serialization should not fail")
    }
}

pub(crate) fn render_yaml<T: Serialize + ?Sized>(data: &T) -> String {
    serde_yaml::to_string(data).expect("serialization should not fail")
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn object_becomes_field_table() {
        let table = value_table(&json!({ "hashrate": 150, "name": "main" }));
        assert!(table.contains("hashrate"));
        assert!(table.contains("150"));
        assert!(table.contains("main"));
    }

    #[test]
    fn array_columns_follow_first_seen_order() {
        let items = [json!({ "epoch": 100, "hash": "ab" }), json!({ "epoch": 99, "reward": 5 })];
        assert_eq!(columns(&items), vec!["epoch", "hash", "reward"]);

        let table = value_table(&Value::Array(items.to_vec()));
        assert!(table.contains("reward"));
        assert!(table.contains("99"));
    }

    #[test]
    fn long_lists_are_elided() {
        let items: Vec<Value> = (0..25).map(|i| json!({ "epoch": i })).collect();
        let table = value_table(&Value::Array(items));
        assert!(table.ends_with("... 5 more"));
    }

    #[test]
    fn nested_values_are_summarized() {
        assert_eq!(cell(&json!([1, 2, 3])), "[3 items]");
        assert_eq!(cell(&json!({ "a": 1 })), "{1 fields}");
        assert_eq!(cell(&Value::Null), "");
    }

    #[test]
    fn json_report_carries_phase_and_data() {
        let entry = CacheEntry {
            data: Some(std::sync::Arc::new(json!([{ "epoch": 1 }]))),
            phase: EntryPhase::Fresh,
            ..CacheEntry::default()
        };
        let out = render_entry(
            OutputFormat::JsonCompact,
            &Resource::PoolBlocks,
            &entry,
            StreamState::Connected,
            false,
        );
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["phase"], "fresh");
        assert_eq!(parsed["key"], "pool/blocks");
        assert_eq!(parsed["data"][0]["epoch"], 1);
    }
}
