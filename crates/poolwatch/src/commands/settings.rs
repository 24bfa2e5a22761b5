//! `poolwatch settings`: update the token owner's account settings.

use std::io::Read;
use std::path::Path;

use poolwatch_core::Dashboard;
use serde_json::{Map, Value};

use crate::cli::{GlobalOpts, OutputFormat, SettingsArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: SettingsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let token = resolved.token(global)?;
    let settings = match args.from_file {
        Some(ref path) => read_settings(path)?,
        None => parse_assignments(&args.set)?,
    };

    let dashboard = Dashboard::connect(resolved.sync).await?;
    let reply = dashboard.update_account_settings(&token, &settings).await;
    dashboard.shutdown().await;
    let reply = reply?;

    tracing::info!(profile = %resolved.profile_name, "account settings updated");
    let rendered = match global.output {
        OutputFormat::Table => output::value_table(&reply),
        OutputFormat::Json => output::render_json(&reply, false),
        OutputFormat::JsonCompact => output::render_json(&reply, true),
        OutputFormat::Yaml => output::render_yaml(&reply),
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn read_settings(path: &Path) -> Result<Value, CliError> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    let value: Value = serde_json::from_str(&raw)?;
    if !value.is_object() {
        return Err(CliError::Validation {
            field: "settings".into(),
            reason: "expected a JSON object".into(),
        });
    }
    Ok(value)
}

/// Build a settings object from `key=value` pairs. Values that parse as JSON
/// keep their type; anything else is sent as a string.
fn parse_assignments(pairs: &[String]) -> Result<Value, CliError> {
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(CliError::Validation {
                field: "--set".into(),
                reason: format!("expected KEY=VALUE, got '{pair}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Validation {
                field: "--set".into(),
                reason: format!("empty key in '{pair}'"),
            });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        map.insert(key.to_owned(), value);
    }
    Ok(Value::Object(map))
}
