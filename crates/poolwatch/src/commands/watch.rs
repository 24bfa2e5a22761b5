//! `poolwatch watch`: mount one resource and print every update.

use std::sync::Arc;

use clap::ValueEnum;
use poolwatch_core::{CacheEntry, Dashboard};
use tokio::time::{Instant, sleep_until};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let resolved = config::resolve(global)?;
    let address = resolved.address(args.address.as_deref());
    let resource = args
        .resource
        .to_resource(address)
        .ok_or_else(|| CliError::MissingAddress {
            resource: args
                .resource
                .to_possible_value()
                .map(|v| v.get_name().to_owned())
                .unwrap_or_default(),
        })?;

    let dashboard = Dashboard::connect(resolved.sync).await?;
    let mut view = dashboard.watch(resource.clone());
    let color = output::should_color(global.color);
    let deadline = args.duration.map(|d| Instant::now() + d);
    let limit = if args.once { Some(1) } else { args.count };

    let mut printed = 0usize;
    let mut last: Option<Printed> = None;
    let result = loop {
        let entry = view.current();
        if should_print(&entry, last.as_ref()) {
            let rendered = output::render_entry(
                global.output,
                &resource,
                &entry,
                *dashboard.stream_state().borrow(),
                color,
            );
            output::print_output(&rendered, global.quiet);
            last = Some(Printed::from(&entry));
            printed += 1;

            if args.once && entry.is_error() && !entry.has_data() {
                break Err(CliError::Fetch {
                    resource: resource.to_string(),
                    message: entry.error.unwrap_or_default(),
                });
            }
            if limit.is_some_and(|n| printed >= n) {
                break Ok(());
            }
        }

        tokio::select! {
            changed = view.changed() => {
                if changed.is_none() {
                    break Ok(());
                }
            }
            () = wait_until(deadline) => {
                tracing::debug!("watch duration elapsed");
                break Ok(());
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    drop(view);
    dashboard.shutdown().await;
    result
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Change detection ─────────────────────────────────────────────────

/// What the last printed update showed.
struct Printed {
    data: Option<Arc<serde_json::Value>>,
    error: Option<String>,
}

impl From<&CacheEntry> for Printed {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            data: entry.data.clone(),
            error: entry.error.clone(),
        }
    }
}

/// Print when the data or error changed. Phase-only transitions (fetch
/// started, went stale) are not worth a new screen.
fn should_print(entry: &CacheEntry, last: Option<&Printed>) -> bool {
    if !entry.has_data() && !entry.is_error() {
        return false;
    }
    let Some(last) = last else {
        return true;
    };
    let same_data = match (&entry.data, &last.data) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };
    !same_data || entry.error != last.error
}
