// ── Fetch execution ──
//
// One in-flight fetch per slot. The loop retries transient failures with
// exponential back-off, writes the outcome into the slot's watch channel,
// and gives up early if the slot is evicted underneath it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cache::Slot;
use super::entry::{EntryPhase, RetryPolicy};
use crate::error::CoreError;

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Value, CoreError>> + Send>>;

/// Type-erased snapshot fetch. Called once per attempt.
pub type Fetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

impl Slot {
    /// Start a fetch unless one is already running. Returns `false` when
    /// the call joined an in-flight fetch or the slot has nothing to fetch.
    pub(crate) fn fetch(self: &Arc<Self>) -> bool {
        let (fetcher, retry, stale_time) = {
            let control = self.control();
            let Some(fetcher) = control.fetcher.clone() else {
                return false;
            };
            (fetcher, control.policy.retry.clone(), control.policy.stale_time)
        };

        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(key = %self.key, "joining in-flight fetch");
            return false;
        }

        self.entry.send_modify(|entry| entry.phase = EntryPhase::Fetching);

        let slot = Arc::clone(self);
        tokio::spawn(async move {
            slot.run_fetch(&fetcher, &retry, stale_time).await;
        });
        true
    }

    async fn run_fetch(&self, fetcher: &Fetcher, retry: &RetryPolicy, stale_time: Duration) {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                () = self.evicted.cancelled() => {
                    self.in_flight.store(false, Ordering::Release);
                    return;
                }
                result = fetcher() => result,
            };

            match result {
                Ok(value) => {
                    let now = Instant::now();
                    self.entry.send_modify(|entry| {
                        self.in_flight.store(false, Ordering::Release);
                        entry.data = Some(Arc::new(value));
                        entry.phase = EntryPhase::Fresh;
                        entry.error = None;
                        entry.last_fetched_at = Some(now);
                        entry.stale_at = Some(now + stale_time);
                        entry.updated_at = Some(Utc::now());
                        entry.retry_count = 0;
                    });
                    debug!(key = %self.key, "snapshot fetched");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    attempt += 1;
                    debug!(
                        key = %self.key,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "fetch failed, retrying"
                    );
                    self.entry.send_modify(|entry| {
                        entry.error = Some(e.to_string());
                        entry.retry_count = attempt;
                    });
                    if !sleep_unless_evicted(&self.evicted, delay).await {
                        self.in_flight.store(false, Ordering::Release);
                        return;
                    }
                }
                Err(e) => {
                    warn!(key = %self.key, attempts = attempt + 1, error = %e, "fetch failed");
                    self.entry.send_modify(|entry| {
                        self.in_flight.store(false, Ordering::Release);
                        entry.phase = EntryPhase::Failed;
                        entry.error = Some(e.to_string());
                        entry.retry_count = attempt;
                    });
                    return;
                }
            }
        }
    }
}

/// Returns `false` if the slot was evicted before `delay` elapsed.
async fn sleep_unless_evicted(evicted: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = evicted.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

// ── Polling ──────────────────────────────────────────────────────────

/// Refetch every `interval` until `cancel` fires. The first fetch is the
/// registration's own, so the immediate tick is skipped.
pub(crate) async fn poll_task(slot: Arc<Slot>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = slot.evicted.cancelled() => break,
            _ = ticker.tick() => {
                if slot.enabled() {
                    slot.fetch();
                }
            }
        }
    }
    debug!(key = %slot.key, "poller stopped");
}
