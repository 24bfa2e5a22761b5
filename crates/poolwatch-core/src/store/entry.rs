// ── Cache entry state ──
//
// One `CacheEntry` per ResourceKey, plus the policies that drive its
// transitions. The phase machine:
//
//   Idle ──fetch──▶ Fetching ──ok──▶ Fresh ──stale_time──▶ Stale
//                     │  ▲                                   │
//                     │  └──────────── fetch ◀───────────────┘
//                     └──retries exhausted──▶ Failed ──fetch──▶ Fetching
//
// Any phase ──(no consumers for gc_time)──▶ evicted (entry removed).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

/// Lifecycle phase of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntryPhase {
    /// Registered but never fetched (or disabled).
    Idle,
    /// A fetch is in flight (including retry back-off).
    Fetching,
    /// Holds data younger than the stale window.
    Fresh,
    /// Holds data older than the stale window; next mount or poll refetches.
    Stale,
    /// The last fetch exhausted its retries. Earlier data, if any, is kept.
    Failed,
}

/// Snapshot of one cached resource.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Option<Arc<Value>>,
    pub phase: EntryPhase,
    /// Message of the most recent fetch failure.
    pub error: Option<String>,
    pub last_fetched_at: Option<Instant>,
    pub stale_at: Option<Instant>,
    /// Wall-clock time of the last write, from a fetch or a merge.
    pub updated_at: Option<DateTime<Utc>>,
    /// Consecutive failures of the current (or last) fetch.
    pub retry_count: u32,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self::idle()
    }
}

impl CacheEntry {
    pub(crate) fn idle() -> Self {
        Self {
            data: None,
            phase: EntryPhase::Idle,
            error: None,
            last_fetched_at: None,
            stale_at: None,
            updated_at: None,
            retry_count: 0,
        }
    }

    /// First load in progress: fetching with nothing to show yet.
    pub fn is_loading(&self) -> bool {
        self.phase == EntryPhase::Fetching && self.data.is_none()
    }

    pub fn is_fetching(&self) -> bool {
        self.phase == EntryPhase::Fetching
    }

    pub fn is_error(&self) -> bool {
        self.phase == EntryPhase::Failed
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Whether a `Fresh` entry has outlived its stale window at `now`.
    pub fn is_stale_at(&self, now: Instant) -> bool {
        match self.phase {
            EntryPhase::Fresh => self.stale_at.is_none_or(|at| now >= at),
            EntryPhase::Stale => true,
            _ => false,
        }
    }

    /// Decode the cached JSON into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.data.as_deref().map(T::deserialize)
    }
}

// ── Policies ─────────────────────────────────────────────────────────

/// Bounded exponential back-off for failed fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on the delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min(base * 2^attempt, max)`, where `attempt` counts from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// How a registered resource is kept fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// How long fetched data counts as fresh. Default: zero (always stale).
    pub stale_time: Duration,
    /// Refetch period while at least one consumer is registered.
    pub poll_interval: Option<Duration>,
    /// Inactivity window after the last consumer leaves. Default: 5 min.
    pub gc_time: Duration,
    /// Disabled registrations hold the entry but never fetch or poll.
    pub enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            poll_interval: None,
            gc_time: Duration::from_secs(300),
            enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl RefreshPolicy {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn idle_entry_flags() {
        let entry = CacheEntry::idle();
        assert!(!entry.is_loading());
        assert!(!entry.is_error());
        assert!(!entry.has_data());
        assert_eq!(entry.phase.to_string(), "idle");
    }

    #[test]
    fn loading_only_without_data() {
        let mut entry = CacheEntry::idle();
        entry.phase = EntryPhase::Fetching;
        assert!(entry.is_loading());

        entry.data = Some(Arc::new(Value::Null));
        assert!(!entry.is_loading());
        assert!(entry.is_fetching());
    }

    #[test]
    fn fresh_turns_stale_at_deadline() {
        let now = Instant::now();
        let mut entry = CacheEntry::idle();
        entry.phase = EntryPhase::Fresh;
        entry.stale_at = Some(now + Duration::from_secs(10));

        assert!(!entry.is_stale_at(now));
        assert!(entry.is_stale_at(now + Duration::from_secs(10)));
    }

    #[test]
    fn decode_typed_view() {
        let mut entry = CacheEntry::idle();
        assert!(entry.decode::<Vec<u32>>().is_none());

        entry.data = Some(Arc::new(serde_json::json!([1, 2, 3])));
        assert_eq!(entry.decode::<Vec<u32>>().unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn policy_builders() {
        let policy = RefreshPolicy::default()
            .with_stale_time(Duration::from_secs(10))
            .with_poll_interval(Duration::from_secs(30))
            .with_gc_time(Duration::from_secs(60))
            .enabled(false);
        assert_eq!(policy.poll_interval, Some(Duration::from_secs(30)));
        assert_eq!(policy.gc_time, Duration::from_secs(60));
        assert!(!policy.enabled);
    }
}
