// ── Snapshot cache ──
//
// Keyed store of `CacheEntry` values with push-based change notification.
// Each key owns a `Slot`: a watch channel carrying the entry, plus the
// registration bookkeeping (fetcher, policy, consumer count, poller and
// GC timer). Lock order is always map shard, then slot control.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::entry::{CacheEntry, EntryPhase, RefreshPolicy};
use super::fetch::{Fetcher, poll_task};
use super::registration::Registration;
use crate::key::ResourceKey;

/// Result of a read-modify-write against one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No entry exists for the key.
    Missing,
    /// The entry exists but has never received data; the update was dropped.
    NoData,
    /// The closure declined to produce a new value.
    Unchanged,
    Updated,
}

// ── Slot ─────────────────────────────────────────────────────────────

pub(crate) struct Slot {
    pub(crate) key: ResourceKey,
    pub(crate) entry: watch::Sender<CacheEntry>,
    pub(crate) in_flight: AtomicBool,
    /// Cancelled once the slot leaves the map; stops its poller and fetch.
    pub(crate) evicted: CancellationToken,
    control: Mutex<Control>,
}

pub(crate) struct Control {
    pub(crate) fetcher: Option<Fetcher>,
    pub(crate) policy: RefreshPolicy,
    pub(crate) consumers: usize,
    poller: Option<Poller>,
    gc_timer: Option<CancellationToken>,
    idle_since: Option<Instant>,
}

/// A running poll task and the interval it was started with.
struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Control {
    fn gc_due(&self, now: Instant) -> bool {
        self.consumers == 0
            && self
                .idle_since
                .is_some_and(|since| now >= since + self.policy.gc_time)
    }
}

impl Slot {
    fn new(key: ResourceKey) -> Self {
        let (entry, _) = watch::channel(CacheEntry::idle());
        Self {
            key,
            entry,
            in_flight: AtomicBool::new(false),
            evicted: CancellationToken::new(),
            control: Mutex::new(Control {
                fetcher: None,
                policy: RefreshPolicy::default(),
                consumers: 0,
                poller: None,
                gc_timer: None,
                idle_since: Some(Instant::now()),
            }),
        }
    }

    pub(crate) fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the `Fresh -> Stale` transition if the stale window has passed.
    /// Returns whether the entry now wants a fetch.
    pub(crate) fn observe(&self, now: Instant) -> bool {
        self.entry.send_if_modified(|entry| {
            if entry.phase == EntryPhase::Fresh && entry.is_stale_at(now) {
                entry.phase = EntryPhase::Stale;
                true
            } else {
                false
            }
        });
        matches!(
            self.entry.borrow().phase,
            EntryPhase::Idle | EntryPhase::Stale | EntryPhase::Failed
        )
    }

    pub(crate) fn enabled(&self) -> bool {
        let control = self.control();
        control.policy.enabled && control.fetcher.is_some()
    }

    /// Bring the poller in line with the current policy. A changed interval
    /// restarts it; a disabled policy or no interval stops it.
    fn start_poller(self: &Arc<Self>, control: &mut Control) {
        let wanted = control
            .policy
            .poll_interval
            .filter(|_| control.policy.enabled);
        if let Some(running) = control.poller.take() {
            if Some(running.interval) == wanted {
                control.poller = Some(running);
                return;
            }
            running.cancel.cancel();
            debug!(key = %self.key, "poll policy changed, poller stopped");
        }
        let Some(interval) = wanted else {
            return;
        };
        let cancel = CancellationToken::new();
        control.poller = Some(Poller {
            interval,
            cancel: cancel.clone(),
        });
        tokio::spawn(poll_task(Arc::clone(self), interval, cancel));
    }
}

// ── SnapshotCache ────────────────────────────────────────────────────

/// Shared keyed cache. Cheaply cloneable.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    slots: DashMap<ResourceKey, Arc<Slot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare interest in `key`, fetching through `fetcher` under `policy`.
    ///
    /// The latest registration's fetcher and policy replace earlier ones.
    /// Triggers a fetch when the entry is idle, stale or failed, joins an
    /// in-flight fetch otherwise, and starts polling if the policy asks for
    /// it. Must be called inside a Tokio runtime.
    pub fn register(
        &self,
        key: ResourceKey,
        fetcher: Fetcher,
        policy: RefreshPolicy,
    ) -> Registration {
        let now = Instant::now();
        let slot = {
            let slot_ref = self
                .inner
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new(key.clone())));
            let slot = Arc::clone(slot_ref.value());

            let mut control = slot.control();
            control.fetcher = Some(fetcher);
            control.policy = policy;
            control.consumers += 1;
            control.idle_since = None;
            if let Some(timer) = control.gc_timer.take() {
                timer.cancel();
            }
            slot.start_poller(&mut control);
            drop(control);
            drop(slot_ref);
            slot
        };

        if slot.enabled() && slot.observe(now) {
            slot.fetch();
        }
        debug!(key = %key, consumers = slot.control().consumers, "registered");

        Registration::new(self.clone(), slot)
    }

    /// Force a fetch for `key`, joining one already in flight.
    pub fn refetch(&self, key: &ResourceKey) -> bool {
        self.slot(key)
            .is_some_and(|slot| slot.enabled() && slot.fetch())
    }

    /// Atomic read-modify-write of an entry's data.
    ///
    /// `f` sees the current data and returns `Some(new)` to replace it or
    /// `None` to leave it alone. Entries without data are never touched.
    pub fn set_data<F>(&self, key: &ResourceKey, f: F) -> UpdateOutcome
    where
        F: FnOnce(&Value) -> Option<Value>,
    {
        let Some(slot) = self.slot(key) else {
            return UpdateOutcome::Missing;
        };

        let mut outcome = UpdateOutcome::NoData;
        slot.entry.send_if_modified(|entry| {
            let Some(data) = entry.data.as_deref() else {
                return false;
            };
            match f(data) {
                Some(next) => {
                    entry.data = Some(Arc::new(next));
                    entry.updated_at = Some(Utc::now());
                    outcome = UpdateOutcome::Updated;
                    true
                }
                None => {
                    outcome = UpdateOutcome::Unchanged;
                    false
                }
            }
        });
        outcome
    }

    /// Point-in-time copy of an entry.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let slot = self.slot(key)?;
        slot.observe(Instant::now());
        let entry = slot.entry.borrow().clone();
        Some(entry)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.inner.slots.iter().map(|r| r.key().clone()).collect()
    }

    /// Evict every unobserved entry whose GC window has elapsed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<(ResourceKey, Arc<Slot>)> = self
            .inner
            .slots
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        candidates
            .into_iter()
            .filter(|(key, slot)| self.inner.evict_if_due(key, slot, now))
            .count()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot(&self, key: &ResourceKey) -> Option<Arc<Slot>> {
        self.inner.slots.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Drop one consumer. The last one out stops polling and arms GC.
    pub(crate) fn release(&self, slot: &Arc<Slot>) {
        let mut control = slot.control();
        control.consumers = control.consumers.saturating_sub(1);
        if control.consumers > 0 {
            return;
        }

        if let Some(poller) = control.poller.take() {
            poller.cancel.cancel();
        }
        let now = Instant::now();
        control.idle_since = Some(now);
        let gc_time = control.policy.gc_time;

        // Drops can run outside a runtime; `sweep()` covers that case.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let timer = CancellationToken::new();
        control.gc_timer = Some(timer.clone());
        drop(control);

        let cache = Arc::downgrade(&self.inner);
        let slot = Arc::clone(slot);
        handle.spawn(gc_task(cache, slot, gc_time, timer));
        debug!(gc_secs = gc_time.as_secs(), "last consumer left, gc armed");
    }
}

impl CacheInner {
    fn evict_if_due(&self, key: &ResourceKey, slot: &Arc<Slot>, now: Instant) -> bool {
        let removed = self
            .slots
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, slot) && current.control().gc_due(now)
            })
            .is_some();
        if removed {
            slot.evicted.cancel();
            debug!(key = %key, "evicted idle cache entry");
        }
        removed
    }
}

async fn gc_task(
    cache: Weak<CacheInner>,
    slot: Arc<Slot>,
    gc_time: Duration,
    timer: CancellationToken,
) {
    tokio::select! {
        biased;
        () = timer.cancelled() => {}
        () = tokio::time::sleep(gc_time) => {
            if let Some(cache) = cache.upgrade() {
                cache.evict_if_due(&slot.key, &slot, Instant::now());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::CoreError;
    use crate::store::entry::RetryPolicy;
    use crate::store::fetch::fetcher;

    fn key() -> ResourceKey {
        ResourceKey::from(["pool", "overview"])
    }

    /// Fetcher that counts calls and returns `{"n": call}` after `delay`.
    fn counting(calls: &Arc<AtomicUsize>, delay: Duration) -> Fetcher {
        let calls = Arc::clone(calls);
        fetcher(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(json!({ "n": n }))
            }
        })
    }

    fn failing(calls: &Arc<AtomicUsize>) -> Fetcher {
        let calls = Arc::clone(calls);
        fetcher(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CoreError::ConnectionFailed {
                    url: "http://pool.test".into(),
                    reason: "refused".into(),
                })
            }
        })
    }

    /// Let spawned fetch and timer tasks run to their next suspension.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_registrations_share_one_fetch() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let policy = RefreshPolicy::default().with_stale_time(Duration::from_secs(10));

        let a = cache.register(key(), counting(&calls, Duration::from_millis(50)), policy.clone());
        let b = cache.register(key(), counting(&calls, Duration::from_millis(50)), policy);
        assert!(a.current().is_loading());

        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.current().data.as_deref(), Some(&json!({ "n": 1 })));
        assert_eq!(b.current().phase, EntryPhase::Fresh);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_not_refetched_on_mount() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_stale_time(Duration::from_secs(10));

        let first = cache.register(key(), counting(&calls, Duration::ZERO), policy.clone());
        settle().await;
        assert_eq!(first.current().phase, EntryPhase::Fresh);

        let _second = cache.register(key(), counting(&calls, Duration::ZERO), policy.clone());
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(first.current().phase, EntryPhase::Stale);

        let _third = cache.register(key(), counting(&calls, Duration::ZERO), policy);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_ignores_staleness_but_joins_in_flight() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_stale_time(Duration::from_secs(60));

        let reg = cache.register(key(), counting(&calls, Duration::from_millis(10)), policy);
        assert!(!cache.refetch(&key()), "joins the mount fetch");
        tokio::time::sleep(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(reg.refetch());
        tokio::time::sleep(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reg.current().data.as_deref(), Some(&json!({ "n": 2 })));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_fails_and_keeps_earlier_data() {
        let cache = SnapshotCache::new();
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        });

        let first = cache.register(key(), counting(&ok_calls, Duration::ZERO), policy.clone());
        settle().await;
        assert!(first.current().has_data());

        let bad_calls = Arc::new(AtomicUsize::new(0));
        // Zero stale time: the remount refetches with the new fetcher.
        let second = cache.register(key(), failing(&bad_calls), policy);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        let entry = second.current();
        assert_eq!(bad_calls.load(Ordering::SeqCst), 3, "initial attempt plus two retries");
        assert!(entry.is_error());
        assert_eq!(entry.retry_count, 2);
        assert!(entry.error.unwrap().contains("refused"));
        assert_eq!(entry.data.as_deref(), Some(&json!({ "n": 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_immediately() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let not_found = fetcher(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CoreError::NotFound {
                    resource: "miner".into(),
                })
            }
        });

        let reg = cache.register(key(), not_found, RefreshPolicy::default());
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reg.current().is_error());
        assert!(!reg.current().has_data());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_registration_never_fetches() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default()
            .with_poll_interval(Duration::from_secs(1))
            .enabled(false);

        let reg = cache.register(key(), counting(&calls, Duration::ZERO), policy);
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!reg.refetch());
        assert_eq!(reg.current().phase, EntryPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_runs_while_observed_and_stops_after() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_poll_interval(Duration::from_secs(30));

        let reg = cache.register(key(), counting(&calls, Duration::ZERO), policy);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        drop(reg);
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn later_registration_retunes_polling() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let every = |secs| RefreshPolicy::default().with_poll_interval(Duration::from_secs(secs));

        let _slow = cache.register(key(), counting(&calls, Duration::ZERO), every(60));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A faster interval replaces the running poller. The remount itself
        // refetches because the default stale time is zero.
        let _fast = cache.register(key(), counting(&calls, Duration::ZERO), every(10));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // Disabling stops polling for every consumer of the key.
        let _off = cache.register(key(), counting(&calls, Duration::ZERO), every(10).enabled(false));
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entry_is_evicted_after_gc_window() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_gc_time(Duration::from_secs(30));

        let reg = cache.register(key(), counting(&calls, Duration::ZERO), policy.clone());
        settle().await;
        drop(reg);

        tokio::time::sleep(Duration::from_secs(29)).await;
        settle().await;
        assert!(cache.contains(&key()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(!cache.contains(&key()));

        // Cold start: a new registration begins without data.
        let again = cache.register(key(), counting(&calls, Duration::from_millis(5)), policy);
        assert!(again.current().is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn remount_within_window_keeps_entry() {
        let cache = SnapshotCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RefreshPolicy::default().with_gc_time(Duration::from_secs(30));

        drop(cache.register(key(), counting(&calls, Duration::ZERO), policy.clone()));
        settle().await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        let _reg = cache.register(key(), counting(&calls, Duration::ZERO), policy);
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert!(cache.contains(&key()));
        assert_eq!(cache.sweep(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_data_drops_updates_without_data() {
        let cache = SnapshotCache::new();
        let k = ResourceKey::from(["pool", "blocks"]);
        assert_eq!(cache.set_data(&k, |_| Some(json!([]))), UpdateOutcome::Missing);

        let calls = Arc::new(AtomicUsize::new(0));
        let reg = cache.register(k.clone(), counting(&calls, Duration::from_secs(1)), RefreshPolicy::default());
        assert_eq!(
            cache.set_data(&k, |_| Some(json!([{ "epoch": 100 }]))),
            UpdateOutcome::NoData
        );
        assert!(reg.current().data.is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(cache.set_data(&k, |_| None), UpdateOutcome::Unchanged);
        assert_eq!(
            cache.set_data(&k, |old| Some(json!({ "prev": old }))),
            UpdateOutcome::Updated
        );
        assert_eq!(
            reg.current().data.as_deref(),
            Some(&json!({ "prev": { "n": 1 } }))
        );
    }
}
