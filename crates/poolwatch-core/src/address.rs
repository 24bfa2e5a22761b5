// ── Address-scoped subscriptions ──
//
// Miner events are only pushed for addresses the client has subscribed to.
// Views that show a miner hold an `AddressSubscription`; the registry
// reference-counts them so the server sees one subscribe per address and
// one unsubscribe when the last view lets go.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use poolwatch_api::{ControlMessage, StreamState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::EventChannel;

const WORKER_SEPARATOR: char = '.';
/// Route form of the worker split, `base/worker`.
const SEGMENT_SEPARATOR: char = '/';

// ── ScopedAddress ────────────────────────────────────────────────────

/// A miner address, optionally narrowed to one worker.
///
/// `base.worker` and the segment pair `(base, worker)` normalize to the same
/// value. Comparisons ignore ASCII case.
#[derive(Debug, Clone)]
pub struct ScopedAddress {
    base: String,
    worker: Option<String>,
}

impl ScopedAddress {
    /// Parse `base`, `base.worker` or `base/worker`. Returns `None` for a
    /// blank address.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once([WORKER_SEPARATOR, SEGMENT_SEPARATOR]) {
            Some((base, worker)) => Self::from_segments(base, Some(worker)),
            None => Self::from_segments(raw, None),
        }
    }

    /// Build from route segments. An empty worker segment means "no worker".
    pub fn from_segments(base: &str, worker: Option<&str>) -> Option<Self> {
        let base = base.trim();
        if base.is_empty() {
            return None;
        }
        let worker = worker
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_owned);
        Some(Self {
            base: base.to_owned(),
            worker,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn worker(&self) -> Option<&str> {
        self.worker.as_deref()
    }

    pub fn is_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// `base` or `base.worker`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Whether an event tagged with `source` belongs to this scope.
    ///
    /// A worker scope needs the full address to match; a base scope accepts
    /// the base address and any of its workers.
    pub fn accepts(&self, source: &str) -> bool {
        let Some(source) = Self::parse(source) else {
            return false;
        };
        if !self.base.eq_ignore_ascii_case(&source.base) {
            return false;
        }
        match (&self.worker, &source.worker) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            (Some(_), None) => false,
        }
    }
}

impl PartialEq for ScopedAddress {
    fn eq(&self, other: &Self) -> bool {
        self.base.eq_ignore_ascii_case(&other.base)
            && match (&self.worker, &other.worker) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl Eq for ScopedAddress {}

impl fmt::Display for ScopedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.worker {
            Some(worker) => write!(f, "{}{WORKER_SEPARATOR}{worker}", self.base),
            None => f.write_str(&self.base),
        }
    }
}

// ── AddressRegistry ──────────────────────────────────────────────────

/// Reference-counted set of subscribed addresses. Cheaply cloneable.
#[derive(Clone)]
pub struct AddressRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    channel: Arc<dyn EventChannel>,
    counts: Mutex<HashMap<String, usize>>,
}

impl AddressRegistry {
    pub fn new(channel: Arc<dyn EventChannel>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                channel,
                counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start observing `address`. A blank address yields an inactive
    /// subscription that sends nothing.
    pub fn activate(&self, address: &str) -> AddressSubscription {
        let address = ScopedAddress::parse(address).map(|a| a.canonical());
        if let Some(address) = &address {
            self.acquire(address);
        }
        AddressSubscription {
            registry: self.clone(),
            address,
        }
    }

    /// Addresses with at least one live subscription, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut active: Vec<String> = self.counts().keys().cloned().collect();
        active.sort();
        active
    }

    /// Re-send `subscribeMiner` for every active address whenever the
    /// connection comes back. Server-side subscriptions die with the socket.
    pub fn spawn_resubscriber(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let mut state = self.inner.channel.state();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = *state.borrow_and_update() == StreamState::Connected;
                        if connected {
                            registry.resubscribe_all();
                        }
                    }
                }
            }
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn counts(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.inner
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Emission happens under the lock so subscribe/unsubscribe pairs for
    // one address leave in the order their counts changed.
    fn acquire(&self, address: &str) {
        let mut counts = self.counts();
        let count = counts.entry(address.to_owned()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.send(ControlMessage::SubscribeMiner {
                address: address.to_owned(),
            });
        }
    }

    fn release(&self, address: &str) {
        let mut counts = self.counts();
        let Some(count) = counts.get_mut(address) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(address);
            self.send(ControlMessage::UnsubscribeMiner {
                address: address.to_owned(),
            });
        }
    }

    fn resubscribe_all(&self) {
        let counts = self.counts();
        for address in counts.keys() {
            self.send(ControlMessage::SubscribeMiner {
                address: address.clone(),
            });
        }
        if !counts.is_empty() {
            debug!(count = counts.len(), "re-subscribed miner addresses");
        }
    }

    fn send(&self, message: ControlMessage) {
        if !self.inner.channel.emit(&message) {
            debug!(
                event = message.event_name(),
                address = message.address(),
                "control message dropped, stream not connected"
            );
        }
    }
}

// ── AddressSubscription ──────────────────────────────────────────────

/// One view's interest in a miner address. Unsubscribes on drop.
pub struct AddressSubscription {
    registry: AddressRegistry,
    address: Option<String>,
}

impl AddressSubscription {
    /// Subscribe to `address` on a channel without a shared registry. Two
    /// subscriptions made this way do not share a reference count.
    pub fn activate(channel: Arc<dyn EventChannel>, address: &str) -> Self {
        AddressRegistry::new(channel).activate(address)
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.address.is_some()
    }

    /// Move to another address: the previous one is released before the
    /// new one is acquired. Switching to the same address is a no-op.
    pub fn switch_to(&mut self, address: &str) {
        let next = ScopedAddress::parse(address).map(|a| a.canonical());
        if next == self.address {
            return;
        }
        if let Some(previous) = self.address.take() {
            self.registry.release(&previous);
        }
        if let Some(next) = &next {
            self.registry.acquire(next);
        }
        self.address = next;
    }
}

impl Drop for AddressSubscription {
    fn drop(&mut self) {
        if let Some(address) = self.address.take() {
            self.registry.release(&address);
        }
    }
}

impl fmt::Debug for AddressSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSubscription")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::testing::MockChannel;

    fn sub(address: &str) -> ControlMessage {
        ControlMessage::SubscribeMiner {
            address: address.into(),
        }
    }

    fn unsub(address: &str) -> ControlMessage {
        ControlMessage::UnsubscribeMiner {
            address: address.into(),
        }
    }

    #[test]
    fn dotted_and_segment_forms_normalize_alike() {
        let dotted = ScopedAddress::parse("kaspa:qr0abc.Rig01").unwrap();
        let segments = ScopedAddress::from_segments("kaspa:qr0abc", Some("rig01")).unwrap();
        assert_eq!(dotted, segments);
        assert_eq!(dotted.canonical(), "kaspa:qr0abc.Rig01");
        assert_eq!(dotted.worker(), Some("Rig01"));

        let slashed = ScopedAddress::parse("kaspa:qr0abc/rig01").unwrap();
        assert_eq!(slashed, segments);
        assert_eq!(slashed.canonical(), "kaspa:qr0abc.rig01");
        assert!(slashed.accepts("kaspa:qr0abc.RIG01"));
    }

    #[test]
    fn blank_addresses_do_not_parse() {
        assert!(ScopedAddress::parse("").is_none());
        assert!(ScopedAddress::parse("  ").is_none());
        assert!(ScopedAddress::from_segments("", Some("rig")).is_none());
        let bare = ScopedAddress::parse("kaspa:qr0abc.").unwrap();
        assert!(!bare.is_worker());
    }

    #[test]
    fn worker_scope_accepts_only_its_worker() {
        let scope = ScopedAddress::parse("kaspa:qr0abc.rig01").unwrap();
        assert!(scope.accepts("kaspa:qr0abc.RIG01"));
        assert!(!scope.accepts("kaspa:qr0abc.rig02"));
        assert!(!scope.accepts("kaspa:qr0abc"));
        assert!(!scope.accepts(""));
    }

    #[test]
    fn base_scope_accepts_all_workers() {
        let scope = ScopedAddress::parse("kaspa:qr0abc").unwrap();
        assert!(scope.accepts("kaspa:qr0abc"));
        assert!(scope.accepts("kaspa:QR0ABC.rig07"));
        assert!(!scope.accepts("kaspa:qzzzz.rig07"));
    }

    #[test]
    fn shared_address_subscribes_once() {
        let channel = MockChannel::connected();
        let registry = AddressRegistry::new(channel.clone());

        let a = registry.activate("kaspa:qr0abc");
        let b = registry.activate("kaspa:qr0abc");
        assert_eq!(channel.sent(), vec![sub("kaspa:qr0abc")]);

        drop(a);
        assert_eq!(channel.sent().len(), 1);
        drop(b);
        assert_eq!(
            channel.sent(),
            vec![sub("kaspa:qr0abc"), unsub("kaspa:qr0abc")]
        );
        assert!(registry.active().is_empty());
    }

    #[test]
    fn switch_unsubscribes_previous_first() {
        let channel = MockChannel::connected();
        let registry = AddressRegistry::new(channel.clone());

        let mut view = registry.activate("kaspa:one");
        view.switch_to("kaspa:one");
        view.switch_to("kaspa:two");
        assert_eq!(view.address(), Some("kaspa:two"));
        drop(view);

        assert_eq!(
            channel.sent(),
            vec![
                sub("kaspa:one"),
                unsub("kaspa:one"),
                sub("kaspa:two"),
                unsub("kaspa:two"),
            ]
        );
    }

    #[test]
    fn empty_address_is_inactive() {
        let channel = MockChannel::connected();
        let registry = AddressRegistry::new(channel.clone());

        let mut view = registry.activate("");
        assert!(!view.is_active());
        view.switch_to("kaspa:one");
        assert!(view.is_active());
        view.switch_to("");
        assert!(!view.is_active());

        assert_eq!(channel.sent(), vec![sub("kaspa:one"), unsub("kaspa:one")]);
    }

    #[tokio::test]
    async fn resubscribes_after_reconnect() {
        let channel = MockChannel::connected();
        let registry = AddressRegistry::new(channel.clone());
        let cancel = CancellationToken::new();
        let task = registry.spawn_resubscriber(cancel.clone());

        let _view = registry.activate("kaspa:qr0abc.rig01");
        channel.set_state(StreamState::Reconnecting { attempt: 1 });
        channel.set_state(StreamState::Connected);

        for _ in 0..20 {
            if channel.sent().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            channel.sent(),
            vec![sub("kaspa:qr0abc.rig01"), sub("kaspa:qr0abc.rig01")]
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn standalone_subscription_unsubscribes_on_drop() {
        let channel = MockChannel::connected();
        let subscription = AddressSubscription::activate(channel.clone(), " kaspa:solo ");
        assert_eq!(subscription.address(), Some("kaspa:solo"));

        drop(subscription);
        assert_eq!(channel.sent(), vec![sub("kaspa:solo"), unsub("kaspa:solo")]);
    }
}
