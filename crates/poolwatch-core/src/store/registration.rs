// ── Registrations ──
//
// A consumer's handle on one cache entry. Holding it keeps the entry alive
// (and polled, if the policy says so); dropping it releases the consumer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_stream::wrappers::WatchStream;

use super::cache::{SnapshotCache, Slot};
use super::entry::CacheEntry;
use crate::key::ResourceKey;

/// Live interest in one resource.
///
/// Provides point-in-time access to the entry and change notification via
/// [`changed()`](Self::changed) or by converting into a `Stream`.
pub struct Registration {
    cache: SnapshotCache,
    slot: Arc<Slot>,
    receiver: watch::Receiver<CacheEntry>,
}

impl Registration {
    pub(crate) fn new(cache: SnapshotCache, slot: Arc<Slot>) -> Self {
        let receiver = slot.entry.subscribe();
        Self {
            cache,
            slot,
            receiver,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.slot.key
    }

    /// The entry as of now, with staleness applied.
    pub fn current(&self) -> CacheEntry {
        self.slot.observe(Instant::now());
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new entry.
    /// Returns `None` once the entry can no longer change.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Force a fetch regardless of staleness. Returns `false` when it joined
    /// an in-flight fetch or the registration is disabled.
    pub fn refetch(&self) -> bool {
        self.slot.enabled() && self.slot.fetch()
    }

    /// Convert into a `Stream` of entries. The registration stays alive for
    /// as long as the stream does.
    pub fn into_stream(self) -> EntryStream {
        let inner = WatchStream::new(self.receiver.clone());
        EntryStream {
            inner,
            _registration: self,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.cache.release(&self.slot);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.slot.key)
            .finish_non_exhaustive()
    }
}

/// `Stream` adapter backed by the entry's `watch::Receiver`.
///
/// Yields the current entry first, then every subsequent change.
pub struct EntryStream {
    inner: WatchStream<CacheEntry>,
    _registration: Registration,
}

impl Stream for EntryStream {
    type Item = CacheEntry;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
