// ── Merge engine ──
//
// Central registry of (ResourceKey, event) bindings. Repeated binds of the
// same pair share one binding: the newest merge function replaces the old
// one and a reference count tracks the live guards.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use poolwatch_api::StreamEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::Merge;
use crate::channel::EventChannel;
use crate::key::ResourceKey;
use crate::store::{SnapshotCache, UpdateOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingId {
    key: ResourceKey,
    event: String,
}

struct Binding {
    merge: ArcSwap<Merge>,
    refs: AtomicUsize,
}

/// Applies stream events to cached entries. Cheaply cloneable.
#[derive(Clone)]
pub struct MergeEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    cache: SnapshotCache,
    bindings: DashMap<BindingId, Arc<Binding>>,
}

impl MergeEngine {
    pub fn new(cache: SnapshotCache) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache,
                bindings: DashMap::new(),
            }),
        }
    }

    /// Route `event` into `key` through `merge` for as long as the guard
    /// lives. Binding a pair that already exists swaps in `merge`.
    pub fn bind(&self, key: ResourceKey, event: impl Into<String>, merge: Merge) -> BindingGuard {
        let id = BindingId {
            key,
            event: event.into(),
        };

        let binding = match self.inner.bindings.entry(id.clone()) {
            Entry::Occupied(existing) => {
                let binding = Arc::clone(existing.get());
                binding.merge.store(Arc::new(merge));
                binding.refs.fetch_add(1, Ordering::AcqRel);
                binding
            }
            Entry::Vacant(slot) => {
                let binding = Arc::new(Binding {
                    merge: ArcSwap::from_pointee(merge),
                    refs: AtomicUsize::new(1),
                });
                slot.insert(Arc::clone(&binding));
                debug!(key = %id.key, event = %id.event, "binding installed");
                binding
            }
        };

        BindingGuard {
            engine: self.clone(),
            id,
            binding,
        }
    }

    /// Number of distinct (key, event) pairs currently bound.
    pub fn binding_count(&self) -> usize {
        self.inner.bindings.len()
    }

    /// Apply one event to every entry bound to its name. Returns how many
    /// entries changed. Entries without data drop the event.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let targets: Vec<(ResourceKey, Arc<Merge>)> = self
            .inner
            .bindings
            .iter()
            .filter(|b| b.key().event == event.name)
            .map(|b| (b.key().key.clone(), b.value().merge.load_full()))
            .collect();

        let mut updated = 0;
        for (key, merge) in targets {
            let outcome = self
                .inner
                .cache
                .set_data(&key, |old| merge.apply(old, &event.payload));
            match outcome {
                UpdateOutcome::Updated => updated += 1,
                UpdateOutcome::NoData => {
                    trace!(key = %key, event = %event.name, "no snapshot yet, delta dropped");
                }
                UpdateOutcome::Unchanged | UpdateOutcome::Missing => {}
            }
        }
        updated
    }

    /// Feed every event from `channel` through [`dispatch`](Self::dispatch)
    /// until `cancel` fires or the channel closes.
    pub fn spawn(&self, channel: &Arc<dyn EventChannel>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        let mut events = channel.events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            engine.dispatch(&event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "merge dispatcher lagged, events lost until next refetch");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("merge dispatcher stopped");
        })
    }

    fn release(&self, id: &BindingId) {
        let removed = self
            .inner
            .bindings
            .remove_if(id, |_, binding| binding.refs.fetch_sub(1, Ordering::AcqRel) == 1);
        if removed.is_some() {
            debug!(key = %id.key, event = %id.event, "binding removed");
        }
    }
}

/// Keeps one binding reference alive. Dropping it releases exactly that
/// reference.
pub struct BindingGuard {
    engine: MergeEngine,
    id: BindingId,
    binding: Arc<Binding>,
}

impl BindingGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.id.key
    }

    pub fn event(&self) -> &str {
        &self.id.event
    }

    /// Replace the merge function without rebinding.
    pub fn set_merge(&self, merge: Merge) {
        self.binding.merge.store(Arc::new(merge));
    }
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        self.engine.release(&self.id);
    }
}

impl std::fmt::Debug for BindingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingGuard")
            .field("key", &self.id.key)
            .field("event", &self.id.event)
            .finish_non_exhaustive()
    }
}
