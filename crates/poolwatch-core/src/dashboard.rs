// ── Dashboard ──
//
// Owns the snapshot cache, the merge engine and the address registry, all
// sharing one injected event channel. `watch()` is how a view mounts a
// resource; dropping the returned `ResourceView` unmounts it.

use std::sync::Arc;

use poolwatch_api::transport::{TlsMode, TransportConfig};
use poolwatch_api::{PoolClient, StreamConfig, StreamConnection, StreamState};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::address::{AddressRegistry, AddressSubscription};
use crate::channel::EventChannel;
use crate::config::{SyncConfig, TlsVerification};
use crate::error::CoreError;
use crate::key::ResourceKey;
use crate::merge::{BindingGuard, MergeEngine};
use crate::resource::Resource;
use crate::store::{CacheEntry, EntryStream, Registration, SnapshotCache};

// ── Dashboard ────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable. Call [`start()`](Self::start) once inside a Tokio
/// runtime to begin applying stream events.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<DashboardInner>,
}

struct DashboardInner {
    config: SyncConfig,
    client: Arc<PoolClient>,
    channel: Arc<dyn EventChannel>,
    cache: SnapshotCache,
    engine: MergeEngine,
    addresses: AddressRegistry,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dashboard {
    /// Assemble a dashboard from parts. Does not start anything.
    pub fn new(config: SyncConfig, client: PoolClient, channel: Arc<dyn EventChannel>) -> Self {
        let cache = SnapshotCache::new();
        let engine = MergeEngine::new(cache.clone());
        let addresses = AddressRegistry::new(Arc::clone(&channel));

        Self {
            inner: Arc::new(DashboardInner {
                config,
                client: Arc::new(client),
                channel,
                cache,
                engine,
                addresses,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Build the REST client and stream connection described by `config`
    /// and start the dashboard.
    pub async fn connect(config: SyncConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_to_transport(&config.tls),
            timeout: config.timeout,
        };
        let client = PoolClient::new(config.api_url.clone(), &transport)?;

        let mut stream = StreamConfig::new(config.resolved_stream_url()?);
        stream.max_attempts = config.reconnect_attempts;
        stream.reconnect_delay = config.reconnect_delay;
        info!(api = %config.api_url, stream = %stream.url, "connecting to pool");

        let channel: Arc<dyn EventChannel> = Arc::new(StreamConnection::new(stream));
        let dashboard = Self::new(config, client, channel);
        dashboard.start().await;
        Ok(dashboard)
    }

    /// Spawn the merge dispatcher and the address re-subscriber. Calling it
    /// again is a no-op.
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        let cancel = self.inner.cancel.clone();
        handles.push(self.inner.engine.spawn(&self.inner.channel, cancel.clone()));
        handles.push(self.inner.addresses.spawn_resubscriber(cancel));
        debug!("dashboard started");
    }

    /// Stop background tasks and close the event channel.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.channel.close();
        debug!("dashboard stopped");
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.inner.cache
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.inner.engine
    }

    pub fn addresses(&self) -> &AddressRegistry {
        &self.inner.addresses
    }

    pub fn client(&self) -> &PoolClient {
        &self.inner.client
    }

    pub fn stream_state(&self) -> watch::Receiver<StreamState> {
        self.inner.channel.state()
    }

    /// Why the stream stopped reconnecting, if it did.
    pub fn stream_failure(&self) -> Option<String> {
        self.inner.channel.last_failure()
    }

    // ── Views ────────────────────────────────────────────────────────

    /// Mount `resource`: register its fetch, bind its stream merge and, for
    /// miner share events, subscribe to its address.
    pub fn watch(&self, resource: Resource) -> ResourceView {
        let registration = self.register(&resource);
        let binding = self.bind(&resource);
        let address = resource
            .needs_address_subscription()
            .then(|| self.inner.addresses.activate(resource.raw_address().unwrap_or_default()));

        debug!(resource = %resource, key = %registration.key(), "watching");
        ResourceView {
            binding,
            address,
            registration,
            resource,
        }
    }

    /// Point an existing view at another resource, typically the same kind
    /// for a different address. The old binding is released and the old
    /// address unsubscribed before the new one is subscribed.
    pub fn rewatch(&self, view: &mut ResourceView, resource: Resource) {
        if view.resource == resource {
            return;
        }

        view.binding = None;
        view.binding = self.bind(&resource);

        let address = resource.raw_address().unwrap_or_default();
        match (&mut view.address, resource.needs_address_subscription()) {
            (Some(subscription), true) => subscription.switch_to(address),
            (slot, true) => *slot = Some(self.inner.addresses.activate(address)),
            (slot, false) => *slot = None,
        }

        view.registration = self.register(&resource);
        debug!(resource = %resource, "rewatched");
        view.resource = resource;
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Save account settings for the owner of `token`.
    pub async fn update_account_settings(
        &self,
        token: &SecretString,
        settings: &impl Serialize,
    ) -> Result<Value, CoreError> {
        Ok(self
            .inner
            .client
            .update_account_settings(token, settings)
            .await?)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn register(&self, resource: &Resource) -> Registration {
        let mut policy = resource.policy();
        policy.retry = self.inner.config.retry.clone();
        if !self.inner.config.polling_enabled {
            policy.poll_interval = None;
        }
        self.inner.cache.register(
            resource.key(),
            resource.fetcher(&self.inner.client),
            policy,
        )
    }

    fn bind(&self, resource: &Resource) -> Option<BindingGuard> {
        let (event, merge) = resource.binding()?;
        Some(self.inner.engine.bind(resource.key(), event, merge))
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

// ── ResourceView ─────────────────────────────────────────────────────

/// A mounted resource. Holds its cache registration, stream binding and
/// address subscription; dropping it releases all three.
pub struct ResourceView {
    // Field order is drop order: stop merging before letting go of the entry.
    binding: Option<BindingGuard>,
    address: Option<AddressSubscription>,
    registration: Registration,
    resource: Resource,
}

impl ResourceView {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn key(&self) -> &ResourceKey {
        self.registration.key()
    }

    pub fn current(&self) -> CacheEntry {
        self.registration.current()
    }

    /// Wait for the next change to the entry.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.registration.changed().await
    }

    pub fn refetch(&self) -> bool {
        self.registration.refetch()
    }

    /// Whether this view currently receives stream deltas.
    pub fn is_live(&self) -> bool {
        self.binding.is_some()
    }

    pub fn subscribed_address(&self) -> Option<&str> {
        self.address.as_ref().and_then(AddressSubscription::address)
    }

    /// Convert into a `Stream` of entries that keeps the view mounted.
    pub fn into_stream(self) -> ViewStream {
        let Self {
            binding,
            address,
            registration,
            resource: _,
        } = self;
        ViewStream {
            _binding: binding,
            _address: address,
            inner: registration.into_stream(),
        }
    }
}

impl std::fmt::Debug for ResourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceView")
            .field("resource", &self.resource)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

/// Entry stream of a mounted view.
pub struct ViewStream {
    _binding: Option<BindingGuard>,
    _address: Option<AddressSubscription>,
    inner: EntryStream,
}

impl futures_core::Stream for ViewStream {
    type Item = CacheEntry;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}
