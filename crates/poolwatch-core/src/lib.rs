// poolwatch-core: Real-time cache layer between poolwatch-api and consumers.

pub mod address;
pub mod channel;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod key;
pub mod merge;
pub mod model;
pub mod resource;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use address::{AddressRegistry, AddressSubscription, ScopedAddress};
pub use channel::EventChannel;
pub use config::{SyncConfig, TlsVerification, default_stream_url};
pub use dashboard::{Dashboard, ResourceView, ViewStream};
pub use error::CoreError;
pub use key::ResourceKey;
pub use merge::{BindingGuard, Merge, MergeEngine};
pub use resource::Resource;
pub use store::{
    CacheEntry, EntryPhase, EntryStream, RefreshPolicy, Registration, RetryPolicy, SnapshotCache,
    UpdateOutcome,
};

// Stream types consumers need alongside the dashboard.
pub use poolwatch_api::{StreamEvent, StreamState};
