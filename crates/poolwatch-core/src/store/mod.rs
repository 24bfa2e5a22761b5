// ── Snapshot store ──
//
// Keyed cache of REST snapshots with fetch deduplication, bounded retry,
// polling and time-based eviction.

mod cache;
mod entry;
mod fetch;
mod registration;

pub use cache::{SnapshotCache, UpdateOutcome};
pub use entry::{CacheEntry, EntryPhase, RefreshPolicy, RetryPolicy};
pub use fetch::{FetchFuture, Fetcher, fetcher};
pub use registration::{EntryStream, Registration};
