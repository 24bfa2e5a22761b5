// ── Domain model ──
//
// Typed views over cached JSON snapshots. The cache stores raw `Value`s so
// merges stay shape-agnostic; consumers decode into these types with
// `CacheEntry::decode`. Fields the server adds later land in `extra`.

pub mod chart;
pub mod miner;
pub mod pool;

// ── Re-exports ──────────────────────────────────────────────────────

pub use chart::ChartSeries;
pub use miner::{MinerProfile, MinerSummary, Share, ShareUpdate, WorkerSummary};
pub use pool::{Block, NetworkInfo, Payment, PoolOverview};
