// ── Miner domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the pool's miner list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerSummary {
    pub address: String,
    pub hashrate: Option<f64>,
    pub workers: Option<u64>,
    pub last_submitted_solution_time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single miner's profile with its workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerProfile {
    pub address: Option<String>,
    pub hashrate: Option<f64>,
    pub balance: Option<f64>,
    /// Newest share time across the miner and all of its workers.
    pub last_submitted_solution_time: Option<u64>,
    #[serde(default)]
    pub workers: Vec<WorkerSummary>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub name: Option<String>,
    pub address: Option<String>,
    pub hashrate: Option<f64>,
    pub last_submitted_solution_time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An accepted share.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub time: Option<u64>,
    pub difficulty: Option<f64>,
    pub worker: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of a `minerShareUpdate` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareUpdate {
    /// Source address, `base` or `base.worker`.
    pub address: String,
    pub new_share: Share,
}
