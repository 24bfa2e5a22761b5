// ── Pool-wide domain types ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pool overview, kept current by `poolUpdate` overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOverview {
    pub hashrate: Option<f64>,
    pub miners: Option<u64>,
    pub workers: Option<u64>,
    pub blocks_found: Option<u64>,
    pub fee: Option<f64>,
    pub last_block_time: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A block found by the pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: Option<String>,
    pub epoch: Option<u64>,
    pub height: Option<u64>,
    pub reward: Option<f64>,
    /// Address of the miner credited with the block.
    pub miner: Option<String>,
    pub timestamp: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A payout, either pool-wide or for one miner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub tx_hash: Option<String>,
    pub address: Option<String>,
    pub amount: Option<f64>,
    pub timestamp: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chain parameters reported by the pool's node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub difficulty: Option<f64>,
    pub hashrate: Option<f64>,
    pub block_height: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
