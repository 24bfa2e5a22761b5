// ── Chart series ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parallel-array chart: `series[name][i]` is the value at `timestamps[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    #[serde(default)]
    pub timestamps: Vec<u64>,
    #[serde(default)]
    pub series: BTreeMap<String, Vec<Option<f64>>>,
    pub max_points: Option<usize>,
    pub last_update: Option<u64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChartSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Most recent value of `name`, skipping gaps.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.series.get(name)?.iter().rev().find_map(|v| *v)
    }
}
