// ── Resource catalog ──
//
// The fixed table of pool resources. Each resource knows its cache key,
// how to fetch its snapshot, how fresh to keep it, and which stream event
// (if any) folds deltas into it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use poolwatch_api::PoolClient;
use poolwatch_api::stream::events;
use serde_json::Value;

use crate::address::ScopedAddress;
use crate::error::CoreError;
use crate::key::ResourceKey;
use crate::merge::Merge;
use crate::merge::functions::{
    BLOCK_CAP, PAYMENT_CAP, SHARE_CAP, chart_append, overlay, prepend_capped, profile_activity,
    share_prepend,
};
use crate::store::{Fetcher, RefreshPolicy, fetcher};

/// Points kept by the share chart when the snapshot does not say.
pub const CHART_MAX_POINTS: usize = 100;

/// Every resource the dashboard can watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    PoolOverview,
    Miners,
    Miner(String),
    MinerShares(String),
    MinerSharesChart(String),
    MinerPayments(String),
    MinerRewards(String),
    MinerRewardsChart(String),
    PoolPayments,
    PoolBlocks,
    NetworkInfo,
    PoolStats24h,
}

impl Resource {
    /// The miner address this resource is scoped to, if any.
    pub fn raw_address(&self) -> Option<&str> {
        match self {
            Self::Miner(a)
            | Self::MinerShares(a)
            | Self::MinerSharesChart(a)
            | Self::MinerPayments(a)
            | Self::MinerRewards(a)
            | Self::MinerRewardsChart(a) => Some(a),
            Self::PoolOverview
            | Self::Miners
            | Self::PoolPayments
            | Self::PoolBlocks
            | Self::NetworkInfo
            | Self::PoolStats24h => None,
        }
    }

    /// The normalized scope, `None` for pool-wide or blank-address resources.
    pub fn address(&self) -> Option<ScopedAddress> {
        self.raw_address().and_then(ScopedAddress::parse)
    }

    pub fn is_address_scoped(&self) -> bool {
        self.raw_address().is_some()
    }

    /// Same resource kind, another address. Pool-wide resources are
    /// returned unchanged.
    pub fn with_address(&self, address: impl Into<String>) -> Self {
        let address = address.into();
        match self {
            Self::Miner(_) => Self::Miner(address),
            Self::MinerShares(_) => Self::MinerShares(address),
            Self::MinerSharesChart(_) => Self::MinerSharesChart(address),
            Self::MinerPayments(_) => Self::MinerPayments(address),
            Self::MinerRewards(_) => Self::MinerRewards(address),
            Self::MinerRewardsChart(_) => Self::MinerRewardsChart(address),
            other => other.clone(),
        }
    }

    // ── Cache key ────────────────────────────────────────────────────

    pub fn key(&self) -> ResourceKey {
        let address = self.address().map(|a| a.canonical()).unwrap_or_default();
        let miner = ResourceKey::new(["miner", address.as_str()]);
        match self {
            Self::PoolOverview => ResourceKey::from(["pool", "overview"]),
            Self::Miners => ResourceKey::from(["miners"]),
            Self::Miner(_) => miner,
            Self::MinerShares(_) => miner.child("shares"),
            Self::MinerSharesChart(_) => miner.child("shares").child("chart"),
            Self::MinerPayments(_) => miner.child("payments"),
            Self::MinerRewards(_) => miner.child("rewards"),
            Self::MinerRewardsChart(_) => miner.child("rewards").child("chart"),
            Self::PoolPayments => ResourceKey::from(["pool", "payments"]),
            Self::PoolBlocks => ResourceKey::from(["pool", "blocks"]),
            Self::NetworkInfo => ResourceKey::from(["pool", "network"]),
            Self::PoolStats24h => ResourceKey::from(["pool", "stats", "24h"]),
        }
    }

    // ── Refresh policy ───────────────────────────────────────────────

    /// Default freshness for this resource. Address-scoped resources
    /// without an address are registered disabled.
    pub fn policy(&self) -> RefreshPolicy {
        let (stale, poll) = match self {
            Self::PoolOverview | Self::Miner(_) => (10, 30),
            Self::Miners | Self::PoolPayments | Self::PoolBlocks => (30, 60),
            Self::MinerShares(_) => (10, 60),
            Self::MinerSharesChart(_) => (30, 60),
            Self::MinerPayments(_) | Self::MinerRewards(_) => (60, 120),
            Self::MinerRewardsChart(_) | Self::PoolStats24h => (60, 300),
            Self::NetworkInfo => (30, 30),
        };
        let mut policy = RefreshPolicy::default()
            .with_stale_time(Duration::from_secs(stale))
            .with_poll_interval(Duration::from_secs(poll));

        // Share views churn quickly as users hop between workers.
        if matches!(self, Self::MinerShares(_) | Self::MinerSharesChart(_)) {
            policy = policy.with_gc_time(Duration::from_secs(30));
        }
        if self.is_address_scoped() && self.address().is_none() {
            policy = policy.enabled(false);
        }
        policy
    }

    // ── Stream binding ───────────────────────────────────────────────

    /// The event and merge that keep this resource live between fetches.
    pub fn binding(&self) -> Option<(&'static str, Merge)> {
        match self {
            Self::PoolOverview => Some((events::POOL_UPDATE, overlay())),
            Self::PoolBlocks => Some((events::NEW_BLOCK, prepend_capped(BLOCK_CAP))),
            Self::PoolPayments => Some((events::NEW_PAYMENT, prepend_capped(PAYMENT_CAP))),
            Self::Miner(_) => Some((
                events::MINER_SHARE_UPDATE,
                profile_activity(self.address()?),
            )),
            Self::MinerShares(_) => Some((
                events::MINER_SHARE_UPDATE,
                share_prepend(self.address()?, SHARE_CAP),
            )),
            Self::MinerSharesChart(_) => Some((
                events::MINER_SHARE_UPDATE,
                chart_append(self.address()?, CHART_MAX_POINTS),
            )),
            _ => None,
        }
    }

    /// Whether watching this resource needs the server to push the miner's
    /// share events.
    pub fn needs_address_subscription(&self) -> bool {
        matches!(
            self,
            Self::Miner(_) | Self::MinerShares(_) | Self::MinerSharesChart(_)
        )
    }

    // ── Fetch ────────────────────────────────────────────────────────

    /// Fetch this resource's snapshot.
    pub async fn fetch(&self, client: &PoolClient) -> Result<Value, CoreError> {
        let scoped = self.address().map(|a| a.canonical());
        let address = || {
            scoped.as_deref().ok_or_else(|| CoreError::Config {
                message: format!("{self} needs a miner address"),
            })
        };

        let value = match self {
            Self::PoolOverview => client.pool_overview().await?,
            Self::Miners => client.miners().await?,
            Self::Miner(_) => client.miner(address()?).await?,
            Self::MinerShares(_) => client.miner_shares(address()?).await?,
            Self::MinerSharesChart(_) => client.miner_shares_chart(address()?).await?,
            Self::MinerPayments(_) => client.miner_payments(address()?).await?,
            Self::MinerRewards(_) => client.miner_rewards(address()?).await?,
            Self::MinerRewardsChart(_) => client.miner_rewards_chart(address()?).await?,
            Self::PoolPayments => client.pool_payments().await?,
            Self::PoolBlocks => client.pool_blocks().await?,
            Self::NetworkInfo => client.network_info().await?,
            Self::PoolStats24h => client.pool_stats_24h().await?,
        };
        Ok(value)
    }

    /// A cache fetcher bound to `client`.
    pub fn fetcher(&self, client: &Arc<PoolClient>) -> Fetcher {
        let resource = self.clone();
        let client = Arc::clone(client);
        fetcher(move || {
            let resource = resource.clone();
            let client = Arc::clone(&client);
            async move { resource.fetch(&client).await }
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolOverview => f.write_str("pool overview"),
            Self::Miners => f.write_str("miners"),
            Self::Miner(a) => write!(f, "miner {a}"),
            Self::MinerShares(a) => write!(f, "shares of {a}"),
            Self::MinerSharesChart(a) => write!(f, "share chart of {a}"),
            Self::MinerPayments(a) => write!(f, "payments of {a}"),
            Self::MinerRewards(a) => write!(f, "rewards of {a}"),
            Self::MinerRewardsChart(a) => write!(f, "reward chart of {a}"),
            Self::PoolPayments => f.write_str("pool payments"),
            Self::PoolBlocks => f.write_str("pool blocks"),
            Self::NetworkInfo => f.write_str("network info"),
            Self::PoolStats24h => f.write_str("pool stats (24h)"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn worker_forms_share_one_key() {
        let dotted = Resource::MinerShares("kaspa:qr0abc.rig01".into());
        let spaced = Resource::MinerShares(" kaspa:qr0abc.rig01 ".into());
        let slashed = Resource::MinerShares("kaspa:qr0abc/rig01".into());
        assert_eq!(dotted.key(), spaced.key());
        assert_eq!(dotted.key(), slashed.key());
        assert_eq!(
            dotted.key(),
            ResourceKey::from(["miner", "kaspa:qr0abc.rig01", "shares"])
        );
        assert_ne!(
            Resource::MinerSharesChart("kaspa:qr0abc".into()).key(),
            Resource::MinerShares("kaspa:qr0abc".into()).key()
        );
    }

    #[test]
    fn every_pool_resource_has_a_distinct_key() {
        let all = [
            Resource::PoolOverview,
            Resource::Miners,
            Resource::PoolPayments,
            Resource::PoolBlocks,
            Resource::NetworkInfo,
            Resource::PoolStats24h,
        ];
        let keys: std::collections::HashSet<_> = all.iter().map(Resource::key).collect();
        assert_eq!(keys.len(), all.len());
    }

    #[test]
    fn blank_address_disables_resource() {
        let resource = Resource::MinerShares(String::new());
        assert!(!resource.policy().enabled);
        assert!(resource.binding().is_none());
        assert!(Resource::MinerShares("kaspa:q".into()).policy().enabled);
    }

    #[test]
    fn share_resources_collect_quickly() {
        let shares = Resource::MinerShares("kaspa:q".into()).policy();
        assert_eq!(shares.gc_time, Duration::from_secs(30));
        assert_eq!(Resource::PoolOverview.policy().gc_time, Duration::from_secs(300));
        assert_eq!(
            Resource::PoolOverview.policy().poll_interval,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn bindings_follow_catalog() {
        let (event, merge) = Resource::PoolBlocks.binding().unwrap();
        assert_eq!(event, events::NEW_BLOCK);
        let merged = merge
            .apply(&json!([{ "epoch": 99 }]), &json!({ "epoch": 100 }))
            .unwrap();
        assert_eq!(merged, json!([{ "epoch": 100 }, { "epoch": 99 }]));

        assert!(Resource::NetworkInfo.binding().is_none());
        assert!(Resource::MinerPayments("kaspa:q".into()).binding().is_none());
        assert!(Resource::Miner("kaspa:q".into()).needs_address_subscription());
        assert!(!Resource::MinerRewards("kaspa:q".into()).needs_address_subscription());
    }

    #[test]
    fn with_address_keeps_kind() {
        let next = Resource::MinerSharesChart("a".into()).with_address("b");
        assert_eq!(next, Resource::MinerSharesChart("b".into()));
        assert_eq!(Resource::PoolBlocks.with_address("b"), Resource::PoolBlocks);
        assert_eq!(next.to_string(), "share chart of b");
    }
}
