//! Clap derive structures for the `poolwatch` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use poolwatch_core::Resource;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// poolwatch -- live mining-pool dashboard in the terminal
#[derive(Debug, Parser)]
#[command(
    name = "poolwatch",
    version,
    about = "Watch mining-pool resources stay live from the command line",
    long_about = "Mounts pool resources the way a dashboard page does: a REST\n\
        snapshot first, then stream deltas merged in as they arrive.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Pool profile to use
    #[arg(long, short = 'p', env = "POOLWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Pool API URL (overrides profile)
    #[arg(long, short = 'u', env = "POOLWATCH_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Stream URL (defaults to the API host on port 4000)
    #[arg(long, env = "POOLWATCH_STREAM_URL", global = true)]
    pub stream_url: Option<String>,

    /// Bearer token for account commands
    #[arg(long, env = "POOLWATCH_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "POOLWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', env = "POOLWATCH_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "POOLWATCH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to this file
    #[arg(long, env = "POOLWATCH_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON, one update per line
    JsonCompact,
    /// YAML
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mount a resource and print it whenever it changes
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Update account settings for the token's owner
    Settings(SettingsArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Resource to watch
    pub resource: ResourceKind,

    /// Miner address, optionally `address.worker` (overrides profile)
    #[arg(long, short = 'a')]
    pub address: Option<String>,

    /// Print the first snapshot and exit
    #[arg(long, conflicts_with_all = ["count", "duration"])]
    pub once: bool,

    /// Exit after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Exit after this long, e.g. "30s" or "5m"
    #[arg(long = "for", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    /// Pool overview (hashrate, miners, ...)
    Overview,
    /// Pool miner list
    Miners,
    /// Miner profile with its workers
    Miner,
    /// Recent shares of a miner or worker
    Shares,
    /// Share chart of a miner or worker
    SharesChart,
    /// Payments to a miner
    Payments,
    /// Rewards of a miner
    Rewards,
    /// Reward chart of a miner
    RewardsChart,
    /// Recent pool payments
    PoolPayments,
    /// Recent blocks found by the pool
    Blocks,
    /// Network info
    Network,
    /// Pool statistics over the last 24h
    Stats,
}

impl ResourceKind {
    pub fn needs_address(self) -> bool {
        matches!(
            self,
            Self::Miner
                | Self::Shares
                | Self::SharesChart
                | Self::Payments
                | Self::Rewards
                | Self::RewardsChart
        )
    }

    /// The catalog resource, `None` when an address is required but missing.
    pub fn to_resource(self, address: Option<&str>) -> Option<Resource> {
        let address = address.map(str::trim).filter(|a| !a.is_empty());
        if self.needs_address() && address.is_none() {
            return None;
        }
        let address = address.unwrap_or_default().to_owned();

        Some(match self {
            Self::Overview => Resource::PoolOverview,
            Self::Miners => Resource::Miners,
            Self::Miner => Resource::Miner(address),
            Self::Shares => Resource::MinerShares(address),
            Self::SharesChart => Resource::MinerSharesChart(address),
            Self::Payments => Resource::MinerPayments(address),
            Self::Rewards => Resource::MinerRewards(address),
            Self::RewardsChart => Resource::MinerRewardsChart(address),
            Self::PoolPayments => Resource::PoolPayments,
            Self::Blocks => Resource::PoolBlocks,
            Self::Network => Resource::NetworkInfo,
            Self::Stats => Resource::PoolStats24h,
        })
    }
}

// ── Settings ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// Setting to change, as `key=value` (repeatable). Values are parsed as
    /// JSON when possible, otherwise sent as strings.
    #[arg(long = "set", value_name = "KEY=VALUE", required_unless_present = "from_file")]
    pub set: Vec<String>,

    /// Read the settings object from a JSON file (`-` for stdin)
    #[arg(long = "from-file", short = 'F', conflicts_with = "set")]
    pub from_file: Option<PathBuf>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile
    Init {
        /// Pool API URL
        #[arg(long)]
        api_url: String,

        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Default miner address for this profile
        #[arg(long)]
        address: Option<String>,

        /// Environment variable holding this profile's token
        #[arg(long)]
        token_env: Option<String>,

        /// Replace an existing profile of the same name
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved configuration (tokens redacted)
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
