use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat 5%: the bound every router swap enforces unless a network overrides it.
pub const DEFAULT_SLIPPAGE_BPS: u32 = 500;
pub const DEFAULT_DEADLINE_SECONDS: u64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Slippage tolerance in basis points applied when a network does not set its own.
    pub default_slippage_bps: u32,
    /// Router swaps must be mined within this many seconds of being built.
    pub deadline_seconds: u64,
    /// How long to wait for a broadcast transaction to be mined before reporting it unconfirmed.
    pub confirmation_timeout_seconds: u64,
    /// Receipt polling interval (milliseconds).
    pub receipt_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_slippage_bps: DEFAULT_SLIPPAGE_BPS,
            deadline_seconds: DEFAULT_DEADLINE_SECONDS,
            confirmation_timeout_seconds: 300,
            receipt_poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Odos smart order router API base URL. Used by aggregator-backed networks for quote and
    /// assemble.
    pub odos_base_url: String,
    /// Request timeout enforced by the HTTP client for aggregator calls (seconds).
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            odos_base_url: "https://api.odos.xyz".into(),
            timeout_seconds: 20,
        }
    }
}

/// Per-network overrides layered over the compiled-in network table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_rpc_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_bps: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultswapConfig {
    pub engine: EngineConfig,
    pub http: HttpConfig,
    /// Overrides keyed by network name (`ethereum`, `base`, `polygon`, `sonic`).
    pub networks: BTreeMap<String, NetworkOverride>,
}

impl VaultswapConfig {
    pub fn network_override(&self, name: &str) -> Option<&NetworkOverride> {
        self.networks.get(name)
    }

    pub fn network_override_mut(&mut self, name: &str) -> &mut NetworkOverride {
        self.networks.entry(name.to_owned()).or_default()
    }
}
