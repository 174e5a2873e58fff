use crate::{
    config::VaultswapConfig,
    errors::SwapError,
    swap::quote::Slippage,
};
use alloy::primitives::{address, Address};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenKind {
    /// The network's gas asset. Has no contract and cannot be passed where an ERC-20 is expected.
    Native,
    Contract { address: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenDescriptor {
    pub symbol: String,
    #[serde(flatten)]
    pub kind: TokenKind,
    pub decimals: u8,
}

impl TokenDescriptor {
    pub const fn is_native(&self) -> bool {
        matches!(self.kind, TokenKind::Native)
    }

    pub const fn contract_address(&self) -> Option<Address> {
        match self.kind {
            TokenKind::Native => None,
            TokenKind::Contract { address } => Some(address),
        }
    }
}

/// How prices are discovered and swaps routed on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuoteStrategy {
    /// A Uniswap-V2-style router quoted through `getAmountsOut`.
    Router {
        address: Address,
        /// Whether the router exposes `swapExactETHForTokens` / `swapExactTokensForETH`. When it
        /// does not, native legs are wrapped before and unwrapped after the swap.
        native_entrypoints: bool,
    },
    /// An off-chain aggregator (Odos): quote, then assemble a ready-to-sign transaction.
    Aggregator {
        /// Address the aggregator uses to denote the native asset.
        native_sentinel: Address,
        /// If set, assembled transactions must target this contract.
        expected_router: Option<Address>,
    },
}

/// Per-network token table. Lookup is by exact (case-sensitive) symbol.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRegistry {
    network: String,
    native_symbol: String,
    wrapped_symbol: String,
    tokens: BTreeMap<String, TokenDescriptor>,
}

impl TokenRegistry {
    pub fn resolve(&self, symbol: &str) -> Result<&TokenDescriptor, SwapError> {
        self.tokens
            .get(symbol)
            .ok_or_else(|| SwapError::UnknownToken {
                network: self.network.clone(),
                symbol: symbol.to_owned(),
            })
    }

    pub fn native(&self) -> Result<&TokenDescriptor, SwapError> {
        self.resolve(&self.native_symbol)
    }

    pub fn wrapped(&self) -> Result<&TokenDescriptor, SwapError> {
        self.resolve(&self.wrapped_symbol)
    }

    /// Contract address of the wrapped native asset.
    pub fn wrapped_address(&self) -> Result<Address, SwapError> {
        self.wrapped()?.contract_address().ok_or_else(|| {
            SwapError::InvalidRequest(format!("{} has no wrapped native contract", self.network))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenDescriptor> {
        self.tokens.values()
    }
}

/// Immutable description of one chain. Built once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub strategy: QuoteStrategy,
    pub slippage: Slippage,
    pub tokens: TokenRegistry,
}

struct TokenDef {
    symbol: &'static str,
    address: Option<Address>,
    decimals: u8,
}

struct NetworkDef {
    name: &'static str,
    chain_id: u64,
    rpc_url: &'static str,
    fallbacks: &'static [&'static str],
    native_symbol: &'static str,
    wrapped_symbol: &'static str,
    strategy: QuoteStrategy,
    slippage_bps: Option<u32>,
    tokens: &'static [TokenDef],
}

const fn native(symbol: &'static str) -> TokenDef {
    TokenDef {
        symbol,
        address: None,
        decimals: 18,
    }
}

const fn erc20(symbol: &'static str, address: Address, decimals: u8) -> TokenDef {
    TokenDef {
        symbol,
        address: Some(address),
        decimals,
    }
}

const NETWORKS: &[NetworkDef] = &[
    NetworkDef {
        name: "ethereum",
        chain_id: 1,
        rpc_url: "https://eth.llamarpc.com",
        fallbacks: &[
            "https://ethereum-rpc.publicnode.com",
            "https://cloudflare-eth.com",
        ],
        native_symbol: "ETH",
        wrapped_symbol: "WETH",
        // Uniswap V2 router.
        strategy: QuoteStrategy::Router {
            address: address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
            native_entrypoints: true,
        },
        slippage_bps: None,
        tokens: &[
            native("ETH"),
            erc20("WETH", address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), 18),
            erc20("USDT", address!("dAC17F958D2ee523a2206206994597C13D831ec7"), 6),
            erc20("USDC", address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), 6),
        ],
    },
    NetworkDef {
        name: "base",
        chain_id: 8453,
        rpc_url: "https://base.llamarpc.com",
        fallbacks: &["https://mainnet.base.org", "https://base-rpc.publicnode.com"],
        native_symbol: "ETH",
        wrapped_symbol: "WETH",
        // Uniswap V2 router (Base deployment).
        strategy: QuoteStrategy::Router {
            address: address!("4752ba5dbc23f44d87826276bf6fd6b1c372ad24"),
            native_entrypoints: true,
        },
        slippage_bps: None,
        tokens: &[
            native("ETH"),
            erc20("WETH", address!("4200000000000000000000000000000000000006"), 18),
            erc20("USDC", address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"), 6),
            erc20("USDT", address!("fde4C96c8593536E31F229EA8f37b2ADa2699bb2"), 6),
        ],
    },
    NetworkDef {
        name: "polygon",
        chain_id: 137,
        rpc_url: "https://polygon.llamarpc.com",
        fallbacks: &[
            "https://polygon-rpc.com",
            "https://polygon-bor-rpc.publicnode.com",
        ],
        native_symbol: "POL",
        wrapped_symbol: "WPOL",
        // QuickSwap V2 router: token-to-token entry point only.
        strategy: QuoteStrategy::Router {
            address: address!("edf6066a2b290C185783862C7F4776A2C8077AD1"),
            native_entrypoints: false,
        },
        slippage_bps: None,
        tokens: &[
            native("POL"),
            erc20("WPOL", address!("0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"), 18),
            erc20("USDT", address!("c2132D05D31c914a87C6611C10748AEb04B58e8F"), 6),
            erc20("USDC", address!("3c499c542cEF5E3811e1192ce70d8cC03d5c3359"), 6),
        ],
    },
    NetworkDef {
        name: "sonic",
        chain_id: 146,
        rpc_url: "https://rpc.soniclabs.com",
        fallbacks: &[],
        native_symbol: "SONIC",
        wrapped_symbol: "WS",
        strategy: QuoteStrategy::Aggregator {
            native_sentinel: Address::ZERO,
            expected_router: None,
        },
        slippage_bps: Some(100),
        tokens: &[
            native("SONIC"),
            erc20("WS", address!("039e2fB66102314Ce7b64Ce5Ce3E5183bc94aD38"), 18),
            erc20("USDT", address!("6047828dc181963ba44974801ff68e538da5eaf9"), 6),
            erc20("USDC", address!("29219dd400f2bf60e5a23d13be72b486d4038894"), 6),
        ],
    },
];

/// Names of every compiled-in network, in table order.
pub const NETWORK_NAMES: [&str; 4] = ["ethereum", "base", "polygon", "sonic"];

fn build_tokens(def: &NetworkDef) -> eyre::Result<TokenRegistry> {
    let mut tokens = BTreeMap::new();
    for t in def.tokens {
        if t.decimals > 18 {
            eyre::bail!("{}: {} declares {} decimals", def.name, t.symbol, t.decimals);
        }
        let kind = t
            .address
            .map_or(TokenKind::Native, |address| TokenKind::Contract { address });
        let prev = tokens.insert(
            t.symbol.to_owned(),
            TokenDescriptor {
                symbol: t.symbol.to_owned(),
                kind,
                decimals: t.decimals,
            },
        );
        if prev.is_some() {
            eyre::bail!("{}: duplicate token {}", def.name, t.symbol);
        }
    }

    let registry = TokenRegistry {
        network: def.name.to_owned(),
        native_symbol: def.native_symbol.to_owned(),
        wrapped_symbol: def.wrapped_symbol.to_owned(),
        tokens,
    };
    if !registry.native()?.is_native() {
        eyre::bail!("{}: {} must be the native entry", def.name, def.native_symbol);
    }
    if registry.wrapped()?.is_native() {
        eyre::bail!("{}: {} must be a contract token", def.name, def.wrapped_symbol);
    }
    if registry.iter().filter(|t| t.is_native()).count() != 1 {
        eyre::bail!("{}: exactly one native entry expected", def.name);
    }
    Ok(registry)
}

/// Every configured network, immutable after construction and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: BTreeMap<String, Network>,
}

impl NetworkRegistry {
    pub fn from_config(cfg: &VaultswapConfig) -> eyre::Result<Self> {
        let default_slippage = Slippage::from_bps(cfg.engine.default_slippage_bps)?;
        let mut networks = BTreeMap::new();
        for def in NETWORKS {
            let ov = cfg.network_override(def.name);
            let slippage = match ov.and_then(|o| o.slippage_bps).or(def.slippage_bps) {
                Some(bps) => Slippage::from_bps(bps)?,
                None => default_slippage,
            };
            let rpc_url = ov
                .and_then(|o| o.rpc_url.clone())
                .unwrap_or_else(|| def.rpc_url.to_owned());
            let fallback_rpc_urls = ov
                .and_then(|o| o.fallback_rpc_urls.clone())
                .unwrap_or_else(|| def.fallbacks.iter().map(|&s| s.to_owned()).collect());

            networks.insert(
                def.name.to_owned(),
                Network {
                    name: def.name.to_owned(),
                    chain_id: def.chain_id,
                    rpc_url,
                    fallback_rpc_urls,
                    strategy: def.strategy,
                    slippage,
                    tokens: build_tokens(def)?,
                },
            );
        }
        for name in cfg.networks.keys() {
            if !networks.contains_key(name) {
                eyre::bail!("config.toml overrides unknown network {name}");
            }
        }
        Ok(Self { networks })
    }

    pub fn get(&self, name: &str) -> Result<&Network, SwapError> {
        self.networks
            .get(name)
            .ok_or_else(|| SwapError::UnknownNetwork(name.to_owned()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> eyre::Result<NetworkRegistry> {
        NetworkRegistry::from_config(&VaultswapConfig::default())
    }

    #[test]
    fn every_network_has_native_and_wrapped_entries() -> eyre::Result<()> {
        let reg = registry()?;
        let names: Vec<&str> = reg.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names.len(), NETWORK_NAMES.len());
        for n in reg.iter() {
            assert!(n.tokens.native()?.contract_address().is_none());
            assert!(n.tokens.wrapped_address().is_ok(), "{} wrapped", n.name);
        }
        Ok(())
    }

    #[test]
    fn lookup_is_case_sensitive_and_rejects_unknown() -> eyre::Result<()> {
        let reg = registry()?;
        let eth = reg.get("ethereum")?;
        assert_eq!(eth.tokens.resolve("USDC")?.decimals, 6);
        assert!(matches!(
            eth.tokens.resolve("usdc"),
            Err(SwapError::UnknownToken { .. })
        ));
        assert!(matches!(
            reg.get("solana"),
            Err(SwapError::UnknownNetwork(_))
        ));
        Ok(())
    }

    #[test]
    fn slippage_defaults_and_overrides() -> eyre::Result<()> {
        let reg = registry()?;
        assert_eq!(reg.get("ethereum")?.slippage.bps(), 500);
        assert_eq!(reg.get("sonic")?.slippage.bps(), 100);

        let mut cfg = VaultswapConfig::default();
        cfg.network_override_mut("ethereum").slippage_bps = Some(50);
        cfg.network_override_mut("polygon").rpc_url = Some("http://127.0.0.1:8545".into());
        let reg = NetworkRegistry::from_config(&cfg)?;
        assert_eq!(reg.get("ethereum")?.slippage.bps(), 50);
        assert_eq!(reg.get("polygon")?.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(reg.get("base")?.slippage.bps(), 500);
        Ok(())
    }

    #[test]
    fn overriding_unknown_network_is_rejected() {
        let mut cfg = VaultswapConfig::default();
        cfg.network_override_mut("atlantis").slippage_bps = Some(10);
        assert!(NetworkRegistry::from_config(&cfg).is_err());
    }

    #[test]
    fn polygon_router_needs_wrapping() -> eyre::Result<()> {
        let reg = registry()?;
        assert!(matches!(
            reg.get("polygon")?.strategy,
            QuoteStrategy::Router {
                native_entrypoints: false,
                ..
            }
        ));
        assert!(matches!(
            reg.get("sonic")?.strategy,
            QuoteStrategy::Aggregator { .. }
        ));
        Ok(())
    }
}
