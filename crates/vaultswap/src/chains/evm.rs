use super::{BroadcastError, ChainClient, MinedReceipt};
use crate::network::Network;
use crate::retry::{try_endpoints_with_backoff, BackoffConfig};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    network::{ReceiptResponse as _, TransactionBuilder as _},
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
    sol,
    sol_types::SolCall as _,
    transports::RpcError,
};
use eyre::{Context as _, ContextCompat as _};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type EvmProvider = RootProvider;

pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    // Conservative fee policy:
    // - priority: max(1.5 gwei, gas_price / 10)
    // - max_fee: base_fee * 2 + priority
    let min_priority: u128 = 1_500_000_000; // 1.5 gwei
    let priority = std::cmp::max(min_priority, gas_price / 10);

    let mut max_fee = base_fee.saturating_mul(2).saturating_add(priority);
    let min_fee = base_fee.saturating_add(priority);
    if max_fee < min_fee {
        max_fee = min_fee;
    }
    (max_fee, priority)
}

/// Prefer EIP-1559 fees when the chain reports a base fee, legacy gas price otherwise.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
    from: Address,
    chain_id: u64,
) -> TransactionRequest {
    // Explicit fee fields from the caller win.
    if tx.max_fee_per_gas.is_some()
        || tx.max_priority_fee_per_gas.is_some()
        || tx.gas_price.is_some()
    {
        return tx;
    }

    if tx.chain_id.is_none() {
        tx.chain_id = Some(chain_id);
    }
    if tx.from.is_none() {
        tx.from = Some(from);
    }

    if let Some(base_fee) = base_fee {
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        tx.max_fee_per_gas = Some(max_fee);
        tx.max_priority_fee_per_gas = Some(priority);
    } else {
        tx.gas_price = Some(gas_price);
    }
    tx
}

fn broadcast_msg_is_ok(msg: &str) -> bool {
    let s = msg.to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

/// Build and sign a consensus transaction from a fully-populated `TransactionRequest`.
fn build_and_sign_tx(
    signer: &PrivateKeySigner,
    tx: &TransactionRequest,
) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.context("nonce not set")?;
    let gas_limit = tx.gas.context("gas limit not set")?;
    let chain_id = tx.chain_id.context("chain id not set")?;

    if let Some(max_fee_per_gas) = tx.max_fee_per_gas {
        let consensus_tx = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let sig = signer
            .sign_hash_sync(&consensus_tx.signature_hash())
            .context("sign eip1559")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Eip1559(signed_tx), tx_hash))
    } else {
        let consensus_tx = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: tx.gas_price.context("gas price not set")?,
            gas_limit,
            to,
            value,
            input,
        };
        let sig = signer
            .sign_hash_sync(&consensus_tx.signature_hash())
            .context("sign legacy")?;
        let signed_tx = consensus_tx.into_signed(sig);
        let tx_hash = *signed_tx.hash();
        Ok((TxEnvelope::Legacy(signed_tx), tx_hash))
    }
}

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) returns (bool);
    }
}

sol! {
    contract IWrappedNative {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
    }
}

sol! {
    #[sol(rpc)]
    contract IUniswapV2Router02 {
        function getAmountsOut(uint256 amountIn, address[] path)
            external view returns (uint256[] memory amounts);
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline)
            external payable returns (uint256[] memory amounts);
        function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline)
            external returns (uint256[] memory amounts);
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline)
            external returns (uint256[] memory amounts);
    }
}

/// Which router entry point a swap goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterLeg {
    /// `swapExactETHForTokens`: native value in, token out.
    NativeIn,
    /// `swapExactTokensForETH`: token in, native out.
    NativeOut,
    /// `swapExactTokensForTokens`.
    TokenToToken,
}

#[derive(Debug, Clone)]
pub struct RouterSwap {
    pub router: Address,
    pub leg: RouterLeg,
    pub amount_in: U256,
    pub amount_out_min: U256,
    pub path: Vec<Address>,
    pub recipient: Address,
    /// Unix timestamp after which the router rejects the swap.
    pub deadline: u64,
}

#[derive(Debug, Clone)]
pub struct EvmChain {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
}

impl EvmChain {
    pub fn for_network(network: &Network) -> Self {
        Self {
            name: network.name.clone(),
            chain_id: network.chain_id,
            rpc_url: network.rpc_url.clone(),
            fallback_rpc_urls: network.fallback_rpc_urls.clone(),
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    pub fn provider(&self) -> eyre::Result<EvmProvider> {
        Self::provider_for_url(self.rpc_url.as_str())
    }

    fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        if !self.rpc_url.trim().is_empty() {
            urls.push(self.rpc_url.trim().to_owned());
        }
        for u in &self.fallback_rpc_urls {
            let t = u.trim();
            if t.is_empty() || urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }

    async fn with_fallback_and_backoff<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        let urls = self.all_rpc_urls();
        let cfg = BackoffConfig::default();
        try_endpoints_with_backoff(
            &urls,
            &cfg,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            context_label,
        )
        .await
    }

    async fn pick_healthy_provider(&self) -> eyre::Result<EvmProvider> {
        let urls = self.all_rpc_urls();
        let cfg = BackoffConfig::default();
        try_endpoints_with_backoff(
            &urls,
            &cfg,
            |u| {
                let u = u.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    p.get_block_number().await.context("get block number")?;
                    Ok(p)
                }
            },
            "select rpc",
        )
        .await
    }

    /// Fill chain id, fees, nonce and gas limit from the network.
    async fn prepare_tx(
        &self,
        from: Address,
        mut tx: TransactionRequest,
    ) -> eyre::Result<TransactionRequest> {
        let provider = self.pick_healthy_provider().await?;

        tx.chain_id = Some(self.chain_id);
        if tx.from.is_none() {
            tx.from = Some(from);
        }

        if tx.gas_price.is_none() && tx.max_fee_per_gas.is_none() {
            let base_fee = provider
                .get_block_by_number(BlockNumberOrTag::Pending)
                .await
                .ok()
                .flatten()
                .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
            let gp = provider.get_gas_price().await.context("get gas price")?;
            tx = apply_fee_policy(tx, base_fee, gp, from, self.chain_id);
        }

        if tx.nonce.is_none() {
            let n = provider
                .get_transaction_count(from)
                .pending()
                .await
                .context("get nonce")?;
            tx.nonce = Some(n);
        }

        if tx.gas.is_none() {
            let gas = provider
                .estimate_gas(tx.clone())
                .await
                .context("estimate gas")?;
            // Small buffer for flaky estimators.
            tx.gas = Some(gas.saturating_mul(120) / 100);
        }
        Ok(tx)
    }

    /// Send the same signed bytes to every endpoint until one acknowledges them.
    async fn broadcast_raw(&self, tx_hash: B256, raw: &[u8]) -> Result<B256, BroadcastError> {
        let mut rejected = Vec::new();
        let mut unreachable = Vec::new();
        for url in self.all_rpc_urls() {
            let p = match Self::provider_for_url(&url) {
                Ok(p) => p,
                Err(e) => {
                    rejected.push(format!("{url}: {e:#}"));
                    continue;
                }
            };
            match p.send_raw_transaction(raw).await {
                Ok(_pending) => return Ok(tx_hash),
                Err(RpcError::ErrorResp(payload)) => {
                    if broadcast_msg_is_ok(&payload.message) {
                        return Ok(tx_hash);
                    }
                    debug!(network = %self.name, %url, error = %payload.message, "node rejected transaction");
                    rejected.push(format!("{url}: {}", payload.message));
                }
                Err(e) => {
                    warn!(network = %self.name, %url, error = %e, "broadcast not acknowledged");
                    unreachable.push(format!("{url}: {e}"));
                }
            }
        }

        if unreachable.is_empty() {
            Err(BroadcastError::Rejected(rejected.join("; ")))
        } else {
            unreachable.extend(rejected);
            Err(BroadcastError::Ambiguous {
                tx_hash,
                reason: unreachable.join("; "),
            })
        }
    }

    pub fn build_erc20_approve(
        from: Address,
        token: Address,
        spender: Address,
        value: U256,
    ) -> TransactionRequest {
        let calldata = IERC20::approveCall { spender, value }.abi_encode();
        TransactionRequest::default()
            .with_from(from)
            .with_to(token)
            .with_input(Bytes::from(calldata))
    }

    /// `deposit()` on the wrapped-native contract, minting `value` wrapped units 1:1.
    pub fn build_wrap(from: Address, wrapped: Address, value: U256) -> TransactionRequest {
        let calldata = IWrappedNative::depositCall {}.abi_encode();
        TransactionRequest::default()
            .with_from(from)
            .with_to(wrapped)
            .with_value(value)
            .with_input(Bytes::from(calldata))
    }

    /// `withdraw(wad)` on the wrapped-native contract, burning wrapped units for native 1:1.
    pub fn build_unwrap(from: Address, wrapped: Address, wad: U256) -> TransactionRequest {
        let calldata = IWrappedNative::withdrawCall { wad }.abi_encode();
        TransactionRequest::default()
            .with_from(from)
            .with_to(wrapped)
            .with_input(Bytes::from(calldata))
    }

    pub fn build_router_swap(from: Address, swap: &RouterSwap) -> TransactionRequest {
        let deadline = U256::from(swap.deadline);
        let path = swap.path.clone();
        let (calldata, value) = match swap.leg {
            RouterLeg::NativeIn => (
                IUniswapV2Router02::swapExactETHForTokensCall {
                    amountOutMin: swap.amount_out_min,
                    path,
                    to: swap.recipient,
                    deadline,
                }
                .abi_encode(),
                swap.amount_in,
            ),
            RouterLeg::NativeOut => (
                IUniswapV2Router02::swapExactTokensForETHCall {
                    amountIn: swap.amount_in,
                    amountOutMin: swap.amount_out_min,
                    path,
                    to: swap.recipient,
                    deadline,
                }
                .abi_encode(),
                U256::ZERO,
            ),
            RouterLeg::TokenToToken => (
                IUniswapV2Router02::swapExactTokensForTokensCall {
                    amountIn: swap.amount_in,
                    amountOutMin: swap.amount_out_min,
                    path,
                    to: swap.recipient,
                    deadline,
                }
                .abi_encode(),
                U256::ZERO,
            ),
        };
        TransactionRequest::default()
            .with_from(from)
            .with_to(swap.router)
            .with_value(value)
            .with_input(Bytes::from(calldata))
    }
}

impl ChainClient for EvmChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn native_balance(&self, owner: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("get balance", |p| async move {
            let v = p.get_balance(owner).await.context("get balance")?;
            Ok(v)
        })
        .await
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("erc20 balance", |p| async move {
            let c = IERC20::new(token, &p);
            let bal = c.balanceOf(owner).call().await.context("erc20 balanceOf")?;
            Ok(bal)
        })
        .await
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> eyre::Result<U256> {
        self.with_fallback_and_backoff("erc20 allowance", |p| async move {
            let c = IERC20::new(token, &p);
            let v = c
                .allowance(owner, spender)
                .call()
                .await
                .context("erc20 allowance")?;
            Ok(v)
        })
        .await
    }

    // Primary endpoint only: a revert here is deterministic, so fallbacks would only repeat it.
    async fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> eyre::Result<Vec<U256>> {
        let p = self.provider()?;
        let r = IUniswapV2Router02::new(router, &p);
        let amounts = r
            .getAmountsOut(amount_in, path)
            .call()
            .await
            .context("router getAmountsOut")?;
        Ok(amounts)
    }

    async fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        tx: TransactionRequest,
    ) -> Result<B256, BroadcastError> {
        let tx = self
            .prepare_tx(signer.address(), tx)
            .await
            .map_err(|e| BroadcastError::Rejected(format!("{e:#}")))?;
        let (envelope, tx_hash) =
            build_and_sign_tx(signer, &tx).map_err(|e| BroadcastError::Rejected(format!("{e:#}")))?;
        let raw = alloy::eips::eip2718::Encodable2718::encoded_2718(&envelope);
        self.broadcast_raw(tx_hash, &raw).await
    }

    async fn receipt(&self, tx_hash: B256) -> eyre::Result<Option<MinedReceipt>> {
        self.with_fallback_and_backoff("get tx receipt", |p| async move {
            let r = p
                .get_transaction_receipt(tx_hash)
                .await
                .context("get transaction receipt")?;
            Ok(r.map(|r| MinedReceipt {
                success: r.status(),
                block_number: r.block_number(),
                gas_used: r.gas_used(),
            }))
        })
        .await
    }
}

/// Extract the `to` address from a `TransactionRequest`.
pub fn extract_tx_to_address(tx: &TransactionRequest) -> eyre::Result<Address> {
    match tx.to {
        Some(TxKind::Call(a)) => Ok(a),
        Some(TxKind::Create) | None => eyre::bail!("tx missing `to` address"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{primitives::address, sol_types::SolCall as _};
    use eyre::ContextCompat as _;

    const ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
    const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

    fn calldata(tx: &TransactionRequest) -> eyre::Result<&Bytes> {
        tx.input.input().context("missing calldata")
    }

    #[test]
    fn eip1559_fee_policy_is_conservative_and_monotonic() {
        let base_fee: u128 = 10_000_000_000; // 10 gwei
        let gas_price: u128 = 20_000_000_000; // 20 gwei
        let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
        assert_eq!(priority, 2_000_000_000_u128, "priority mismatch");
        assert_eq!(max_fee, 22_000_000_000_u128, "max_fee mismatch");
    }

    #[test]
    fn eip1559_priority_has_min_floor() {
        let (_max_fee, priority) = compute_eip1559_fees(1_000_000_000, 5_000_000_000);
        assert_eq!(priority, 1_500_000_000_u128, "priority should use floor");
    }

    #[test]
    fn apply_fee_policy_sets_legacy_gas_price_when_base_fee_missing() {
        let tx = TransactionRequest::default().with_to(Address::ZERO);
        let out = apply_fee_policy(tx, None, 7, Address::ZERO, 137);
        assert_eq!(out.gas_price, Some(7_u128), "should set legacy gas_price");
        assert_eq!(out.chain_id, Some(137));
        assert!(out.max_fee_per_gas.is_none(), "should not set eip1559 fields");
    }

    #[test]
    fn already_known_broadcast_counts_as_accepted() {
        assert!(broadcast_msg_is_ok("ALREADY KNOWN"));
        assert!(broadcast_msg_is_ok("known transaction: 0xabc"));
        assert!(!broadcast_msg_is_ok("nonce too low"));
    }

    #[test]
    fn native_in_swap_carries_value_and_bound() -> eyre::Result<()> {
        let me = Address::repeat_byte(7);
        let tx = EvmChain::build_router_swap(
            me,
            &RouterSwap {
                router: ROUTER,
                leg: RouterLeg::NativeIn,
                amount_in: U256::from(10_u64),
                amount_out_min: U256::from(95_u64),
                path: vec![WETH, USDC],
                recipient: me,
                deadline: 1_700_000_600,
            },
        );
        assert_eq!(extract_tx_to_address(&tx)?, ROUTER);
        assert_eq!(tx.value, Some(U256::from(10_u64)));
        let call = IUniswapV2Router02::swapExactETHForTokensCall::abi_decode(calldata(&tx)?)?;
        assert_eq!(call.amountOutMin, U256::from(95_u64));
        assert_eq!(call.path, vec![WETH, USDC]);
        assert_eq!(call.to, me);
        assert_eq!(call.deadline, U256::from(1_700_000_600_u64));
        Ok(())
    }

    #[test]
    fn token_legs_send_no_value() -> eyre::Result<()> {
        let me = Address::repeat_byte(7);
        for leg in [RouterLeg::NativeOut, RouterLeg::TokenToToken] {
            let tx = EvmChain::build_router_swap(
                me,
                &RouterSwap {
                    router: ROUTER,
                    leg,
                    amount_in: U256::from(5_u64),
                    amount_out_min: U256::from(4_u64),
                    path: vec![USDC, WETH],
                    recipient: me,
                    deadline: 1,
                },
            );
            assert_eq!(tx.value, Some(U256::ZERO), "{leg:?}");
        }
        let tx = EvmChain::build_router_swap(
            me,
            &RouterSwap {
                router: ROUTER,
                leg: RouterLeg::NativeOut,
                amount_in: U256::from(5_u64),
                amount_out_min: U256::from(4_u64),
                path: vec![USDC, WETH],
                recipient: me,
                deadline: 1,
            },
        );
        let call = IUniswapV2Router02::swapExactTokensForETHCall::abi_decode(calldata(&tx)?)?;
        assert_eq!(call.amountIn, U256::from(5_u64));
        Ok(())
    }

    #[test]
    fn wrap_and_unwrap_target_the_wrapped_contract() -> eyre::Result<()> {
        let me = Address::repeat_byte(7);
        let wrap = EvmChain::build_wrap(me, WETH, U256::from(3_u64));
        assert_eq!(extract_tx_to_address(&wrap)?, WETH);
        assert_eq!(wrap.value, Some(U256::from(3_u64)));
        assert_eq!(
            calldata(&wrap)?.to_vec(),
            IWrappedNative::depositCall::SELECTOR.to_vec()
        );

        let unwrap = EvmChain::build_unwrap(me, WETH, U256::from(3_u64));
        let call = IWrappedNative::withdrawCall::abi_decode(calldata(&unwrap)?)?;
        assert_eq!(call.wad, U256::from(3_u64));
        Ok(())
    }

    #[test]
    fn approve_is_addressed_to_the_token() -> eyre::Result<()> {
        let tx = EvmChain::build_erc20_approve(Address::ZERO, USDC, ROUTER, U256::MAX);
        assert_eq!(extract_tx_to_address(&tx)?, USDC);
        let call = IERC20::approveCall::abi_decode(calldata(&tx)?)?;
        assert_eq!(call.spender, ROUTER);
        assert_eq!(call.value, U256::MAX);
        Ok(())
    }

    #[test]
    fn rpc_urls_are_deduplicated_in_order() {
        let c = EvmChain {
            name: "ethereum".into(),
            chain_id: 1,
            rpc_url: " https://a ".into(),
            fallback_rpc_urls: vec!["https://b".into(), "https://a".into(), String::new()],
        };
        assert_eq!(c.all_rpc_urls(), vec!["https://a".to_owned(), "https://b".to_owned()]);
    }
}
