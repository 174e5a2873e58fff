pub mod allowance;
pub mod quote;
pub mod route;
pub mod waiter;

#[cfg(test)]
pub mod testing;

use crate::{
    aggregator::AggregatorApi,
    amount::{format_amount_base_to_ui, parse_amount_ui_to_base},
    chains::{
        evm::{extract_tx_to_address, EvmChain, RouterSwap},
        BroadcastError, ChainClient,
    },
    config::EngineConfig,
    errors::SwapError,
    network::{Network, TokenDescriptor},
};
use alloy::{
    network::TransactionBuilder as _,
    primitives::{address, Address, B256, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use allowance::ensure_allowance;
use quote::{assemble_plan, quote_via_aggregator, quote_via_router, validate_assembled};
use route::{plan_route, AggregatorRoute, Route, RouterRoute};
use serde::Serialize;
use std::fmt;
use tracing::{info, info_span, warn, Instrument as _};
use waiter::{Confirmation, TxWaiter};

/// Stand-in user for quote-only aggregator calls, which never assemble.
const QUOTE_ONLY_USER: Address = address!("0000000000000000000000000000000000000001");

/// One swap, as the caller asked for it.
pub struct SwapRequest {
    pub from: String,
    pub to: String,
    /// Human decimal amount of `from`, e.g. `"1.5"`.
    pub amount: String,
    pub signer: PrivateKeySigner,
}

impl fmt::Debug for SwapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapRequest")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("amount", &self.amount)
            .field("signer", &self.signer.address())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapResult {
    pub success: bool,
    pub network: String,
    pub from: String,
    pub to: String,
    pub input_amount: String,
    /// Quoted output. The on-chain minimum is `minimum_output`.
    pub output_amount: String,
    pub minimum_output: String,
    /// Always the swap transaction, even when an unwrap followed it.
    pub tx_hash: B256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unwrap_tx_hash: Option<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteSummary {
    pub network: String,
    pub from: String,
    pub to: String,
    pub input_amount: String,
    pub output_amount: String,
    pub minimum_output: String,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStage {
    Validating,
    Wrapping,
    Approving,
    Quoting,
    Building,
    Broadcasting,
    Confirming,
    Unwrapping,
    Done,
}

impl SwapStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Wrapping => "wrapping",
            Self::Approving => "approving",
            Self::Quoting => "quoting",
            Self::Building => "building",
            Self::Broadcasting => "broadcasting",
            Self::Confirming => "confirming",
            Self::Unwrapping => "unwrapping",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for SwapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(stage: SwapStage) {
    info!(stage = %stage, "swap stage");
}

/// A request that passed validation: tokens resolved, amount converted, route chosen.
#[derive(Debug)]
struct Validated<'a> {
    from: &'a TokenDescriptor,
    to: &'a TokenDescriptor,
    amount_in: U256,
    route: Route,
}

/// Hashes of the auxiliary transactions a swap produced along the way.
#[derive(Debug, Default)]
struct SideTxs {
    wrap: Option<B256>,
    approval: Option<B256>,
    unwrap: Option<B256>,
}

/// What the swap transaction itself produced.
struct Executed {
    tx_hash: B256,
    expected_out: U256,
    minimum_out: U256,
}

/// Single-network swap engine. Holds no per-request state; share it across tasks freely.
#[derive(Debug)]
pub struct SwapEngine<C, A> {
    network: Network,
    chain: C,
    aggregator: A,
    waiter: TxWaiter,
    deadline_seconds: u64,
}

impl<C: ChainClient, A: AggregatorApi> SwapEngine<C, A> {
    pub fn new(network: Network, chain: C, aggregator: A, cfg: &EngineConfig) -> Self {
        Self {
            network,
            chain,
            aggregator,
            waiter: TxWaiter::from_config(cfg),
            deadline_seconds: cfg.deadline_seconds,
        }
    }

    pub const fn network(&self) -> &Network {
        &self.network
    }

    fn validate(&self, from: &str, to: &str, amount: &str) -> Result<Validated<'_>, SwapError> {
        let tokens = &self.network.tokens;
        let from = tokens.resolve(from)?;
        let to = tokens.resolve(to)?;
        let amount_in = parse_amount_ui_to_base(amount, from.decimals)
            .map_err(|e| SwapError::InvalidRequest(format!("invalid amount {amount:?}: {e:#}")))?;
        if amount_in.is_zero() {
            return Err(SwapError::InvalidRequest("amount must be positive".into()));
        }
        let route = plan_route(&self.network, from, to)?;
        Ok(Validated {
            from,
            to,
            amount_in,
            route,
        })
    }

    fn ui(amount: U256, token: &TokenDescriptor) -> String {
        format_amount_base_to_ui(amount, token.decimals).unwrap_or_else(|_| amount.to_string())
    }

    /// Price a swap without a signer and without writing anything.
    pub async fn quote(&self, from: &str, to: &str, amount: &str) -> Result<QuoteSummary, SwapError> {
        let v = self.validate(from, to, amount)?;
        let expected_out = match v.route {
            Route::Router(r) => quote_via_router(&self.chain, r.router, v.amount_in, r.path).await?,
            Route::Aggregator(a) => {
                let (out, _plan) = quote_via_aggregator(
                    &self.aggregator,
                    self.chain.chain_id(),
                    a.input,
                    a.output,
                    v.amount_in,
                    QUOTE_ONLY_USER,
                    self.network.slippage,
                )
                .await?;
                out
            }
        };
        Ok(QuoteSummary {
            network: self.network.name.clone(),
            from: v.from.symbol.clone(),
            to: v.to.symbol.clone(),
            input_amount: Self::ui(v.amount_in, v.from),
            output_amount: Self::ui(expected_out, v.to),
            minimum_output: Self::ui(self.network.slippage.minimum_output(expected_out), v.to),
            slippage_bps: self.network.slippage.bps(),
        })
    }

    /// Run one swap to completion. Wraps and approvals already mined stay mined when a later
    /// step fails.
    pub async fn swap(&self, req: SwapRequest) -> Result<SwapResult, SwapError> {
        let span = info_span!(
            "swap",
            request_id = %uuid::Uuid::new_v4(),
            network = %self.network.name,
            from = %req.from,
            to = %req.to,
        );
        async {
            let res = self.swap_inner(&req).await;
            match &res {
                Ok(r) => {
                    enter(SwapStage::Done);
                    info!(tx_hash = %r.tx_hash, "swap complete");
                }
                Err(e) => warn!(code = e.code(), error = %e, "swap failed"),
            }
            res
        }
        .instrument(span)
        .await
    }

    async fn swap_inner(&self, req: &SwapRequest) -> Result<SwapResult, SwapError> {
        enter(SwapStage::Validating);
        let v = self.validate(&req.from, &req.to, &req.amount)?;
        let owner = req.signer.address();
        self.check_balance(v.from, owner, v.amount_in).await?;

        let mut side = SideTxs::default();
        let executed = match v.route {
            Route::Router(r) => self.swap_via_router(&req.signer, &v, r, &mut side).await?,
            Route::Aggregator(a) => {
                self.swap_via_aggregator(&req.signer, &v, a, &mut side)
                    .await?
            }
        };

        Ok(SwapResult {
            success: true,
            network: self.network.name.clone(),
            from: v.from.symbol.clone(),
            to: v.to.symbol.clone(),
            input_amount: Self::ui(v.amount_in, v.from),
            output_amount: Self::ui(executed.expected_out, v.to),
            minimum_output: Self::ui(executed.minimum_out, v.to),
            tx_hash: executed.tx_hash,
            wrap_tx_hash: side.wrap,
            approval_tx_hash: side.approval,
            unwrap_tx_hash: side.unwrap,
        })
    }

    async fn check_balance(
        &self,
        token: &TokenDescriptor,
        owner: Address,
        required: U256,
    ) -> Result<(), SwapError> {
        let available = match token.contract_address() {
            None => self.chain.native_balance(owner).await,
            Some(addr) => self.chain.erc20_balance(addr, owner).await,
        }
        .map_err(|e| SwapError::rpc("read balance", &e))?;
        if available < required {
            return Err(SwapError::InsufficientBalance {
                symbol: token.symbol.clone(),
                available: Self::ui(available, token),
                required: Self::ui(required, token),
            });
        }
        Ok(())
    }

    async fn swap_via_router(
        &self,
        signer: &PrivateKeySigner,
        v: &Validated<'_>,
        plan: RouterRoute,
        side: &mut SideTxs,
    ) -> Result<Executed, SwapError> {
        let owner = signer.address();
        let wrapped = self.network.tokens.wrapped_address()?;

        if plan.wrap_input {
            enter(SwapStage::Wrapping);
            side.wrap = Some(self.wrap(signer, wrapped, v.amount_in).await?);
        }

        if let Some(token) = plan.approve_token() {
            enter(SwapStage::Approving);
            let outcome = ensure_allowance(
                &self.chain,
                &self.waiter,
                signer,
                token,
                plan.router,
                v.amount_in,
            )
            .await?;
            side.approval = outcome.tx_hash();
        }

        enter(SwapStage::Quoting);
        let expected_out = quote_via_router(&self.chain, plan.router, v.amount_in, plan.path).await?;
        let minimum_out = self.network.slippage.minimum_output(expected_out);
        info!(expected_out = %expected_out, minimum_out = %minimum_out, "quoted");

        let wrapped_before = if plan.unwrap_output {
            Some(
                self.chain
                    .erc20_balance(wrapped, owner)
                    .await
                    .map_err(|e| SwapError::rpc("read wrapped balance", &e))?,
            )
        } else {
            None
        };

        enter(SwapStage::Building);
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let tx = EvmChain::build_router_swap(
            owner,
            &RouterSwap {
                router: plan.router,
                leg: plan.leg,
                amount_in: v.amount_in,
                amount_out_min: minimum_out,
                path: plan.path.to_vec(),
                recipient: owner,
                deadline: now.saturating_add(self.deadline_seconds),
            },
        );

        let tx_hash = self.submit_swap(signer, tx).await?;

        if let Some(before) = wrapped_before {
            enter(SwapStage::Unwrapping);
            side.unwrap = Some(
                self.unwrap(signer, wrapped, before, minimum_out, tx_hash, v.to)
                    .await?,
            );
        }

        Ok(Executed {
            tx_hash,
            expected_out,
            minimum_out,
        })
    }

    async fn swap_via_aggregator(
        &self,
        signer: &PrivateKeySigner,
        v: &Validated<'_>,
        plan: AggregatorRoute,
        side: &mut SideTxs,
    ) -> Result<Executed, SwapError> {
        let owner = signer.address();

        enter(SwapStage::Quoting);
        let (expected_out, exec_plan) = quote_via_aggregator(
            &self.aggregator,
            self.chain.chain_id(),
            plan.input,
            plan.output,
            v.amount_in,
            owner,
            self.network.slippage,
        )
        .await?;
        let minimum_out = self.network.slippage.minimum_output(expected_out);
        info!(expected_out = %expected_out, path_id = exec_plan.path_id(), "quoted");

        enter(SwapStage::Building);
        let assembled = assemble_plan(&self.aggregator, exec_plan).await?;
        validate_assembled(&assembled, plan.native_in, v.amount_in, plan.expected_router)?;

        // The spender is only known once the plan is assembled.
        if let Some(token) = plan.approve_token() {
            enter(SwapStage::Approving);
            let outcome = ensure_allowance(
                &self.chain,
                &self.waiter,
                signer,
                token,
                assembled.to,
                v.amount_in,
            )
            .await?;
            side.approval = outcome.tx_hash();
        }

        let tx = TransactionRequest::default()
            .with_from(owner)
            .with_to(assembled.to)
            .with_input(assembled.data)
            .with_value(assembled.value);
        let tx_hash = self.submit_swap(signer, tx).await?;

        Ok(Executed {
            tx_hash,
            expected_out,
            minimum_out,
        })
    }

    /// Broadcast the swap and wait for it. Once a hash exists, failures carry it.
    async fn submit_swap(
        &self,
        signer: &PrivateKeySigner,
        tx: TransactionRequest,
    ) -> Result<B256, SwapError> {
        enter(SwapStage::Broadcasting);
        let target = extract_tx_to_address(&tx).map_err(|e| SwapError::NotSubmitted {
            stage: "swap",
            reason: format!("{e:#}"),
        })?;
        let tx_hash = self
            .chain
            .send_transaction(signer, tx)
            .await
            .map_err(|e| match e {
                BroadcastError::Rejected(reason) => SwapError::NotSubmitted {
                    stage: "swap",
                    reason,
                },
                BroadcastError::Ambiguous { tx_hash, reason } => {
                    SwapError::Unconfirmed { tx_hash, reason }
                }
            })?;
        info!(tx_hash = %tx_hash, to = %target, "swap broadcast");

        enter(SwapStage::Confirming);
        match self.waiter.wait(&self.chain, tx_hash).await {
            Confirmation::Success(r) => {
                info!(tx_hash = %tx_hash, block = ?r.block_number, gas_used = r.gas_used, "swap mined");
                Ok(tx_hash)
            }
            Confirmation::Reverted(_) => Err(SwapError::TransactionReverted { tx_hash }),
            Confirmation::Unconfirmed { reason } => Err(SwapError::Unconfirmed { tx_hash, reason }),
        }
    }

    async fn wrap(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        amount: U256,
    ) -> Result<B256, SwapError> {
        let tx = EvmChain::build_wrap(signer.address(), wrapped, amount);
        let tx_hash = self
            .chain
            .send_transaction(signer, tx)
            .await
            .map_err(|e| match e {
                BroadcastError::Rejected(reason) => SwapError::WrapFailed {
                    tx_hash: None,
                    reason,
                },
                BroadcastError::Ambiguous { tx_hash, reason } => SwapError::WrapFailed {
                    tx_hash: Some(tx_hash),
                    reason: format!("broadcast not acknowledged: {reason}"),
                },
            })?;
        match self.waiter.wait(&self.chain, tx_hash).await {
            Confirmation::Success(_) => Ok(tx_hash),
            Confirmation::Reverted(_) => Err(SwapError::WrapFailed {
                tx_hash: Some(tx_hash),
                reason: "deposit reverted".into(),
            }),
            Confirmation::Unconfirmed { reason } => Err(SwapError::WrapFailed {
                tx_hash: Some(tx_hash),
                reason: format!("deposit not confirmed: {reason}"),
            }),
        }
    }

    /// Withdraw what the swap actually delivered, never less than the enforced minimum the router
    /// guarantees. A smaller delta (or an unreadable balance) means the read lagged the swap.
    async fn unwrap(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        before: U256,
        minimum_out: U256,
        swap_tx_hash: B256,
        out_token: &TokenDescriptor,
    ) -> Result<B256, SwapError> {
        let owner = signer.address();
        let received = match self.chain.erc20_balance(wrapped, owner).await {
            Ok(after) => {
                let delta = after.saturating_sub(before);
                if delta < minimum_out {
                    warn!(delta = %delta, minimum_out = %minimum_out, "wrapped balance read is stale; unwrapping the minimum");
                }
                delta.max(minimum_out)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "wrapped balance unreadable; unwrapping the minimum");
                minimum_out
            }
        };
        let failed = |unwrap_tx_hash: Option<B256>, reason: String| SwapError::UnwrapFailed {
            swap_tx_hash,
            unwrap_tx_hash,
            wrapped_amount: Self::ui(received, out_token),
            reason,
        };

        let tx = EvmChain::build_unwrap(owner, wrapped, received);
        let tx_hash = self
            .chain
            .send_transaction(signer, tx)
            .await
            .map_err(|e| match e {
                BroadcastError::Rejected(reason) => failed(None, reason),
                BroadcastError::Ambiguous { tx_hash, reason } => {
                    failed(Some(tx_hash), format!("broadcast not acknowledged: {reason}"))
                }
            })?;
        match self.waiter.wait(&self.chain, tx_hash).await {
            Confirmation::Success(_) => Ok(tx_hash),
            Confirmation::Reverted(_) => Err(failed(Some(tx_hash), "withdraw reverted".into())),
            Confirmation::Unconfirmed { reason } => Err(failed(
                Some(tx_hash),
                format!("withdraw not confirmed: {reason}"),
            )),
        }
    }
}
