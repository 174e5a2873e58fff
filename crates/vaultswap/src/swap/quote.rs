use crate::{
    aggregator::{AggregatorApi, AssembleRequest, AssembledTransaction, QuoteRequest},
    chains::ChainClient,
    errors::SwapError,
};
use alloy::primitives::{Address, U256};
use serde::Serialize;

const BPS_DENOMINATOR: u32 = 10_000;

/// Maximum accepted shortfall between quoted and received output, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Slippage {
    bps: u32,
}

impl Slippage {
    pub fn from_bps(bps: u32) -> eyre::Result<Self> {
        if bps >= BPS_DENOMINATOR {
            eyre::bail!("slippage must be below 10000 bps, got {bps}");
        }
        Ok(Self { bps })
    }

    pub const fn bps(self) -> u32 {
        self.bps
    }

    /// `floor(quoted * (1 - bps / 10000))`, computed without intermediate overflow.
    pub fn minimum_output(self, quoted: U256) -> U256 {
        let d = U256::from(BPS_DENOMINATOR);
        let keep = U256::from(BPS_DENOMINATOR - self.bps);
        (quoted / d) * keep + (quoted % d) * keep / d
    }
}

/// Opaque aggregator plan id. Consumed by [`assemble_plan`]; never reused.
#[derive(Debug)]
pub struct ExecutionPlan {
    path_id: String,
    user: Address,
}

impl ExecutionPlan {
    pub fn path_id(&self) -> &str {
        &self.path_id
    }
}

/// Router `getAmountsOut` over a single hop. The second amount is the expected output.
pub async fn quote_via_router<C: ChainClient>(
    chain: &C,
    router: Address,
    amount_in: U256,
    path: [Address; 2],
) -> Result<U256, SwapError> {
    let amounts = chain
        .amounts_out(router, amount_in, path.to_vec())
        .await
        .map_err(|e| SwapError::QuoteUnavailable(format!("{e:#}")))?;
    let out = amounts
        .get(1)
        .copied()
        .ok_or_else(|| SwapError::QuoteUnavailable("router returned no output amount".into()))?;
    if out.is_zero() {
        return Err(SwapError::QuoteUnavailable(
            "router quoted zero output".into(),
        ));
    }
    Ok(out)
}

/// Ask the aggregator for a route. A response without a plan id is a failed quote.
pub async fn quote_via_aggregator<A: AggregatorApi>(
    api: &A,
    chain_id: u64,
    input: Address,
    output: Address,
    amount_in: U256,
    user: Address,
    slippage: Slippage,
) -> Result<(U256, ExecutionPlan), SwapError> {
    let req = QuoteRequest::single(chain_id, input, amount_in, output, user, slippage.bps());
    let resp = api
        .quote(&req)
        .await
        .map_err(|e| SwapError::QuoteUnavailable(format!("{e:#}")))?;

    let path_id = resp
        .path_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| SwapError::QuoteUnavailable("aggregator returned no pathId".into()))?;
    let out = resp
        .out_amounts
        .first()
        .ok_or_else(|| SwapError::QuoteUnavailable("aggregator returned no outAmounts".into()))?;
    let out = out
        .trim()
        .parse::<U256>()
        .map_err(|e| SwapError::QuoteUnavailable(format!("invalid outAmount {out}: {e}")))?;
    Ok((out, ExecutionPlan { path_id, user }))
}

/// Exchange a plan id for a ready-to-sign payload.
pub async fn assemble_plan<A: AggregatorApi>(
    api: &A,
    plan: ExecutionPlan,
) -> Result<AssembledTransaction, SwapError> {
    let req = AssembleRequest {
        user_addr: plan.user,
        path_id: plan.path_id,
    };
    let resp = api
        .assemble(&req)
        .await
        .map_err(|e| SwapError::AssemblyUnavailable(format!("{e:#}")))?;
    resp.transaction
        .ok_or_else(|| SwapError::AssemblyUnavailable("aggregator returned no transaction".into()))
}

/// Reject assembled payloads that do not match what was quoted.
pub fn validate_assembled(
    tx: &AssembledTransaction,
    native_in: bool,
    amount_in: U256,
    expected_router: Option<Address>,
) -> Result<(), SwapError> {
    if tx.data.is_empty() {
        return Err(SwapError::AssemblyUnavailable(
            "assembled transaction has empty calldata".into(),
        ));
    }
    if let Some(router) = expected_router {
        if tx.to != router {
            return Err(SwapError::AssemblyUnavailable(format!(
                "unexpected aggregator router {:#x}",
                tx.to
            )));
        }
    }
    let expected_value = if native_in { amount_in } else { U256::ZERO };
    if tx.value != expected_value {
        return Err(SwapError::AssemblyUnavailable(format!(
            "assembled value {} does not match expected {expected_value}",
            tx.value
        )));
    }
    Ok(())
}
