use super::waiter::{Confirmation, TxWaiter};
use crate::{
    chains::{evm::EvmChain, BroadcastError, ChainClient},
    errors::SwapError,
};
use alloy::{
    primitives::{Address, B256, U256},
    signers::local::PrivateKeySigner,
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceOutcome {
    /// The existing allowance covers the amount; nothing was sent.
    Sufficient { current: U256 },
    /// An unlimited approval was mined.
    Approved { tx_hash: B256 },
}

impl AllowanceOutcome {
    pub const fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Sufficient { .. } => None,
            Self::Approved { tx_hash } => Some(*tx_hash),
        }
    }
}

/// Make sure `spender` may move `required` units of `token` from the signer.
///
/// Approvals are for `U256::MAX` so later swaps of the same pair skip this step. Two concurrent
/// calls for the same signer and spender can both approve; the second one is wasted gas only.
pub async fn ensure_allowance<C: ChainClient>(
    chain: &C,
    waiter: &TxWaiter,
    signer: &PrivateKeySigner,
    token: Address,
    spender: Address,
    required: U256,
) -> Result<AllowanceOutcome, SwapError> {
    let owner = signer.address();
    let current = chain
        .erc20_allowance(token, owner, spender)
        .await
        .map_err(|e| SwapError::rpc("read allowance", &e))?;
    if current >= required {
        debug!(token = %token, spender = %spender, current = %current, "allowance already sufficient");
        return Ok(AllowanceOutcome::Sufficient { current });
    }

    info!(token = %token, spender = %spender, "approving spender");
    let tx = EvmChain::build_erc20_approve(owner, token, spender, U256::MAX);
    let tx_hash = chain
        .send_transaction(signer, tx)
        .await
        .map_err(|e| match e {
            BroadcastError::Rejected(reason) => SwapError::ApprovalFailed {
                tx_hash: None,
                reason,
            },
            BroadcastError::Ambiguous { tx_hash, reason } => SwapError::ApprovalFailed {
                tx_hash: Some(tx_hash),
                reason: format!("broadcast not acknowledged: {reason}"),
            },
        })?;

    match waiter.wait(chain, tx_hash).await {
        Confirmation::Success(_) => Ok(AllowanceOutcome::Approved { tx_hash }),
        Confirmation::Reverted(_) => Err(SwapError::ApprovalFailed {
            tx_hash: Some(tx_hash),
            reason: "approval reverted".into(),
        }),
        Confirmation::Unconfirmed { reason } => Err(SwapError::ApprovalFailed {
            tx_hash: Some(tx_hash),
            reason: format!("approval not confirmed: {reason}"),
        }),
    }
}
