pub mod evm;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use std::future::Future;
use thiserror::Error;

/// Outcome of a mined transaction as seen in its receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedReceipt {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

#[derive(Debug, Error, Clone)]
pub enum BroadcastError {
    /// The transaction never left this process, or every node explicitly refused it.
    #[error("rejected before submission: {0}")]
    Rejected(String),

    /// The signed transaction was handed to the network but no node acknowledged it. It may
    /// still be mined.
    #[error("broadcast of {tx_hash:#x} not acknowledged: {reason}")]
    Ambiguous { tx_hash: B256, reason: String },
}

/// The chain capabilities the swap engine needs: contract reads, balance queries, signed
/// broadcast and receipt lookup. Implementations own endpoint selection and retries.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    fn native_balance(&self, owner: Address) -> impl Future<Output = eyre::Result<U256>> + Send;

    fn erc20_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = eyre::Result<U256>> + Send;

    fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = eyre::Result<U256>> + Send;

    /// Router `getAmountsOut(amountIn, path)`. A revert is returned as an error, never retried.
    fn amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> impl Future<Output = eyre::Result<Vec<U256>>> + Send;

    /// Fill in fees/nonce/gas, sign and broadcast. Returns the transaction hash once at least
    /// one node accepted it.
    fn send_transaction(
        &self,
        signer: &PrivateKeySigner,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<B256, BroadcastError>> + Send;

    /// `Ok(None)` while the transaction is pending or unknown to the node.
    fn receipt(&self, tx_hash: B256)
        -> impl Future<Output = eyre::Result<Option<MinedReceipt>>> + Send;
}
