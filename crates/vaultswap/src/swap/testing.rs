//! In-memory chain and aggregator doubles for engine tests.

use crate::{
    aggregator::{
        AggregatorApi, AssembleRequest, AssembleResponse, AssembledTransaction, QuoteRequest,
        QuoteResponse,
    },
    chains::{
        evm::{IUniswapV2Router02, IWrappedNative, IERC20},
        BroadcastError, ChainClient, MinedReceipt,
    },
};
use alloy::{
    primitives::{Address, Bytes, TxKind, B256, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::SolCall as _,
};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// Deterministic throwaway key.
pub fn test_signer() -> eyre::Result<PrivateKeySigner> {
    Ok(PrivateKeySigner::from_slice(&[0x11_u8; 32])?)
}

/// What happens to a transaction whose calldata starts with a given selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Mined,
    Reverted,
    /// Every node refused it; nothing was submitted.
    Rejected,
    /// Signed and handed over, but no node acknowledged it.
    Ambiguous,
    /// Accepted but never shows up in a receipt.
    NeverMined,
}

#[derive(Debug)]
pub struct ChainState {
    pub native: U256,
    /// The signer's token balances.
    pub tokens: HashMap<Address, U256>,
    /// Token balances reported by reads regardless of what the signer holds, like a lagging node.
    pub stale_balances: HashMap<Address, U256>,
    /// `(token, spender) -> allowance` for the signer.
    pub allowances: HashMap<(Address, Address), U256>,
    pub amounts_out: Result<U256, String>,
    /// Credited to the path's last token (or native) when a router swap is mined.
    pub swap_credit: U256,
    pub outcomes: HashMap<[u8; 4], TxOutcome>,
    pub receipt_error: bool,
    pub sent: Vec<TransactionRequest>,
    pub calls: Vec<&'static str>,
    receipts: HashMap<B256, MinedReceipt>,
}

#[derive(Debug)]
pub struct FakeChain {
    chain_id: u64,
    state: Mutex<ChainState>,
}

fn selector(tx: &TransactionRequest) -> [u8; 4] {
    tx.input
        .input()
        .and_then(|b| b.get(..4))
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .unwrap_or_default()
}

fn calldata(tx: &TransactionRequest) -> Bytes {
    tx.input.input().cloned().unwrap_or_default()
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(ChainState {
                native: U256::ZERO,
                tokens: HashMap::new(),
                stale_balances: HashMap::new(),
                allowances: HashMap::new(),
                amounts_out: Err("no pool".into()),
                swap_credit: U256::ZERO,
                outcomes: HashMap::new(),
                receipt_error: false,
                sent: vec![],
                calls: vec![],
                receipts: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.lock().sent.clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == name).count()
    }

    pub fn token_balance(&self, token: Address) -> U256 {
        self.lock().tokens.get(&token).copied().unwrap_or_default()
    }

    fn apply_effects(s: &mut ChainState, tx: &TransactionRequest) {
        let Some(TxKind::Call(to)) = tx.to else {
            return;
        };
        let value = tx.value.unwrap_or_default();
        let data = calldata(tx);
        let sel = selector(tx);

        if sel == IERC20::approveCall::SELECTOR {
            if let Ok(c) = IERC20::approveCall::abi_decode(&data) {
                s.allowances.insert((to, c.spender), c.value);
            }
        } else if sel == IWrappedNative::depositCall::SELECTOR {
            s.native = s.native.saturating_sub(value);
            *s.tokens.entry(to).or_default() += value;
        } else if sel == IWrappedNative::withdrawCall::SELECTOR {
            if let Ok(c) = IWrappedNative::withdrawCall::abi_decode(&data) {
                let bal = s.tokens.entry(to).or_default();
                *bal = bal.saturating_sub(c.wad);
                s.native += c.wad;
            }
        } else if sel == IUniswapV2Router02::swapExactETHForTokensCall::SELECTOR {
            if let Ok(c) = IUniswapV2Router02::swapExactETHForTokensCall::abi_decode(&data) {
                s.native = s.native.saturating_sub(value);
                if let Some(last) = c.path.last() {
                    *s.tokens.entry(*last).or_default() += s.swap_credit;
                }
            }
        } else if sel == IUniswapV2Router02::swapExactTokensForETHCall::SELECTOR {
            if let Ok(c) = IUniswapV2Router02::swapExactTokensForETHCall::abi_decode(&data) {
                if let Some(first) = c.path.first() {
                    let bal = s.tokens.entry(*first).or_default();
                    *bal = bal.saturating_sub(c.amountIn);
                }
                s.native += s.swap_credit;
            }
        } else if sel == IUniswapV2Router02::swapExactTokensForTokensCall::SELECTOR {
            if let Ok(c) = IUniswapV2Router02::swapExactTokensForTokensCall::abi_decode(&data) {
                if let Some(first) = c.path.first() {
                    let bal = s.tokens.entry(*first).or_default();
                    *bal = bal.saturating_sub(c.amountIn);
                }
                if let Some(last) = c.path.last() {
                    *s.tokens.entry(*last).or_default() += s.swap_credit;
                }
            }
        }
    }
}

impl ChainClient for FakeChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn native_balance(&self, _owner: Address) -> eyre::Result<U256> {
        let mut s = self.lock();
        s.calls.push("native_balance");
        Ok(s.native)
    }

    async fn erc20_balance(&self, token: Address, _owner: Address) -> eyre::Result<U256> {
        let mut s = self.lock();
        s.calls.push("erc20_balance");
        if let Some(stale) = s.stale_balances.get(&token) {
            return Ok(*stale);
        }
        Ok(s.tokens.get(&token).copied().unwrap_or_default())
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        _owner: Address,
        spender: Address,
    ) -> eyre::Result<U256> {
        let mut s = self.lock();
        s.calls.push("allowance");
        Ok(s
            .allowances
            .get(&(token, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn amounts_out(
        &self,
        _router: Address,
        amount_in: U256,
        _path: Vec<Address>,
    ) -> eyre::Result<Vec<U256>> {
        let mut s = self.lock();
        s.calls.push("amounts_out");
        match &s.amounts_out {
            Ok(out) => Ok(vec![amount_in, *out]),
            Err(e) => Err(eyre::eyre!("{e}")),
        }
    }

    async fn send_transaction(
        &self,
        _signer: &PrivateKeySigner,
        tx: TransactionRequest,
    ) -> Result<B256, BroadcastError> {
        let mut s = self.lock();
        s.calls.push("send");
        let outcome = s
            .outcomes
            .get(&selector(&tx))
            .copied()
            .unwrap_or(TxOutcome::Mined);
        if outcome == TxOutcome::Rejected {
            return Err(BroadcastError::Rejected("nonce too low".into()));
        }

        s.sent.push(tx.clone());
        let tx_hash = B256::with_last_byte(u8::try_from(s.sent.len()).unwrap_or(u8::MAX));
        match outcome {
            TxOutcome::Ambiguous => {
                return Err(BroadcastError::Ambiguous {
                    tx_hash,
                    reason: "connection reset by peer".into(),
                });
            }
            TxOutcome::Mined => {
                Self::apply_effects(&mut s, &tx);
                s.receipts.insert(
                    tx_hash,
                    MinedReceipt {
                        success: true,
                        block_number: Some(100),
                        gas_used: 21_000,
                    },
                );
            }
            TxOutcome::Reverted => {
                s.receipts.insert(
                    tx_hash,
                    MinedReceipt {
                        success: false,
                        block_number: Some(100),
                        gas_used: 21_000,
                    },
                );
            }
            TxOutcome::NeverMined | TxOutcome::Rejected => {}
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> eyre::Result<Option<MinedReceipt>> {
        let mut s = self.lock();
        s.calls.push("receipt");
        if s.receipt_error {
            eyre::bail!("upstream connect error");
        }
        Ok(s.receipts.get(&tx_hash).copied())
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    quote: QuoteResponse,
    assemble: AssembleResponse,
    quotes: Vec<QuoteRequest>,
    assembles: Vec<AssembleRequest>,
}

#[derive(Debug, Default)]
pub struct FakeAggregator {
    state: Mutex<AggregatorState>,
}

impl FakeAggregator {
    pub fn new(quote: QuoteResponse, assemble: AssembleResponse) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                quote,
                assemble,
                ..AggregatorState::default()
            }),
        }
    }

    /// Quotes `out`, assembles a call to `router` carrying `value`.
    pub fn happy(path_id: &str, out: &str, router: Address, value: U256) -> Self {
        Self::new(
            QuoteResponse {
                path_id: Some(path_id.to_owned()),
                out_amounts: vec![out.to_owned()],
            },
            AssembleResponse {
                transaction: Some(AssembledTransaction {
                    to: router,
                    data: Bytes::from(vec![0x83_u8, 0xbd, 0x37, 0xf9, 0, 0, 0, 1]),
                    value,
                }),
            },
        )
    }

    pub fn without_path_id(out: &str) -> Self {
        Self::new(
            QuoteResponse {
                path_id: None,
                out_amounts: vec![out.to_owned()],
            },
            AssembleResponse::default(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn quote_calls(&self) -> usize {
        self.lock().quotes.len()
    }

    pub fn assemble_calls(&self) -> usize {
        self.lock().assembles.len()
    }

    pub fn last_quote(&self) -> Option<QuoteRequest> {
        self.lock().quotes.last().cloned()
    }

    pub fn last_assembled_path_id(&self) -> Option<String> {
        self.lock().assembles.last().map(|a| a.path_id.clone())
    }
}

impl AggregatorApi for FakeAggregator {
    async fn quote(&self, req: &QuoteRequest) -> eyre::Result<QuoteResponse> {
        let mut s = self.lock();
        s.quotes.push(req.clone());
        Ok(s.quote.clone())
    }

    async fn assemble(&self, req: &AssembleRequest) -> eyre::Result<AssembleResponse> {
        let mut s = self.lock();
        s.assembles.push(req.clone());
        Ok(s.assemble.clone())
    }
}
