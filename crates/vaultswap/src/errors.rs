use alloy::primitives::B256;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A structured error suitable for printing to the caller as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ErrorReport {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Every way a swap can end other than success.
///
/// Variants up to and including `NotSubmitted` guarantee that no swap transaction reached the
/// chain (a wrap or approval may have). `TransactionReverted`, `Unconfirmed` and `UnwrapFailed`
/// carry the hash of a transaction that was broadcast.
#[derive(Debug, Error, Clone)]
pub enum SwapError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("unknown token {symbol} on {network}")]
    UnknownToken { network: String, symbol: String },

    #[error("insufficient {symbol} balance: have {available}, need {required}")]
    InsufficientBalance {
        symbol: String,
        available: String,
        required: String,
    },

    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("assembly unavailable: {0}")]
    AssemblyUnavailable(String),

    #[error("wrap failed: {reason}")]
    WrapFailed {
        tx_hash: Option<B256>,
        reason: String,
    },

    #[error("approval failed: {reason}")]
    ApprovalFailed {
        tx_hash: Option<B256>,
        reason: String,
    },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("{stage} transaction not submitted: {reason}")]
    NotSubmitted { stage: &'static str, reason: String },

    #[error("transaction {tx_hash:#x} reverted on-chain")]
    TransactionReverted { tx_hash: B256 },

    #[error("transaction {tx_hash:#x} was broadcast but its outcome is unknown: {reason}")]
    Unconfirmed { tx_hash: B256, reason: String },

    #[error("swap {swap_tx_hash:#x} succeeded but unwrapping {wrapped_amount} failed: {reason}")]
    UnwrapFailed {
        swap_tx_hash: B256,
        unwrap_tx_hash: Option<B256>,
        wrapped_amount: String,
        reason: String,
    },
}

impl SwapError {
    pub fn rpc(context: &str, err: &eyre::Report) -> Self {
        Self::Rpc(format!("{context}: {err:#}"))
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::UnknownNetwork(_) | Self::UnknownToken { .. } => {
                "invalid_request"
            }
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::QuoteUnavailable(_) => "quote_unavailable",
            Self::AssemblyUnavailable(_) => "assembly_unavailable",
            Self::WrapFailed { .. } => "wrap_failed",
            Self::ApprovalFailed { .. } => "approval_failed",
            Self::Rpc(_) => "rpc_error",
            Self::NotSubmitted { .. } => "not_submitted",
            Self::TransactionReverted { .. } => "transaction_reverted",
            Self::Unconfirmed { .. } => "unconfirmed",
            Self::UnwrapFailed { .. } => "unwrap_failed",
        }
    }

    /// The transaction the caller must inspect on-chain, if any.
    pub const fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::TransactionReverted { tx_hash } | Self::Unconfirmed { tx_hash, .. } => {
                Some(*tx_hash)
            }
            Self::UnwrapFailed { swap_tx_hash, .. } => Some(*swap_tx_hash),
            Self::WrapFailed { tx_hash, .. } | Self::ApprovalFailed { tx_hash, .. } => *tx_hash,
            Self::InvalidRequest(_)
            | Self::UnknownNetwork(_)
            | Self::UnknownToken { .. }
            | Self::InsufficientBalance { .. }
            | Self::QuoteUnavailable(_)
            | Self::AssemblyUnavailable(_)
            | Self::Rpc(_)
            | Self::NotSubmitted { .. } => None,
        }
    }
}

impl From<SwapError> for ErrorReport {
    fn from(e: SwapError) -> Self {
        let message = e.to_string();
        let code = e.code();
        let data = match &e {
            SwapError::UnwrapFailed {
                swap_tx_hash,
                unwrap_tx_hash,
                wrapped_amount,
                ..
            } => json!({
                "tx_hash": format!("{swap_tx_hash:#x}"),
                "unwrap_tx_hash": unwrap_tx_hash.map(|h| format!("{h:#x}")),
                "wrapped_amount": wrapped_amount,
            }),
            SwapError::InsufficientBalance {
                symbol,
                available,
                required,
            } => json!({ "symbol": symbol, "available": available, "required": required }),
            _ => e
                .tx_hash()
                .map_or(Value::Null, |h| json!({ "tx_hash": format!("{h:#x}") })),
        };
        Self::new(code, message).with_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfirmed_report_carries_hash() {
        let h = B256::repeat_byte(0xab);
        let r = ErrorReport::from(SwapError::Unconfirmed {
            tx_hash: h,
            reason: "connection reset".into(),
        });
        assert_eq!(r.code, "unconfirmed");
        assert_eq!(
            r.data.get("tx_hash").and_then(Value::as_str),
            Some(format!("{h:#x}").as_str())
        );
    }

    #[test]
    fn request_errors_share_a_code_and_carry_no_data() {
        let r = ErrorReport::from(SwapError::UnknownToken {
            network: "ethereum".into(),
            symbol: "DOGE".into(),
        });
        assert_eq!(r.code, "invalid_request");
        assert!(r.data.is_null());
        assert!(r.message.contains("DOGE"));
    }

    #[test]
    fn reverted_is_distinct_from_unconfirmed() {
        let h = B256::repeat_byte(1);
        let reverted = SwapError::TransactionReverted { tx_hash: h };
        let unconfirmed = SwapError::Unconfirmed {
            tx_hash: h,
            reason: "timeout".into(),
        };
        assert_ne!(reverted.code(), unconfirmed.code());
        assert_eq!(reverted.tx_hash(), unconfirmed.tx_hash());
    }
}
