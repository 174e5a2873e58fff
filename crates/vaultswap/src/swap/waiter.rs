use crate::{
    chains::{ChainClient, MinedReceipt},
    config::EngineConfig,
};
use alloy::primitives::B256;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// How a broadcast transaction ended, as far as this process could observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Success(MinedReceipt),
    Reverted(MinedReceipt),
    /// Not observed as mined before the timeout. The transaction may still land.
    Unconfirmed { reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct TxWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl TxWaiter {
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub const fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.confirmation_timeout_seconds),
            Duration::from_millis(cfg.receipt_poll_interval_ms),
        )
    }

    /// Poll for the receipt until it appears or the timeout elapses. Receipt lookup errors are
    /// treated as transient until then.
    pub async fn wait<C: ChainClient>(&self, chain: &C, tx_hash: B256) -> Confirmation {
        let deadline = Instant::now() + self.timeout;
        let mut last_err: Option<String> = None;
        loop {
            match chain.receipt(tx_hash).await {
                Ok(Some(r)) if r.success => return Confirmation::Success(r),
                Ok(Some(r)) => return Confirmation::Reverted(r),
                Ok(None) => debug!(tx_hash = %tx_hash, "receipt not available yet"),
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = %format!("{e:#}"), "receipt lookup failed");
                    last_err = Some(format!("{e:#}"));
                }
            }

            if Instant::now() >= deadline {
                let reason = last_err.unwrap_or_else(|| {
                    format!("not mined within {}s", self.timeout.as_secs())
                });
                return Confirmation::Unconfirmed { reason };
            }
            sleep(self.poll_interval).await;
        }
    }
}
