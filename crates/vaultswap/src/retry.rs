use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

fn backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    let ms = base_ms.saturating_mul(pow2).min(max_ms);
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        // Drawn before any await so no RNG handle is held across suspension points.
        rand::random::<u64>() % cfg.jitter_max_ms.saturating_add(1).max(1)
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Run `op` against each endpoint in order until one succeeds. After a full round of failures,
/// sleep with exponential backoff and start over, for at most `cfg.rounds` rounds.
pub async fn try_endpoints_with_backoff<I, T, Fut>(
    endpoints: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> eyre::Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{context_label}: no rpc endpoints configured");
    }
    if cfg.rounds == 0 {
        eyre::bail!("invalid backoff config: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..cfg.rounds {
        for (idx, endpoint) in endpoints.iter().enumerate() {
            match op(endpoint).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    debug!(label = context_label, round, endpoint = idx, error = %e, "endpoint failed");
                    last_err = Some(e);
                }
            }
        }

        if round + 1 < cfg.rounds {
            tokio::time::sleep(backoff_delay(cfg, round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(context_label))
}
