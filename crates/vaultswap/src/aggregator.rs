use crate::config::HttpConfig;
use alloy::primitives::{Address, Bytes, U256};
use eyre::Context as _;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::{future::Future, time::Duration};
use tracing::debug;

/// Body of `POST /sor/quote/v2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub chain_id: u64,
    pub input_tokens: Vec<InputToken>,
    pub output_tokens: Vec<OutputToken>,
    pub user_addr: Address,
    pub slippage_limit_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputToken {
    pub token_address: Address,
    /// Integer base units as a decimal string.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputToken {
    pub token_address: Address,
    pub proportion: u32,
}

impl QuoteRequest {
    /// Single input, single output, whole amount routed to the output token.
    #[expect(
        clippy::float_arithmetic,
        reason = "the quote API takes slippage as a JSON number in percent"
    )]
    pub fn single(
        chain_id: u64,
        input: Address,
        amount: U256,
        output: Address,
        user: Address,
        slippage_bps: u32,
    ) -> Self {
        Self {
            chain_id,
            input_tokens: vec![InputToken {
                token_address: input,
                amount: amount.to_string(),
            }],
            output_tokens: vec![OutputToken {
                token_address: output,
                proportion: 1,
            }],
            user_addr: user,
            slippage_limit_percent: f64::from(slippage_bps) / 100.0,
        }
    }
}

/// Response of the quote endpoint. Both fields may be absent when no route exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    #[serde(default)]
    pub path_id: Option<String>,
    #[serde(default)]
    pub out_amounts: Vec<String>,
}

/// Body of `POST /sor/assemble`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleRequest {
    pub user_addr: Address,
    pub path_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AssembleResponse {
    #[serde(default)]
    pub transaction: Option<AssembledTransaction>,
}

/// A ready-to-sign payload. Signed and broadcast verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssembledTransaction {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default, deserialize_with = "de_u256_lenient")]
    pub value: U256,
}

/// Accepts a JSON number, a decimal string or a `0x` hex string.
fn de_u256_lenient<'de, D>(de: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(de)? {
        Raw::Num(n) => Ok(U256::from(n)),
        Raw::Str(s) => {
            let t = s.trim();
            let parsed = match t.strip_prefix("0x") {
                Some(h) => U256::from_str_radix(h, 16).ok(),
                None => t.parse::<U256>().ok(),
            };
            parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid uint256: {s}")))
        }
    }
}

/// Two-phase off-chain aggregator: quote, then exchange the plan id for a transaction.
pub trait AggregatorApi: Send + Sync {
    fn quote(&self, req: &QuoteRequest)
        -> impl Future<Output = eyre::Result<QuoteResponse>> + Send;

    fn assemble(
        &self,
        req: &AssembleRequest,
    ) -> impl Future<Output = eyre::Result<AssembleResponse>> + Send;
}

fn base_url_is_allowed(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }

    let s = url.trim();
    if s.starts_with("https://") {
        return true;
    }
    if !s.starts_with("http://") {
        return false;
    }
    host_prefix_ok(s, "http://127.0.0.1")
        || host_prefix_ok(s, "http://localhost")
        || host_prefix_ok(s, "http://[::1]")
}

#[derive(Debug, Clone)]
pub struct OdosClient {
    base_url: String,
    http: Client,
}

impl OdosClient {
    pub fn new(cfg: &HttpConfig) -> eyre::Result<Self> {
        if !base_url_is_allowed(&cfg.odos_base_url) {
            eyre::bail!("odos_base_url must use https (or http://localhost for local testing)");
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .context("build http client")?;
        Ok(Self {
            base_url: cfg.odos_base_url.trim().trim_end_matches('/').to_owned(),
            http,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, label: &'static str) -> eyre::Result<R>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "aggregator request");
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{label} request"))?
            .error_for_status()
            .with_context(|| format!("{label} status"))?
            .json()
            .await
            .with_context(|| format!("{label} json"))?;
        Ok(resp)
    }
}

impl AggregatorApi for OdosClient {
    async fn quote(&self, req: &QuoteRequest) -> eyre::Result<QuoteResponse> {
        self.post_json("/sor/quote/v2", req, "odos quote").await
    }

    async fn assemble(&self, req: &AssembleRequest) -> eyre::Result<AssembleResponse> {
        self.post_json("/sor/assemble", req, "odos assemble").await
    }
}
