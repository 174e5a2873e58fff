//! Everything the binary prints. Results and error reports go to stdout as one JSON document;
//! logs own stderr.

use crate::{
    errors::ErrorReport,
    network::{Network, QuoteStrategy},
};
use eyre::Context as _;
use serde::Serialize;
use std::io::Write as _;

/// One line of `vaultswap networks`.
#[derive(Debug, Serialize)]
pub struct NetworkSummary<'a> {
    pub name: &'a str,
    pub chain_id: u64,
    pub rpc_url: &'a str,
    pub quote_source: &'static str,
    pub slippage_bps: u32,
    pub tokens: Vec<&'a str>,
}

impl<'a> From<&'a Network> for NetworkSummary<'a> {
    fn from(n: &'a Network) -> Self {
        Self {
            name: &n.name,
            chain_id: n.chain_id,
            rpc_url: &n.rpc_url,
            quote_source: match n.strategy {
                QuoteStrategy::Router { .. } => "router",
                QuoteStrategy::Aggregator { .. } => "aggregator",
            },
            slippage_bps: n.slippage.bps(),
            tokens: n.tokens.iter().map(|t| t.symbol.as_str()).collect(),
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(v: &T) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize output")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write stdout")?;
    Ok(())
}

pub fn print_error(report: &ErrorReport) -> eyre::Result<()> {
    print_json(&serde_json::json!({ "success": false, "error": report }))
}
