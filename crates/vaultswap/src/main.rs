#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Args, Parser, Subcommand};
use eyre::Context as _;
use serde_json::Value;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

mod aggregator;
mod amount;
mod chains;
mod cli_output;
mod config;
mod errors;
mod fsutil;
mod network;
mod paths;
mod retry;
mod signer;
mod store;
mod swap;

use crate::{
    aggregator::OdosClient,
    chains::evm::EvmChain,
    cli_output::NetworkSummary,
    config::VaultswapConfig,
    errors::{ErrorReport, SwapError},
    network::{Network, NetworkRegistry},
    swap::{SwapEngine, SwapRequest},
};

#[derive(Parser, Debug)]
#[command(name = "vaultswap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct PairArgs {
    /// Network name (`ethereum`, `base`, `polygon`, `sonic`).
    #[arg(long)]
    network: String,
    /// Input token symbol, exact case.
    #[arg(long)]
    from: String,
    /// Output token symbol, exact case.
    #[arg(long)]
    to: String,
    /// Human decimal amount of the input token.
    #[arg(long)]
    amount: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured networks.
    Networks,

    /// List the tokens known on a network.
    Tokens {
        #[arg(long)]
        network: String,
    },

    /// Price a swap without signing or sending anything.
    Quote(PairArgs),

    /// Execute a swap and wait for it to be mined.
    ///
    /// The signing key is read from `--key-env` or prompted for on a terminal.
    Swap {
        #[command(flatten)]
        pair: PairArgs,
        #[arg(long, default_value = signer::DEFAULT_KEY_ENV)]
        key_env: String,
    },

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(paths: &paths::VaultswapPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("vaultswap.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn engine_for(
    network: &Network,
    cfg: &VaultswapConfig,
) -> eyre::Result<SwapEngine<EvmChain, OdosClient>> {
    Ok(SwapEngine::new(
        network.clone(),
        EvmChain::for_network(network),
        OdosClient::new(&cfg.http).context("aggregator client")?,
        &cfg.engine,
    ))
}

fn to_json<T: serde::Serialize>(v: &T) -> eyre::Result<Value> {
    serde_json::to_value(v).context("serialize result")
}

/// Engine failures surface as `SwapError` inside the report; anything else is a local fault.
async fn dispatch(cmd: Command, cfg: &VaultswapConfig) -> eyre::Result<Value> {
    let registry = NetworkRegistry::from_config(cfg).context("build network table")?;
    match cmd {
        Command::Networks => {
            to_json(&registry.iter().map(NetworkSummary::from).collect::<Vec<_>>())
        }
        Command::Tokens { network } => {
            let n = registry.get(&network)?;
            to_json(&n.tokens.iter().collect::<Vec<_>>())
        }
        Command::Quote(p) => {
            let engine = engine_for(registry.get(&p.network)?, cfg)?;
            to_json(&engine.quote(&p.from, &p.to, &p.amount).await?)
        }
        Command::Swap { pair, key_env } => {
            let engine = engine_for(registry.get(&pair.network)?, cfg)?;
            let signer = signer::load_signer(&key_env)
                .map_err(|e| SwapError::InvalidRequest(format!("signing key: {e:#}")))?;
            tracing::info!(
                network = %engine.network().name,
                signer = %signer.address(),
                "executing swap"
            );
            let res = engine
                .swap(SwapRequest {
                    from: pair.from,
                    to: pair.to,
                    amount: pair.amount,
                    signer,
                })
                .await?;
            to_json(&res)
        }
        Command::Paths => eyre::bail!("paths is handled before configuration is loaded"),
    }
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::VaultswapPaths::discover()?;
    fsutil::ensure_private_dir(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    if matches!(cli.cmd, Command::Paths) {
        cli_output::print_json(&serde_json::json!({
          "config_dir": paths.config_dir,
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
          "config_file": paths.config_file(),
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = store::ConfigStore::new(&paths)
        .load_or_init_default()
        .context("load config")?;

    match dispatch(cli.cmd, &cfg).await {
        Ok(v) => {
            cli_output::print_json(&v)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => match e.downcast::<SwapError>() {
            Ok(swap_err) => {
                cli_output::print_error(&ErrorReport::from(swap_err))?;
                Ok(ExitCode::FAILURE)
            }
            Err(other) => Err(other),
        },
    }
}
