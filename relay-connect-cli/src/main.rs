//! relay-connect CLI - discover wallet providers and BTC relay deployments.
#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use relay_connect::prelude::*;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// relay-connect CLI
#[derive(Parser, Debug)]
#[command(name = "relay-connect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the provider behind an RPC endpoint and print its session state
    Discover {
        /// JSON-RPC endpoint
        #[arg(long, env = "RELAY_RPC_URL")]
        rpc_url: String,

        /// Seconds to wait for the chain id
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Print the progress of a deployed BTC relay
    RelayStatus {
        /// JSON-RPC endpoint (defaults to the public endpoint of the Sapphire network)
        #[arg(long, env = "RELAY_RPC_URL")]
        rpc_url: Option<String>,

        #[command(flatten)]
        deployment: DeploymentArgs,
    },
    /// Render a deployment manifest as environment variables
    Env {
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Where to find the deployment. Without `--manifest-dir` the `RELAY_*`
/// environment variables are used, and the network flags override
/// `RELAY_BTC_NET` / `RELAY_SAPPHIRE_NET`.
#[derive(Args, Debug)]
struct DeploymentArgs {
    /// Directory holding `btc-<net>_sapphire-<net>.json` manifests
    #[arg(long)]
    manifest_dir: Option<PathBuf>,

    /// Bitcoin network followed by the relay [manifest default: testnet]
    #[arg(long)]
    btc_net: Option<Network>,

    /// Sapphire network hosting the contracts [manifest default: testnet]
    #[arg(long)]
    sapphire_net: Option<Network>,
}

impl DeploymentArgs {
    fn load(&self) -> anyhow::Result<DeploymentConfig> {
        let config = match &self.manifest_dir {
            Some(dir) => {
                let btc_net = self.btc_net.unwrap_or(Network::Testnet);
                let sapphire_net = self.sapphire_net.unwrap_or(Network::Testnet);
                DeploymentConfig::from_manifest_dir(dir, btc_net, sapphire_net)
                    .with_context(|| format!("loading manifest from {}", dir.display()))?
            }
            None => DeploymentConfig::from_env_with_networks(self.btc_net, self.sapphire_net)
                .context("reading RELAY_* environment")?,
        };
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "relay_connect=debug,relay_connect_cli=debug"
    } else {
        "relay_connect=warn,relay_connect_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn discover(rpc_url: &str, timeout: u64) -> anyhow::Result<()> {
    let provider: SharedTransport = Arc::new(HttpProvider::connect(rpc_url).await?);
    let bus = AnnouncementBus::new().with_implicit_provider(provider);
    let registry = ProviderRegistry::new();

    if let Some(mut listener) = registry.initialize(&bus) {
        listener.drain();
    }
    info!(mode = %registry.mode(), providers = registry.len(), "discovery finished");

    for session in registry.sessions() {
        let mut rx = session.subscribe();
        let seeded = tokio::time::timeout(
            Duration::from_secs(timeout),
            rx.wait_for(|s| s.chain_id.is_some() && s.accounts.is_some()),
        )
        .await
        .is_ok_and(|r| r.is_ok());
        if !seeded {
            println!("{}: no response within {timeout}s", session.info().name);
            continue;
        }

        let state = session.state();
        println!("provider:  {}", session.info().name);
        println!(
            "chain:     {}",
            state.chain_name().unwrap_or_else(|| "-".into())
        );
        println!("connected: {}", state.connected);
        for account in state.accounts.unwrap_or_default() {
            println!("account:   {account}");
        }
    }
    Ok(())
}

async fn relay_status(rpc_url: Option<String>, deployment: &DeploymentArgs) -> anyhow::Result<()> {
    let config = deployment.load()?;
    let rpc_url = rpc_url.unwrap_or_else(|| config.sapphire_net.default_sapphire_rpc_url().to_owned());
    let address = config.require("BTCRelay")?;

    let provider = HttpProvider::connect(&rpc_url).await?;
    let reader = RelayReader::new(Arc::new(provider), address);
    let status = reader
        .status()
        .await
        .with_context(|| format!("reading relay at {address}"))?;

    println!("relay:             {address}");
    println!("btc network:       {}", config.btc_net);
    println!("latest height:     {}", status.latest_height);
    println!("latest time:       {}", status.latest_time);
    println!("start height:      {}", status.start_height);
    println!("min confirmations: {}", status.min_confirmations);
    println!("testnet:           {}", status.is_testnet);
    Ok(())
}

fn env(deployment: &DeploymentArgs, out: Option<PathBuf>) -> anyhow::Result<()> {
    let rendered = deployment.load()?.to_env_file();
    match out {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "environment file written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Discover { rpc_url, timeout } => discover(&rpc_url, timeout).await,
        Command::RelayStatus {
            rpc_url,
            deployment,
        } => relay_status(rpc_url, &deployment).await,
        Command::Env { deployment, out } => env(&deployment, out),
    }
}
