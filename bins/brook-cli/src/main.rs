//! brook-cli: command-line front end for a Brook wallet account.
//!
//! Opens one account from the configured data directory, talks to the
//! ledger node over JSON-RPC and prints results as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use brook_core::address::AddressRequest;
use brook_core::capability::CryptoHandle;
use brook_core::types::AssetId;
use brook_crypto::{Seed, SoftwareCrypto};
use brook_wallet::{BalanceQuery, JsonRpcLedger, ListUnspentQuery, SendRequest, WalletConfig, WalletService};

/// Brook wallet command-line interface.
#[derive(Parser)]
#[command(name = "brook-cli")]
#[command(version, about = "UTXO wallet state engine")]
struct Cli {
    /// Configuration file (TOML). `BROOK_*` environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Wallet account name.
    #[arg(short, long, global = true, default_value = "default")]
    wallet: String,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new random seed for the wallet.
    Generatekey,
    /// Pull missing blocks from the node.
    Sync,
    /// Drop all chain state and rescan from the birth height.
    Resync,
    /// Hand out a new receive address.
    Getnewaddress(NewAddressArgs),
    /// Show balances per asset.
    Getbalance(BalanceArgs),
    /// List unspent wallet outputs.
    Listunspent(ListUnspentArgs),
    /// Pay an address and broadcast.
    Sendtoaddress(SendArgs),
    /// Decode a raw transaction.
    Decoderawtransaction {
        /// Transaction hex.
        hex: String,
    },
}

#[derive(Args)]
struct NewAddressArgs {
    /// Address label.
    #[arg(short, long, default_value = "")]
    label: String,

    /// Address type: legacy, p2sh-segwit, bech32 or an explicit type name.
    #[arg(short = 't', long = "type", default_value = "default")]
    address_type: String,
}

#[derive(Args)]
struct BalanceArgs {
    /// Minimum confirmations.
    #[arg(short, long, default_value = "1")]
    minconf: u64,

    /// Only this address.
    #[arg(short, long)]
    address: Option<String>,
}

#[derive(Args)]
struct ListUnspentArgs {
    /// Minimum confirmations.
    #[arg(long, default_value = "1")]
    minconf: u64,

    /// Maximum confirmations.
    #[arg(long)]
    maxconf: Option<u64>,

    /// Include outputs locked by pending builds.
    #[arg(long)]
    include_locked: bool,
}

#[derive(Args)]
struct SendArgs {
    /// Recipient address.
    address: String,

    /// Amount in minor units.
    amount: u64,

    /// Asset id (hex). Defaults to the policy asset.
    #[arg(long)]
    asset: Option<String>,

    /// Fee rate in minor units per 1000 vbytes.
    #[arg(long)]
    fee_rate: Option<u64>,

    /// Signal replaceability.
    #[arg(long)]
    replaceable: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json);

    let config = WalletConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Generatekey => generate_key(&config, &cli.wallet),
        Commands::Sync => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let report = wallet.sync_from_ledger().await.context("Sync failed")?;
            println!("{}", serde_json::to_string_pretty(&sync_json(&report, wallet.tip_height().await))?);
            Ok(())
        }
        Commands::Resync => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let report = wallet.force_resync().await.context("Resync failed")?;
            println!("{}", serde_json::to_string_pretty(&sync_json(&report, wallet.tip_height().await))?);
            Ok(())
        }
        Commands::Getnewaddress(args) => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let request: AddressRequest = args
                .address_type
                .parse()
                .with_context(|| format!("Unknown address type: {}", args.address_type))?;
            let record = wallet
                .get_new_address(request, &args.label)
                .await
                .context("Failed to derive address")?;
            println!("{}", record.confidential_address.as_deref().unwrap_or(&record.address));
            Ok(())
        }
        Commands::Getbalance(args) => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let query = BalanceQuery {
                min_conf: args.minconf,
                address: args.address,
                ..Default::default()
            };
            let balances: BTreeMap<String, u64> = wallet
                .get_balance(&query)
                .await
                .into_iter()
                .map(|(asset, amount)| (asset.to_string(), amount))
                .collect();
            println!("{}", serde_json::to_string_pretty(&balances)?);
            Ok(())
        }
        Commands::Listunspent(args) => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let query = ListUnspentQuery {
                min_conf: args.minconf,
                max_conf: args.maxconf,
                include_locked: args.include_locked,
                ..Default::default()
            };
            let utxos = wallet.list_unspent(&query).await;
            println!("{}", serde_json::to_string_pretty(&utxos)?);
            Ok(())
        }
        Commands::Sendtoaddress(args) => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let asset = args
                .asset
                .as_deref()
                .map(str::parse::<AssetId>)
                .transpose()
                .context("Invalid asset id")?;
            let request = SendRequest {
                asset,
                fee_rate: args.fee_rate,
                replaceable: args.replaceable,
                ..SendRequest::new(args.address, args.amount)
            };
            let txid = wallet.send_to_address(&request).await.context("Send failed")?;
            println!("{txid}");
            Ok(())
        }
        Commands::Decoderawtransaction { hex } => {
            let wallet = open_wallet(&config, &cli.wallet)?;
            let tx = wallet
                .decode_raw_transaction(&hex)
                .await
                .context("Failed to decode transaction")?;
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
    }
}

fn init_logging(level: &str, json: bool) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn seed_path(config: &WalletConfig, wallet: &str) -> PathBuf {
    config.db_path(wallet).with_extension("seed")
}

/// Write a fresh random seed for `wallet`.
fn generate_key(config: &WalletConfig, wallet: &str) -> Result<()> {
    let path = seed_path(config, wallet);
    if path.exists() {
        bail!("Seed file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let seed = Seed::generate();
    std::fs::write(&path, seed.to_hex()).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "generated seed");
    println!("Seed written to: {}", path.display());
    println!("Back this file up. Anyone holding it can spend the wallet's funds.");
    Ok(())
}

fn open_wallet(config: &WalletConfig, wallet: &str) -> Result<WalletService> {
    let path = seed_path(config, wallet);
    let seed_hex = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read seed {} (run generatekey first)", path.display()))?;
    let seed = Seed::from_hex(seed_hex.trim()).context("Corrupt seed file")?;
    let crypto = CryptoHandle::ready(Arc::new(SoftwareCrypto::new(seed)));
    let ledger = JsonRpcLedger::new(&config.rpc_endpoint).context("Failed to create RPC client")?;
    WalletService::open(wallet, 0, config, crypto, Arc::new(ledger)).context("Failed to open wallet")
}

fn sync_json(report: &brook_wallet::SyncReport, tip: u64) -> serde_json::Value {
    serde_json::json!({
        "tip": tip,
        "applied": report.applied,
        "skipped": report.skipped,
        "reorg": report.reorg,
        "received": report.received,
        "spent": report.spent,
    })
}
