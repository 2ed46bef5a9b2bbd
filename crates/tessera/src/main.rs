#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::process::ExitCode;
use tessera::{
    doctor,
    errors::ErrorReport,
    keystore::{distribute::ShareBundle, share::Share, Keystore},
    paths::TesseraPaths,
    records::WalletKeyRecord,
};
use tracing_subscriber::prelude::*;

mod cli_output;

#[derive(Parser, Debug)]
#[command(name = "tessera", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Create a wallet and print its merchant shares. They are shown once and never stored.
    CreateWallet,

    /// Show the public part of a wallet record.
    Show {
        #[arg(long)]
        wallet: String,
    },

    /// List wallets.
    List,

    /// Verify that the given shares, together with the backend share, rebuild the wallet.
    Recover {
        #[arg(long)]
        wallet: String,
        /// Share in `custody:batch:index:hex` form. Repeat for each share.
        #[arg(long = "share", required = true)]
        shares: Vec<String>,
    },

    /// Re-share a wallet. Every share printed before this call stops working.
    Rotate {
        #[arg(long)]
        wallet: String,
        #[arg(long = "share", required = true)]
        shares: Vec<String>,
    },
}

fn init_logging(paths: &TesseraPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tessera.log.jsonl");
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

fn parse_shares(raw: &[String]) -> eyre::Result<Vec<Share>> {
    raw.iter()
        .map(|s| Share::from_compact(s).map_err(eyre::Report::new))
        .collect()
}

fn record_summary(r: &WalletKeyRecord) -> serde_json::Value {
    serde_json::json!({
      "wallet_address": r.wallet_address,
      "primary_chain": r.primary_chain,
      "chain_addresses": r.chain_addresses,
      "share_threshold": r.share_threshold,
      "total_shares": r.total_shares,
      "share_batch": r.share_batch,
      "kdf": r.kdf,
      "generation": r.generation,
      "created_at": r.created_at,
      "rotated_at": r.rotated_at,
    })
}

fn bundle_json(b: &ShareBundle) -> serde_json::Value {
    serde_json::json!({
      "batch": b.batch,
      "threshold": b.threshold,
      "total": b.total,
      "merchant_device": b.merchant_device.to_compact(),
      "merchant_backup": b.merchant_backup.to_compact(),
      "third_party": b.third_party.to_compact(),
      "recovery_qr": b.recovery_qr(),
      "recovery_email": b.recovery_email(),
    })
}

fn run(cmd: Command, paths: &TesseraPaths) -> eyre::Result<()> {
    match cmd {
        Command::Paths => cli_output::print_json(&serde_json::json!({
          "config_dir": paths.config_dir,
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
          "wallets_dir": paths.wallets_dir(),
          "audit_log": paths.audit_log_path(),
        })),
        Command::Doctor { json } => doctor::run(paths, json).context("doctor failed"),
        Command::CreateWallet => {
            let ks = Keystore::open(paths)?;
            let created = ks.create_wallet()?;
            let mut out = record_summary(&created.record);
            if let Some(obj) = out.as_object_mut() {
                obj.insert("shares".to_owned(), bundle_json(&created.bundle));
            }
            cli_output::print_json(&out)?;
            cli_output::print_share_notice();
            Ok(())
        }
        Command::Show { wallet } => {
            let ks = Keystore::open(paths)?;
            cli_output::print_json(&record_summary(&ks.wallet(&wallet)?))
        }
        Command::List => {
            let ks = Keystore::open(paths)?;
            let list: Vec<_> = ks.list_wallets()?.iter().map(record_summary).collect();
            cli_output::print_json(&serde_json::Value::Array(list))
        }
        Command::Recover { wallet, shares } => {
            let supplied = parse_shares(&shares)?;
            let ks = Keystore::open(paths)?;
            let address = ks.recover_wallet(&wallet, &supplied)?;
            cli_output::print_json(&serde_json::json!({
              "wallet_address": address,
              "verified": true,
            }))
        }
        Command::Rotate { wallet, shares } => {
            let supplied = parse_shares(&shares)?;
            let ks = Keystore::open(paths)?;
            let bundle = ks.rotate_shares(&wallet, &supplied)?;
            let record = ks.wallet(&wallet)?;
            let mut out = record_summary(&record);
            if let Some(obj) = out.as_object_mut() {
                obj.insert("shares".to_owned(), bundle_json(&bundle));
            }
            cli_output::print_json(&out)?;
            cli_output::print_share_notice();
            Ok(())
        }
    }
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = TesseraPaths::discover()?;
    paths.ensure_private_dirs()?;
    let _log_guard = init_logging(&paths);

    match run(cli.cmd, &paths) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            let report = ErrorReport::from_report(&e);
            tracing::debug!(code = %report.code, error = ?e, "command failed");
            cli_output::print_error(&report)?;
            Ok(ExitCode::FAILURE)
        }
    }
}
