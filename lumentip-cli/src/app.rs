use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lumentip_config::{Settings, DEFAULT_CONFIG_PATH};
use lumentip_core::{AccountRef, Address, MemoRoute};
use lumentip_ledger::{Accounts, Store, TransactionKind};

use crate::replay;

/// Operate a lumentip ledger: inspect accounts, browse the transaction
/// log, and rehearse reconciliation runs against captured payments.
#[derive(Parser)]
#[command(name = "lumentip", version, about)]
pub struct Cli {
    /// Settings file; `lumentip.toml` in the working directory by default.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a settings template and create the ledger database.
    Init {
        /// Overwrite an existing settings file.
        #[arg(long)]
        force: bool,
    },
    /// Show one account's balance and linked wallet.
    Balance { adapter: String, unique_id: String },
    /// Recent chain transactions, newest first.
    History {
        /// Restrict to one kind: deposit, withdrawal, or refund.
        #[arg(long, conflicts_with = "account")]
        kind: Option<TransactionKind>,
        /// Show one account's actions instead, given as `adapter/uniqueId`.
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List every account with its balance.
    Accounts,
    /// Replay a payment fixture through the reconciler on a scratch
    /// ledger, printing each payment's disposition.
    Replay {
        /// JSON array of payment records.
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
        /// Service wallet the fixture targets; defaults to the
        /// configured chain address.
        #[arg(long)]
        operator: Option<Address>,
        /// Refund every routable deposit instead of crediting it.
        #[arg(long)]
        deposits_closed: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { force } => init_workspace(cli.config.as_deref(), force),
        Commands::Balance { adapter, unique_id } => {
            let store = open_ledger(cli.config.as_deref())?;
            balance(store, &adapter, &unique_id)
        }
        Commands::History {
            kind,
            account,
            limit,
        } => {
            let store = open_ledger(cli.config.as_deref())?;
            history(store, kind, account.as_deref(), limit)
        }
        Commands::Accounts => {
            let store = open_ledger(cli.config.as_deref())?;
            list_accounts(store)
        }
        Commands::Replay {
            file,
            operator,
            deposits_closed,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            init_telemetry(&settings.log.level);
            replay::run(&settings, &file, operator, deposits_closed).await
        }
    }
}

fn init_workspace(config: Option<&Path>, force: bool) -> Result<()> {
    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    if path.exists() && !force {
        println!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    } else {
        Settings::write_template(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("settings written to {}", path.display());
    }
    let settings = Settings::load(Some(&path))?;
    Store::open(&settings.ledger.db_path).with_context(|| {
        format!(
            "failed to create ledger at {}",
            settings.ledger.db_path.display()
        )
    })?;
    println!("ledger ready at {}", settings.ledger.db_path.display());
    Ok(())
}

fn balance(store: Arc<Store>, adapter: &str, unique_id: &str) -> Result<()> {
    let accounts = Accounts::new(store);
    let account_ref = AccountRef::new(adapter, unique_id);
    match accounts.get(&account_ref)? {
        Some(account) => {
            println!("{}  {}", account_ref, account.balance.to_fixed());
            match &account.wallet_address {
                Some(wallet) => println!("wallet {wallet}"),
                None => println!("wallet unset"),
            }
        }
        None => println!("{account_ref}: no such account"),
    }
    Ok(())
}

fn history(
    store: Arc<Store>,
    kind: Option<TransactionKind>,
    account: Option<&str>,
    limit: usize,
) -> Result<()> {
    if let Some(raw) = account {
        let MemoRoute::Account(account_ref) = MemoRoute::classify(Some(raw)) else {
            bail!("--account must look like adapter/uniqueId");
        };
        let accounts = Accounts::new(store);
        for action in accounts.history(&account_ref, limit)? {
            println!(
                "{}  {:<10}  {:>18}  {}",
                action.created_at.to_rfc3339(),
                action.kind.as_str(),
                action.amount.to_fixed(),
                action.hash
            );
        }
        return Ok(());
    }
    for tx in store.recent_transactions(kind, limit)? {
        let state = if tx.credited {
            "credited"
        } else if tx.refunded {
            "refunded"
        } else {
            "pending"
        };
        println!(
            "{}  {:<10}  {:>18}  {:<8}  {}",
            tx.created_at.to_rfc3339(),
            tx.kind.as_str(),
            tx.amount.to_fixed(),
            state,
            tx.hash
        );
    }
    Ok(())
}

fn list_accounts(store: Arc<Store>) -> Result<()> {
    let accounts = Accounts::new(store).list()?;
    if accounts.is_empty() {
        println!("no accounts yet");
        return Ok(());
    }
    for account in accounts {
        let wallet = account
            .wallet_address
            .as_ref()
            .map(Address::as_str)
            .unwrap_or("-");
        println!(
            "{:<28}  {:>18}  {}",
            account.account_ref().to_string(),
            account.balance.to_fixed(),
            wallet
        );
    }
    Ok(())
}

fn load_settings(config: Option<&Path>) -> Result<Settings> {
    Settings::load(config).context("failed to load settings")
}

fn open_ledger(config: Option<&Path>) -> Result<Arc<Store>> {
    let settings = load_settings(config)?;
    init_telemetry(&settings.log.level);
    let store = Store::open(&settings.ledger.db_path).with_context(|| {
        format!(
            "failed to open ledger at {}",
            settings.ledger.db_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

// Logs go to stderr; stdout carries only command output.
fn init_telemetry(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
