use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use engine::{
    BalancePolicy, CreateAccountCmd, Currency, Engine, EntryFilter, Page, TransferCmd,
    TransferFilter,
};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;

use crate::error::Result;

mod error;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "simple_bank")]
#[command(about = "Accounts and money transfers on a SQL ledger")]
struct Cli {
    /// Optional config file path (TOML), without extension.
    #[arg(long)]
    config: Option<String>,

    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Override the negative balance policy (`allow` or `reject`).
    #[arg(long, value_parser = parse_policy)]
    negative_balance: Option<BalancePolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Account(Account),
    Entry(Entry),
    /// Move money from one account to another.
    Transfer(TransferArgs),
    /// List recorded transfers.
    TransferLog(TransferLogArgs),
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create(AccountCreateArgs),
    Get { id: i64 },
    List(PageArgs),
}

#[derive(Args, Debug)]
struct AccountCreateArgs {
    #[arg(long)]
    owner: String,
    #[arg(long, default_value = "USD", value_parser = parse_currency)]
    currency: Currency,
    /// Opening balance in minor units.
    #[arg(long, default_value_t = 0)]
    balance: i64,
}

#[derive(Args, Debug)]
struct Entry {
    #[command(subcommand)]
    command: EntryCommand,
}

#[derive(Subcommand, Debug)]
enum EntryCommand {
    Get {
        id: i64,
    },
    List {
        #[arg(long)]
        account: Option<i64>,
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Args, Debug)]
struct TransferArgs {
    #[arg(long)]
    from: i64,
    #[arg(long)]
    to: i64,
    /// Amount in minor units.
    #[arg(long)]
    amount: i64,
}

#[derive(Args, Debug)]
struct TransferLogArgs {
    #[arg(long)]
    from: Option<i64>,
    #[arg(long)]
    to: Option<i64>,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args, Debug, Clone, Copy)]
struct PageArgs {
    #[arg(long, default_value_t = 5)]
    limit: u64,
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

impl From<PageArgs> for Page {
    fn from(args: PageArgs) -> Self {
        Page::new(args.limit, args.offset)
    }
}

fn parse_currency(raw: &str) -> std::result::Result<Currency, String> {
    Currency::try_from(raw).map_err(|err| err.to_string())
}

fn parse_policy(raw: &str) -> std::result::Result<BalancePolicy, String> {
    BalancePolicy::try_from(raw).map_err(|err| err.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::warn!("interrupted, cancelling");
}

async fn connect_engine(url: &str, policy: BalancePolicy) -> Result<Engine> {
    let db = sea_orm::Database::connect(url).await?;
    Migrator::up(&db, None).await?;
    let engine = Engine::builder().database(db).policy(policy).build().await?;
    Ok(engine)
}

async fn run(cli: Cli) -> Result<()> {
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "simple_bank={level},engine={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let url = cli.database_url.unwrap_or(settings.database.url);
    let policy = cli
        .negative_balance
        .unwrap_or(settings.ledger.negative_balance);
    tracing::debug!("connecting to database (negative balance policy: {policy:?})");
    let engine = connect_engine(&url, policy).await?;

    match cli.command {
        Command::Account(Account { command }) => match command {
            AccountCommand::Create(args) => {
                let cmd = CreateAccountCmd::new(args.owner, args.currency).balance(args.balance);
                print_json(&engine.create_account(cmd).await?)
            }
            AccountCommand::Get { id } => print_json(&engine.account(id).await?),
            AccountCommand::List(page) => print_json(&engine.accounts(page.into()).await?),
        },
        Command::Entry(Entry { command }) => match command {
            EntryCommand::Get { id } => print_json(&engine.entry(id).await?),
            EntryCommand::List { account, page } => {
                let mut filter = EntryFilter::new(page.into());
                if let Some(account_id) = account {
                    filter = filter.account_id(account_id);
                }
                print_json(&engine.entries(filter).await?)
            }
        },
        Command::Transfer(args) => {
            let cmd = TransferCmd::new(args.from, args.to, args.amount);
            print_json(&engine.transfer_until(cmd, interrupted()).await?)
        }
        Command::TransferLog(args) => {
            let mut filter = TransferFilter::new(args.page.into());
            if let Some(from) = args.from {
                filter = filter.from_account_id(from);
            }
            if let Some(to) = args.to {
                filter = filter.to_account_id(to);
            }
            print_json(&engine.transfers(filter).await?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
