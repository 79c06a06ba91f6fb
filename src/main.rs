use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use buchfink::commands::{accounts, balances, fetch, history, prices, report};
use buchfink::db::Buchfink;
use buchfink::{
    ActionsArgs, AllowancesArgs, BalancesArgs, CacheArgs, ExploreArgs, FetchArgs, InitArgs,
    ListArgs, QuoteArgs, ReportArgs, RunArgs, TradesArgs,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: String,

    /// Path to buchfink.yaml
    #[arg(
        long,
        global = true,
        env = "BUCHFINK_CONFIG",
        default_value = "./buchfink.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a new data directory
    Init(InitArgs),
    #[command(flatten)]
    Workspace(WorkspaceCommand),
}

/// Commands that run against an existing data directory.
#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    /// List accounts
    List(ListArgs),
    /// Show balances across accounts
    Balances(BalancesArgs),
    /// Fetch trades, actions, balances and NFTs
    Fetch(FetchArgs),
    /// Fetch, then run an ad-hoc report
    Run(RunArgs),
    /// Show trades
    Trades(TradesArgs),
    /// Show ledger actions
    Actions(ActionsArgs),
    /// Run and render reports
    Report(ReportArgs),
    /// Show tax-free sellable amounts
    Allowances(AllowancesArgs),
    /// Quote asset prices
    Quote(QuoteArgs),
    /// Build the local daily price cache
    Cache(CacheArgs),
    /// Open an account in the block explorer
    Explore(ExploreArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Command::Init(args) => accounts::init(&args),
        Command::Workspace(command) => {
            let db = Buchfink::open(&cli.config)?;
            command.run(&db).await
        }
    }
}

impl WorkspaceCommand {
    async fn run(&self, db: &Buchfink) -> Result<ExitCode> {
        match self {
            WorkspaceCommand::List(args) => accounts::list(db, args),
            WorkspaceCommand::Balances(args) => balances::execute(db, args).await,
            WorkspaceCommand::Fetch(args) => fetch::execute(db, args).await,
            WorkspaceCommand::Run(args) => fetch::run(db, args).await,
            WorkspaceCommand::Trades(args) => history::trades(db, args).await,
            WorkspaceCommand::Actions(args) => history::actions(db, args).await,
            WorkspaceCommand::Report(args) => report::report(db, args).await,
            WorkspaceCommand::Allowances(args) => report::allowances(db, args).await,
            WorkspaceCommand::Quote(args) => prices::quote(db, args).await,
            WorkspaceCommand::Cache(args) => prices::cache(db, args).await,
            WorkspaceCommand::Explore(args) => accounts::explore(db, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_separate_from_workspace_commands() {
        let cli = Cli::try_parse_from(["buchfink", "init", "-d", "data"]).unwrap();
        assert!(matches!(cli.command, Command::Init(_)));

        let cli = Cli::try_parse_from(["buchfink", "list"]).unwrap();
        assert!(matches!(cli.command, Command::Workspace(WorkspaceCommand::List(_))));
    }
}
