pub mod account;
pub mod accounting;
pub mod asset;
pub mod chain;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod fetch;
pub mod http;
pub mod importers;
pub mod model;
pub mod price;
pub mod report;
pub mod serialization;
pub mod time;

use std::path::PathBuf;

use clap::Args;
use rust_decimal::Decimal;

use crate::account::{Account, AccountFilter, select_accounts};
use crate::db::Buchfink;

/// Which accounts a command operates on.
#[derive(Args, Debug, Clone, Default)]
pub struct AccountSelection {
    /// Only accounts whose name contains KEYWORD, or matches it when given as /regex/
    #[arg(short = 'k', long)]
    pub keyword: Option<String>,

    /// Skip accounts whose name contains EXCLUDE (or matches /regex/)
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    /// Use an external account instead of the configured ones
    /// (ethereum:<address>, bitcoin:<address> or a bare 0x address)
    #[arg(short = 'e', long = "external")]
    pub external: Vec<String>,
}

impl AccountSelection {
    pub fn filter(&self, account_type: Option<&str>) -> AccountFilter {
        AccountFilter {
            keyword: self.keyword.clone(),
            exclude: self.exclude.clone(),
            account_type: account_type.map(str::to_string),
        }
    }

    pub fn select(&self, db: &Buchfink, account_type: Option<&str>) -> anyhow::Result<Vec<Account>> {
        select_accounts(db.get_all_accounts()?, &self.external, &self.filter(account_type))
    }
}

/// Initialize a new data directory
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Directory to initialize
    #[arg(short = 'd', long, default_value = ".")]
    pub directory: PathBuf,
}

/// List accounts
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only accounts of this type (exchange, ethereum, bitcoin, manual, generic)
    #[arg(short = 't', long = "type")]
    pub account_type: Option<String>,

    /// Print only this field (name, address, account_type, tags) or a qrcode of the address
    #[arg(short = 'o', long)]
    pub output: Option<String>,
}

/// Show balances across accounts
#[derive(Args, Debug, Clone, Default)]
pub struct BalancesArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only print the totals
    #[arg(long)]
    pub total: bool,

    /// Denominate values in this asset instead of the main currency
    #[arg(short = 'd', long)]
    pub denominate: Option<String>,

    /// Fetch balances before printing
    #[arg(short = 'f', long)]
    pub fetch: bool,

    /// Group balances worth less than this into "Others"
    #[arg(short = 'm', long, default_value = "0")]
    pub minimum: Decimal,
}

/// Fetch trades, actions, balances and NFTs
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only accounts of this type
    #[arg(short = 't', long = "type")]
    pub account_type: Option<String>,

    /// Fetch ledger actions
    #[arg(long)]
    pub actions: bool,

    /// Fetch balances
    #[arg(long)]
    pub balances: bool,

    /// Fetch NFTs
    #[arg(long)]
    pub nfts: bool,

    /// Fetch trades
    #[arg(long)]
    pub trades: bool,
}

/// Fetch data, then run an ad-hoc report
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Report name
    #[arg(short = 'n', long, default_value = "adhoc")]
    pub name: String,

    /// Start of the period (inclusive)
    #[arg(short = 'f', long = "from")]
    pub from: String,

    /// End of the period (exclusive)
    #[arg(short = 't', long = "to")]
    pub to: String,

    /// Use an external account instead of the configured ones
    #[arg(short = 'e', long = "external")]
    pub external: Vec<String>,
}

/// Show trades
#[derive(Args, Debug, Clone, Default)]
pub struct TradesArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only trades involving this asset
    #[arg(short = 'a', long)]
    pub asset: Option<String>,

    /// Fetch trades first
    #[arg(short = 'f', long)]
    pub fetch: bool,
}

/// Show ledger actions
#[derive(Args, Debug, Clone, Default)]
pub struct ActionsArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only actions of this type
    #[arg(short = 't', long = "type")]
    pub action_type: Option<String>,

    /// Only actions of this asset
    #[arg(short = 'a', long)]
    pub asset: Option<String>,
}

/// Run and render the configured reports
#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    #[command(flatten)]
    pub selection: AccountSelection,

    /// Only reports whose name contains this keyword
    #[arg(short = 'r', long)]
    pub report: Option<String>,

    /// Only render templates of reports that were already run
    #[arg(long)]
    pub render_only: bool,

    /// Run ad-hoc reports for these calendar years instead
    #[arg(long)]
    pub year: Vec<i32>,
}

/// Show what can be sold tax-free right now
#[derive(Args, Debug, Clone, Default)]
pub struct AllowancesArgs {
    #[command(flatten)]
    pub selection: AccountSelection,
}

/// Quote asset prices: `ETH`, `100 ETH`, `ETH/BTC` or `2.5 ETH/BTC`
#[derive(Args, Debug, Clone, Default)]
pub struct QuoteArgs {
    /// Assets (or a short quote expression)
    #[arg(required = true, num_args = 1..)]
    pub assets: Vec<String>,

    /// Amount to quote
    #[arg(short = 'n', long)]
    pub amount: Option<Decimal>,

    /// Historical quote at this time
    #[arg(short = 't', long)]
    pub timestamp: Option<String>,

    /// Quote in this asset instead of the main currency
    #[arg(short = 'b', long)]
    pub base: Option<String>,
}

/// Build the local daily price cache
#[derive(Args, Debug, Clone, Default)]
pub struct CacheArgs {
    /// Assets to cache
    #[arg(required = true, num_args = 1..)]
    pub assets: Vec<String>,

    /// Price currency (default: main currency)
    #[arg(short = 'b', long)]
    pub base: Option<String>,

    /// First day to cache (default: 2011-01-01)
    #[arg(long = "from")]
    pub from: Option<String>,
}

/// Open the block explorer for an account
#[derive(Args, Debug, Clone, Default)]
pub struct ExploreArgs {
    #[command(flatten)]
    pub selection: AccountSelection,
}
