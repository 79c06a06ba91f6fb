use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tracing::error;

use super::report::print_overviews;
use crate::account::{AccountFilter, select_accounts};
use crate::config::ReportConfig;
use crate::db::Buchfink;
use crate::fetch::{Connectors, FetchLimits, fetch};
use crate::report::{default_accountant, run_report};
use crate::time::parse_timestamp;
use crate::{FetchArgs, RunArgs};

pub async fn execute(db: &Buchfink, args: &FetchArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, args.account_type.as_deref())?;
    let limits = FetchLimits {
        actions: args.actions,
        balances: args.balances,
        trades: args.trades,
        nfts: args.nfts,
    };
    let failed = fetch(db, accounts, limits, Arc::new(Connectors::live(db)?)).await?;
    if failed {
        error!("Some accounts could not be fetched");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Fetch everything for the accounts, then report on them.
pub async fn run(db: &Buchfink, args: &RunArgs) -> Result<ExitCode> {
    let report = ReportConfig {
        name: args.name.clone(),
        title: None,
        from_ts: parse_timestamp(&args.from)?,
        to_ts: parse_timestamp(&args.to)?,
        template: None,
    };
    let accounts = select_accounts(db.get_all_accounts()?, &args.external, &AccountFilter::default())?;

    let failed = fetch(db, accounts.clone(), FetchLimits::all(), Arc::new(Connectors::live(db)?)).await?;
    if failed {
        error!("Some accounts could not be fetched, the report may be incomplete");
    }

    let accountant = default_accountant(db)?;
    let overview = run_report(db, &accounts, &report, &accountant).await?;
    print_overviews(&[(report.name.clone(), overview)]);

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
