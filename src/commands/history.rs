use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tabled::Tabled;
use tracing::{debug, error};

use super::{fmt_amount, fmt_value, print_table};
use crate::db::Buchfink;
use crate::fetch::{Connectors, FetchLimits, fetch};
use crate::model::{ActionType, LedgerAction, Trade};
use crate::price::PriceOracle;
use crate::time::format_timestamp;
use crate::{ActionsArgs, TradesArgs};

#[derive(Debug, Tabled)]
struct TradeRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    trade_type: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Base")]
    base: String,
    #[tabled(rename = "Quote amount")]
    quote_amount: String,
    #[tabled(rename = "Quote")]
    quote: String,
    #[tabled(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Account")]
    account: String,
}

impl TradeRow {
    fn new(account: &str, trade: &Trade) -> Self {
        TradeRow {
            time: format_timestamp(trade.timestamp),
            trade_type: trade.trade_type.to_string(),
            amount: fmt_amount(trade.amount),
            base: trade.base_asset.clone(),
            quote_amount: fmt_amount(trade.quote_amount()),
            quote: trade.quote_asset.clone(),
            rate: fmt_amount(trade.rate),
            account: account.to_string(),
        }
    }
}

#[derive(Debug, Tabled)]
struct ActionRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    action_type: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Account")]
    account: String,
}

pub async fn trades(db: &Buchfink, args: &TradesArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, None)?;
    let mut code = ExitCode::SUCCESS;
    if args.fetch
        && fetch(db, accounts.clone(), FetchLimits::only_trades(), Arc::new(Connectors::live(db)?)).await?
    {
        error!("Some trades could not be fetched");
        code = ExitCode::FAILURE;
    }

    let mut trades: Vec<(String, Trade)> = vec![];
    for account in &accounts {
        for trade in db.get_local_trades_for_account(&account.name)? {
            if args.asset.as_deref().is_none_or(|asset| trade.involves(asset)) {
                trades.push((account.name.clone(), trade));
            }
        }
    }
    trades.sort_by_key(|(_, t)| t.timestamp);

    print_table(trades.iter().map(|(account, trade)| TradeRow::new(account, trade)));
    Ok(code)
}

/// Only actions of `action_type` and `asset`, when given.
pub fn filter_actions(
    actions: Vec<LedgerAction>,
    action_type: Option<ActionType>,
    asset: Option<&str>,
) -> Vec<LedgerAction> {
    actions
        .into_iter()
        .filter(|a| action_type.is_none_or(|t| a.action_type == t))
        .filter(|a| asset.is_none_or(|s| a.asset.eq_ignore_ascii_case(s)))
        .collect()
}

pub async fn actions(db: &Buchfink, args: &ActionsArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, None)?;
    let action_type = args
        .action_type
        .as_deref()
        .map(str::parse::<ActionType>)
        .transpose()?;
    let oracle = db.inquirer()?;
    let currency = db.get_main_currency().to_string();

    let mut actions: Vec<(String, LedgerAction)> = vec![];
    for account in &accounts {
        let own = db.get_local_ledger_actions_for_account(&account.name)?;
        for action in filter_actions(own, action_type, args.asset.as_deref()) {
            actions.push((account.name.clone(), action));
        }
    }
    actions.sort_by_key(|(_, a)| a.timestamp);

    let mut rows = vec![];
    for (account, action) in &actions {
        let value = match oracle
            .historical_price(&action.asset, &currency, action.timestamp)
            .await
        {
            Ok(price) => price * action.amount,
            Err(e) => {
                debug!("No price for {}: {:#}", action, e);
                Decimal::ZERO
            }
        };
        rows.push(ActionRow {
            time: format_timestamp(action.timestamp),
            action_type: action.action_type.to_string(),
            amount: fmt_amount(action.amount),
            asset: action.asset.clone(),
            value: format!("{} {}", fmt_value(value), currency),
            account: account.clone(),
        });
    }
    print_table(rows);
    Ok(ExitCode::SUCCESS)
}
