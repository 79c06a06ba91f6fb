use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tabled::Tabled;
use tracing::{error, warn};

use super::{fmt_amount, fmt_value, print_table};
use crate::BalancesArgs;
use crate::db::Buchfink;
use crate::fetch::{Connectors, FetchLimits, fetch};
use crate::model::{Asset, Balance};
use crate::price::PriceOracle;

#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct BalanceRow {
    #[tabled(rename = "Asset")]
    pub asset: String,
    #[tabled(rename = "Amount")]
    pub amount: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Rows sorted by value, those below `minimum` folded into `Others`, and
/// a `Total` row. `rate` converts USD values into the display currency.
pub fn summarize(balances: &BTreeMap<Asset, Balance>, rate: Decimal, minimum: Decimal) -> Vec<BalanceRow> {
    let mut valued: Vec<(&Asset, &Balance, Decimal)> = balances
        .iter()
        .map(|(asset, balance)| (asset, balance, balance.usd_value * rate))
        .collect();
    valued.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));

    let mut rows = vec![];
    let mut others = Decimal::ZERO;
    let mut total = Decimal::ZERO;
    for (asset, balance, value) in valued {
        total += value;
        if value < minimum {
            others += value;
            continue;
        }
        rows.push(BalanceRow {
            asset: asset.clone(),
            amount: fmt_amount(balance.amount),
            value: fmt_value(value),
        });
    }
    if !others.is_zero() {
        rows.push(BalanceRow {
            asset: "Others".into(),
            amount: String::new(),
            value: fmt_value(others),
        });
    }
    rows.push(BalanceRow {
        asset: "Total".into(),
        amount: String::new(),
        value: fmt_value(total),
    });
    rows
}

pub async fn execute(db: &Buchfink, args: &BalancesArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, None)?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(db.inquirer()?);
    let mut code = ExitCode::SUCCESS;

    if args.fetch {
        let mut connectors = Connectors::live(db)?;
        connectors.oracle = oracle.clone();
        if fetch(db, accounts.clone(), FetchLimits::only_balances(), Arc::new(connectors)).await? {
            error!("Some balances could not be fetched");
            code = ExitCode::FAILURE;
        }
    }

    let mut assets: BTreeMap<Asset, Balance> = BTreeMap::new();
    let mut liabilities: BTreeMap<Asset, Balance> = BTreeMap::new();
    for account in &accounts {
        let sheet = db.get_balances(&account.name)?;
        for (asset, balance) in &sheet.assets {
            *assets.entry(asset.clone()).or_default() += balance;
        }
        for (asset, balance) in &sheet.liabilities {
            *liabilities.entry(asset.clone()).or_default() += balance;
        }
    }

    let currency = args
        .denominate
        .clone()
        .unwrap_or_else(|| db.get_main_currency().to_string());
    let rate = match oracle.current_price("USD", &currency).await {
        Ok(rate) => rate,
        Err(e) => {
            warn!("No USD/{} rate, showing USD values: {:#}", currency, e);
            Decimal::ONE
        }
    };
    let minimum = args.minimum;

    let asset_rows = summarize(&assets, rate, minimum);
    let liability_rows = summarize(&liabilities, rate, minimum);
    println!("Values in {currency}");
    if args.total {
        let total = |rows: &[BalanceRow]| rows.last().map(|r| r.value.clone()).unwrap_or_default();
        println!("Total assets: {} {}", total(&asset_rows), currency);
        if !liabilities.is_empty() {
            println!("Total liabilities: {} {}", total(&liability_rows), currency);
        }
        return Ok(code);
    }

    print_table(asset_rows);
    if !liabilities.is_empty() {
        println!("Liabilities");
        print_table(liability_rows);
    }
    Ok(code)
}
