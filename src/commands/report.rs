use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tabled::Tabled;
use tracing::warn;

use super::{fmt_amount, fmt_value, print_table};
use crate::account::NamePattern;
use crate::accounting::{Allowance, FifoAccountant, Overview};
use crate::config::ReportConfig;
use crate::db::Buchfink;
use crate::price::PriceOracle;
use crate::report::{default_accountant, load_report, render_report, run_report};
use crate::time::{now, year_start};
use crate::{AllowancesArgs, ReportArgs};

#[derive(Debug, Tabled)]
struct OverviewRow {
    #[tabled(rename = "Report")]
    report: String,
    #[tabled(rename = "Free P/L")]
    free: String,
    #[tabled(rename = "Taxable P/L")]
    taxable: String,
}

pub fn print_overviews(overviews: &[(String, Overview)]) {
    print_table(overviews.iter().map(|(name, overview)| OverviewRow {
        report: name.clone(),
        free: format!("{} {}", fmt_value(overview.pnl_totals.free), overview.main_currency),
        taxable: format!("{} {}", fmt_value(overview.pnl_totals.taxable), overview.main_currency),
    }));
}

/// Calendar year reports named after the year.
pub fn yearly_reports(years: &[i32]) -> Result<Vec<ReportConfig>> {
    years
        .iter()
        .map(|&year| {
            Ok(ReportConfig {
                name: year.to_string(),
                title: Some(format!("Report {year}")),
                from_ts: year_start(year)?,
                to_ts: year_start(year + 1)?,
                template: None,
            })
        })
        .collect()
}

fn select_reports(db: &Buchfink, args: &ReportArgs) -> Result<Vec<ReportConfig>> {
    if !args.year.is_empty() {
        return yearly_reports(&args.year);
    }
    let pattern = args.report.as_deref().map(NamePattern::parse).transpose()?;
    Ok(db
        .get_all_reports()
        .into_iter()
        .filter(|r| pattern.as_ref().is_none_or(|p| p.matches(&r.name)))
        .collect())
}

pub async fn report(db: &Buchfink, args: &ReportArgs) -> Result<ExitCode> {
    let reports = select_reports(db, args)?;
    if reports.is_empty() {
        warn!("No reports selected");
        return Ok(ExitCode::SUCCESS);
    }
    let accounts = args.selection.select(db, None)?;
    let accountant = default_accountant(db)?;

    let mut overviews = vec![];
    for report in &reports {
        let overview = if args.render_only {
            load_report(db, report)?.overview
        } else {
            run_report(db, &accounts, report, &accountant).await?
        };
        if report.template.is_some() {
            render_report(db, report)?;
        }
        overviews.push((report.name.clone(), overview));
    }
    print_overviews(&overviews);
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Tabled)]
struct AllowanceRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Tax-free amount")]
    amount: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Current price")]
    price: String,
    #[tabled(rename = "Avg buy price")]
    avg_buy_price: String,
}

pub async fn allowances(db: &Buchfink, args: &AllowancesArgs) -> Result<ExitCode> {
    let accounts = args.selection.select(db, None)?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(db.inquirer()?);
    let accountant = FifoAccountant::new(&db.config.settings, db.assets.clone(), oracle.clone());
    let currency = db.get_main_currency().to_string();

    let mut trades = vec![];
    let mut actions = vec![];
    for account in &accounts {
        trades.extend(db.get_local_trades_for_account(&account.name)?);
        actions.extend(db.get_local_ledger_actions_for_account(&account.name)?);
    }

    let mut rows = vec![];
    let mut total = Decimal::ZERO;
    for Allowance {
        asset,
        amount,
        avg_buy_price,
    } in accountant.allowances(&trades, &actions, now()).await?
    {
        let price = match oracle.current_price(&asset, &currency).await {
            Ok(price) => price,
            Err(e) => {
                warn!("No current price for {}: {:#}", asset, e);
                Decimal::ZERO
            }
        };
        let value = amount * price;
        total += value;
        rows.push(AllowanceRow {
            asset,
            amount: fmt_amount(amount),
            value: fmt_value(value),
            price: fmt_value(price),
            avg_buy_price: fmt_value(avg_buy_price),
        });
    }
    rows.push(AllowanceRow {
        asset: "Total".into(),
        amount: String::new(),
        value: fmt_value(total),
        price: String::new(),
        avg_buy_price: String::new(),
    });
    println!("Values in {currency}");
    print_table(rows);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_timestamp;

    #[test]
    fn yearly_reports_span_calendar_years() {
        let reports = yearly_reports(&[2019, 2020]).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "2019");
        assert_eq!(reports[0].from_ts, parse_timestamp("2019-01-01").unwrap());
        assert_eq!(reports[0].to_ts, parse_timestamp("2020-01-01").unwrap());
        assert_eq!(reports[1].to_ts, parse_timestamp("2021-01-01").unwrap());
        assert!(reports.iter().all(|r| r.template.is_none()));
    }
}
