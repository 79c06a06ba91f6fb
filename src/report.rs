use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context, path_loader};
use serde::{Deserialize, Serialize};
use tracing::instrument::WithSubscriber;
use tracing::{Subscriber, info};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use crate::accounting::{Accountant, FifoAccountant, Overview, PnlEvent};
use crate::account::Account;
use crate::config::ReportConfig;
use crate::db::{Buchfink, write_atomic};
use crate::time::format_timestamp;

const REPORT_FILE: &str = "report.yaml";
const EVENTS_FILE: &str = "events.yaml";

/// Contents of `reports/<name>/report.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFile {
    pub overview: Overview,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EventsFile {
    #[serde(default)]
    events: Vec<PnlEvent>,
}

pub fn report_directory(db: &Buchfink, report: &ReportConfig) -> PathBuf {
    db.reports_directory().join(&report.name)
}

/// The bundled accountant, pricing through the workspace's oracle.
pub fn default_accountant(db: &Buchfink) -> Result<FifoAccountant> {
    Ok(FifoAccountant::new(
        &db.config.settings,
        db.assets.clone(),
        Arc::new(db.inquirer()?),
    ))
}

/// Console output plus `report.log` (debug) and `errors.log` (errors only)
/// for the duration of one report.
fn report_subscriber(directory: &Path) -> Result<impl Subscriber + Send + Sync + 'static> {
    let report_log = Arc::new(File::create(directory.join("report.log"))?);
    let errors_log = Arc::new(File::create(directory.join("errors.log"))?);
    let console_level = LevelFilter::current();

    Ok(tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(console_level))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(report_log)
                .with_filter(LevelFilter::DEBUG),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(errors_log)
                .with_filter(LevelFilter::ERROR),
        ))
}

/// Run the accountant over the accounts' local data for the report period
/// and write `report.yaml`, `events.yaml` and `events.csv`.
pub async fn run_report(
    db: &Buchfink,
    accounts: &[Account],
    report: &ReportConfig,
    accountant: &dyn Accountant,
) -> Result<Overview> {
    let directory = report_directory(db, report);
    fs::create_dir_all(&directory).with_context(|| format!("create {}", directory.display()))?;
    let subscriber = report_subscriber(&directory)?;

    generate(db, accounts, report, accountant, &directory)
        .with_subscriber(subscriber)
        .await
}

async fn generate(
    db: &Buchfink,
    accounts: &[Account],
    report: &ReportConfig,
    accountant: &dyn Accountant,
    directory: &Path,
) -> Result<Overview> {
    info!(
        "Generating report {} ({} to {})",
        report.name,
        format_timestamp(report.from_ts),
        format_timestamp(report.to_ts)
    );

    let mut trades = vec![];
    let mut actions = vec![];
    for account in accounts {
        trades.extend(db.get_local_trades_for_account(&account.name)?);
        actions.extend(db.get_local_ledger_actions_for_account(&account.name)?);
    }
    info!(
        "Collected {} trade(s) and {} action(s) from {} account(s)",
        trades.len(),
        actions.len(),
        accounts.len()
    );

    let result = accountant
        .process_history(report.from_ts, report.to_ts, &trades, &actions)
        .await?;

    write_events_csv(&directory.join("events.csv"), &result.events)?;
    write_atomic(
        &directory.join(EVENTS_FILE),
        &serde_yaml::to_string(&EventsFile {
            events: result.events.clone(),
        })?,
    )?;
    write_atomic(
        &directory.join(REPORT_FILE),
        &serde_yaml::to_string(&ReportFile {
            overview: result.overview.clone(),
        })?,
    )?;

    let totals = result.overview.pnl_totals;
    info!(
        "Report {}: free P/L {} {}, taxable P/L {} {}",
        report.name,
        totals.free,
        result.overview.main_currency,
        totals.taxable,
        result.overview.main_currency
    );
    Ok(result.overview)
}

fn write_events_csv(path: &Path, events: &[PnlEvent]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for event in events {
        wtr.serialize(event)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Previously computed overview of a report.
pub fn load_report(db: &Buchfink, report: &ReportConfig) -> Result<ReportFile> {
    let path = report_directory(db, report).join(REPORT_FILE);
    if !path.exists() {
        bail!("report {} has not been run yet ({} missing)", report.name, path.display());
    }
    let text = fs::read_to_string(&path)?;
    serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

fn load_events(directory: &Path) -> Result<Vec<PnlEvent>> {
    let path = directory.join(EVENTS_FILE);
    if !path.exists() {
        return Ok(vec![]);
    }
    let text = fs::read_to_string(&path)?;
    let file: Option<EventsFile> =
        serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(file.unwrap_or_default().events)
}

/// Render the report's template to `reports/<name>/report.html`.
pub fn render_report(db: &Buchfink, report: &ReportConfig) -> Result<PathBuf> {
    let Some(template) = &report.template else {
        bail!("report {} has no template", report.name);
    };
    let directory = report_directory(db, report);
    let ReportFile { overview } = load_report(db, report)?;
    let events = load_events(&directory)?;

    let template_path = db.data_directory.join(template);
    let template_dir = template_path.parent().unwrap_or(&db.data_directory).to_path_buf();
    let template_name = template_path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid template path {}", template_path.display()))?
        .to_string();

    let mut env = Environment::new();
    env.set_loader(path_loader(template_dir));
    let assets = db.assets.clone();
    env.add_function("asset_symbol", move |asset: String| -> String {
        assets.lookup_or_adhoc(&asset).symbol
    });

    let tmpl = env
        .get_template(&template_name)
        .with_context(|| format!("load template {}", template_path.display()))?;
    let html = tmpl
        .render(context! {
            name => &report.name,
            title => &report.title,
            overview => &overview,
            events => &events,
        })
        .with_context(|| format!("render template {}", template_path.display()))?;

    let out = directory.join("report.html");
    write_atomic(&out, &html)?;
    info!("Rendered {}", out.display());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::model::{ActionType, LedgerAction, Trade, TradeType};
    use crate::price::Inquirer;

    fn report(template: Option<&str>) -> ReportConfig {
        ReportConfig {
            name: "r2020".into(),
            title: Some("Taxes 2020".into()),
            from_ts: 1_577_836_800,
            to_ts: 1_609_459_200,
            template: template.map(str::to_string),
        }
    }

    fn setup() -> (tempfile::TempDir, Buchfink, Vec<Account>) {
        let dir = tempfile::tempdir().unwrap();
        let db = Buchfink::init(dir.path()).unwrap();
        let buy = Trade {
            timestamp: 1_580_000_000,
            location: "kraken".into(),
            base_asset: "BTC".into(),
            quote_asset: "EUR".into(),
            trade_type: TradeType::Buy,
            amount: dec!(1),
            rate: dec!(7000),
            fee: None,
            fee_currency: None,
            link: Some("T1".into()),
            notes: None,
        };
        let sell = Trade {
            timestamp: 1_590_000_000,
            trade_type: TradeType::Sell,
            rate: dec!(9000),
            link: Some("T2".into()),
            ..buy.clone()
        };
        db.write_trades("example", &[buy, sell]).unwrap();
        let accounts = db.get_all_accounts().unwrap();
        (dir, db, accounts)
    }

    #[tokio::test]
    async fn run_writes_report_files_and_render_uses_them() {
        let (_dir, db, accounts) = setup();
        let report = report(Some("report.html"));
        let accountant = default_accountant(&db).unwrap();

        let overview = run_report(&db, &accounts, &report, &accountant).await.unwrap();
        assert_eq!(overview.pnl["trade"].taxable, dec!(2000));

        let directory = report_directory(&db, &report);
        for file in ["report.yaml", "events.yaml", "events.csv", "report.log", "errors.log"] {
            assert!(directory.join(file).exists(), "{file} missing");
        }
        assert_eq!(load_report(&db, &report).unwrap().overview, overview);
        assert_eq!(load_events(&directory).unwrap().len(), 2);

        let html = fs::read_to_string(render_report(&db, &report).unwrap()).unwrap();
        assert!(html.contains("Taxes 2020"));
        assert!(html.contains("2000"));
    }

    #[tokio::test]
    async fn report_logs_capture_debug_and_errors() {
        let (_dir, db, accounts) = setup();
        let income = LedgerAction {
            timestamp: 1_585_000_000,
            action_type: ActionType::Income,
            location: "external".into(),
            amount: dec!(5),
            asset: "DOGE".into(),
            rate: None,
            rate_asset: None,
            link: None,
            notes: None,
        };
        db.write_actions("example", &[income]).unwrap();
        // no provider: DOGE has no price
        let oracle = Inquirer::new(db.manual_prices(), db.price_cache(), None, db.assets.clone());
        let accountant = FifoAccountant::new(&db.config.settings, db.assets.clone(), Arc::new(oracle));
        let report = report(None);

        run_report(&db, &accounts, &report, &accountant).await.unwrap();

        let directory = report_directory(&db, &report);
        let report_log = fs::read_to_string(directory.join("report.log")).unwrap();
        let errors_log = fs::read_to_string(directory.join("errors.log")).unwrap();
        assert!(report_log.contains("Generating report r2020"), "{report_log}");
        assert!(report_log.contains("DEBUG"), "{report_log}");
        assert!(report_log.contains("buy 1 BTC kraken"), "{report_log}");
        assert!(report_log.contains("Cannot value 5 DOGE"), "{report_log}");
        assert!(errors_log.contains("Cannot value 5 DOGE"), "{errors_log}");
        assert!(!errors_log.contains("Generating report"), "{errors_log}");
        assert!(!errors_log.contains("DEBUG"), "{errors_log}");
    }

    #[test]
    fn render_requires_template_and_previous_run() {
        let (_dir, db, _) = setup();
        assert!(render_report(&db, &report(None)).is_err());
        assert!(render_report(&db, &report(Some("report.html"))).is_err());
    }
}
