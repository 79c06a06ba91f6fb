use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use buchfink::account::Account;
use buchfink::accounting::{FifoAccountant, Overview};
use buchfink::config::ReportConfig;
use buchfink::db::Buchfink;
use buchfink::price::Inquirer;
use buchfink::report::{load_report, render_report, run_report};
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

fn manifest_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

/// A scratch copy of `tests/scenarios/<name>`.
fn scenario(name: &str) -> (TempDir, Buchfink) {
    let dir = tempfile::tempdir().unwrap();
    copy_dir(&manifest_path(&format!("tests/scenarios/{name}")), dir.path());
    let db = Buchfink::open(dir.path().join("buchfink.yaml")).unwrap();
    (dir, db)
}

/// Prices from the config and the (empty) cache only, no network.
fn offline_accountant(db: &Buchfink) -> FifoAccountant {
    let oracle = Inquirer::new(db.manual_prices(), db.price_cache(), None, db.assets.clone());
    FifoAccountant::new(&db.config.settings, db.assets.clone(), Arc::new(oracle))
}

async fn report_for(db: &Buchfink, account: &str, template: &ReportConfig) -> Overview {
    let accounts: Vec<Account> = vec![db.get_account(account).unwrap()];
    let report = ReportConfig {
        name: format!("{}-{}", template.name, account),
        ..template.clone()
    };
    run_report(db, &accounts, &report, &offline_accountant(db))
        .await
        .unwrap()
}

#[tokio::test]
async fn bullrun_short_holding_is_taxable() {
    let (_dir, db) = scenario("bullrun");
    let report = db.get_all_reports()[0].clone();

    let overview = report_for(&db, "exchange1", &report).await;
    assert_eq!(overview.main_currency, "EUR");
    assert_eq!(overview.pnl_totals.taxable, dec!(15000));
    assert_eq!(overview.pnl_totals.free, dec!(0));
    assert_eq!(overview.pnl["trade"].taxable, dec!(15000));
}

#[tokio::test]
async fn bullrun_long_holding_is_free() {
    let (_dir, db) = scenario("bullrun");
    let report = db.get_all_reports()[0].clone();

    let overview = report_for(&db, "exchange2", &report).await;
    assert_eq!(overview.pnl_totals.free, dec!(7000));
    assert_eq!(overview.pnl_totals.taxable, dec!(0));
}

#[tokio::test]
async fn bullrun_report_is_written_and_rendered() {
    let (dir, db) = scenario("bullrun");
    fs::copy(
        manifest_path("src/data/init/report.html"),
        dir.path().join("report.html"),
    )
    .unwrap();
    let report = db.get_all_reports()[0].clone();
    let accounts = db.get_all_accounts().unwrap();

    let overview = run_report(&db, &accounts, &report, &offline_accountant(&db))
        .await
        .unwrap();
    assert_eq!(overview.pnl_totals.free, dec!(7000));
    assert_eq!(overview.pnl_totals.taxable, dec!(15000));

    let report_dir = dir.path().join("reports").join(&report.name);
    for file in ["report.yaml", "events.yaml", "events.csv", "report.log", "errors.log"] {
        assert!(report_dir.join(file).exists(), "{file} missing");
    }
    assert_eq!(load_report(&db, &report).unwrap().overview, overview);

    let html = fs::read_to_string(render_report(&db, &report).unwrap()).unwrap();
    assert!(html.contains("Bull run 2017"));
    assert!(html.contains("15000"));
}

#[tokio::test]
async fn ledger_actions_income_then_sale() {
    let (_dir, db) = scenario("ledger_actions");
    let report = db.get_all_reports()[0].clone();

    // Income valued at 100, sold for 200 within the year.
    let overview = report_for(&db, "acc_income", &report).await;
    assert_eq!(overview.pnl["ledger action"].taxable, dec!(100));
    assert_eq!(overview.pnl["trade"].taxable, dec!(100));
    assert_eq!(overview.pnl_totals.taxable, dec!(200));
    assert_eq!(overview.pnl_totals.free, dec!(0));
}

#[tokio::test]
async fn ledger_actions_airdrop_is_taxable() {
    let (_dir, db) = scenario("ledger_actions");
    let report = db.get_all_reports()[0].clone();

    let overview = report_for(&db, "acc_airdrop", &report).await;
    assert_eq!(overview.pnl["ledger action"].taxable, dec!(1000));
    assert_eq!(overview.pnl_totals.taxable, dec!(1000));
    assert_eq!(overview.pnl_totals.free, dec!(0));
}

#[tokio::test]
async fn ledger_actions_gift_is_free_but_gain_is_not() {
    let (_dir, db) = scenario("ledger_actions");
    let report = db.get_all_reports()[0].clone();

    let overview = report_for(&db, "acc_gift", &report).await;
    assert_eq!(overview.pnl["ledger action"].free, dec!(400));
    assert_eq!(overview.pnl["trade"].taxable, dec!(200));
    assert_eq!(overview.pnl_totals.free, dec!(400));
    assert_eq!(overview.pnl_totals.taxable, dec!(200));
}
