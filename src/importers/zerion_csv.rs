use std::{fs::File, io::Read, path::Path};

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::account::Account;
use crate::asset::{AssetRegistry, ERC20_PREFIX};
use crate::db::Buchfink;
use crate::error::BuchfinkError;
use crate::model::{Trade, TradeType};
use crate::time::parse_timestamp;

/// One row of a Zerion transaction history export.
#[derive(Debug, Deserialize)]
struct ZerionRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Transaction Type")]
    transaction_type: String,
    #[serde(rename = "Application", default)]
    application: String,
    #[serde(rename = "Buy Amount", default)]
    buy_amount: Option<Decimal>,
    #[serde(rename = "Buy Currency", default)]
    buy_currency: String,
    #[serde(rename = "Buy Currency Address", default)]
    buy_currency_address: String,
    #[serde(rename = "Sell Amount", default)]
    sell_amount: Option<Decimal>,
    #[serde(rename = "Sell Currency", default)]
    sell_currency: String,
    #[serde(rename = "Sell Currency Address", default)]
    sell_currency_address: String,
    #[serde(rename = "Fee Amount", default)]
    fee_amount: Option<Decimal>,
    #[serde(rename = "Fee Currency", default)]
    fee_currency: String,
    #[serde(rename = "Tx Hash", default)]
    tx_hash: String,
}

impl ZerionRow {
    fn is_uniswap_trade(&self) -> bool {
        self.status == "Confirmed"
            && self.transaction_type == "Trade"
            && self.application == "Uniswap"
    }
}

fn resolve(assets: &AssetRegistry, symbol: &str, address: &str) -> Result<String, BuchfinkError> {
    let key = if address.is_empty() {
        symbol.to_string()
    } else {
        format!("{ERC20_PREFIX}{address}")
    };
    assets.get_asset_by_symbol(&key).map(|a| a.symbol.clone())
}

fn row_to_trade(row: &ZerionRow, assets: &AssetRegistry) -> Result<Option<Trade>> {
    let base_asset = resolve(assets, &row.buy_currency, &row.buy_currency_address);
    let quote_asset = resolve(assets, &row.sell_currency, &row.sell_currency_address);
    let fee_currency = match row.fee_currency.as_str() {
        "" => Ok(None),
        symbol => resolve(assets, symbol, "").map(Some),
    };
    let (base_asset, quote_asset, fee_currency) = match (base_asset, quote_asset, fee_currency) {
        (Ok(b), Ok(q), Ok(f)) => (b, q, f),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            warn!("Ignoring unknown asset {} in {}", e, row.tx_hash);
            return Ok(None);
        }
    };

    let (Some(amount), Some(sell_amount)) = (row.buy_amount, row.sell_amount) else {
        warn!("Ignoring trade {} without amounts", row.tx_hash);
        return Ok(None);
    };
    if amount.is_zero() {
        return Err(BuchfinkError::InvalidAmount(format!("zero buy amount in {}", row.tx_hash)).into());
    }

    Ok(Some(Trade {
        timestamp: parse_timestamp(&row.timestamp)?,
        location: row.application.to_lowercase(),
        base_asset,
        quote_asset,
        trade_type: TradeType::Buy,
        amount,
        rate: sell_amount / amount,
        fee: fee_currency.as_ref().and(row.fee_amount),
        fee_currency,
        link: (!row.tx_hash.is_empty()).then(|| row.tx_hash.clone()),
        notes: None,
    }))
}

/// Uniswap trades from a Zerion CSV export, oldest first.
pub fn read_trades<R: Read>(reader: R, assets: &AssetRegistry) -> Result<Vec<Trade>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut rows = Vec::new();
    for record in rdr.deserialize::<ZerionRow>() {
        let row = record?;
        if row.is_uniswap_trade() {
            rows.push(row);
        }
    }
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut trades = Vec::new();
    for row in &rows {
        if let Some(trade) = row_to_trade(row, assets)? {
            trades.push(trade);
        }
    }
    debug!("zerion: {} of {} trade row(s) imported", trades.len(), rows.len());
    Ok(trades)
}

pub fn read_trades_from_path(path: &Path, assets: &AssetRegistry) -> Result<Vec<Trade>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    read_trades(file, assets).with_context(|| format!("read {}", path.display()))
}

/// Trades from `zerion/<account>.csv`; no export means no trades.
pub fn get_trades(db: &Buchfink, account: &Account) -> Result<Vec<Trade>> {
    let path = db.zerion_directory().join(format!("{}.csv", account.name));
    read_trades_from_path(&path, &db.assets)
}
