//! YAML snapshot formats for trades, ledger actions and balances.
//!
//! Trades and actions are written in a compact, hand-editable form:
//!
//! ```yaml
//! trades:
//! - buy: 1 BTC
//!   for: 5000 EUR
//!   timestamp: '2017-01-01 00:00:00'
//! actions:
//! - income: 0.5 ETH
//!   timestamp: '2020-06-01 12:00:00'
//! ```

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::BuchfinkError;
use crate::model::{ActionType, AssetAmount, BalanceSheet, LedgerAction, Nft, Trade, TradeType};
use crate::time::{Timestamp, format_timestamp, parse_timestamp};

/// Location assigned to hand-written entries that do not name one.
pub const DEFAULT_LOCATION: &str = "external";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampRepr {
    Unix(i64),
    Text(String),
}

impl TimestampRepr {
    fn resolve(&self) -> Result<Timestamp> {
        match self {
            TimestampRepr::Unix(ts) => Ok(*ts),
            TimestampRepr::Text(s) => parse_timestamp(s),
        }
    }
}

/// Fields are declared alphabetically so the written YAML has sorted keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
    #[serde(rename = "for")]
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell: Option<String>,
    pub timestamp: TimestampRepr,
}

/// One action: the action type is the key holding the amount, so entries
/// stay free-form maps.
pub type ActionEntry = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<TradeEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalancesFile {
    #[serde(flatten)]
    pub sheet: BalanceSheet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfts: Option<Vec<Nft>>,
}

pub fn serialize_trade(trade: &Trade) -> TradeEntry {
    let base = AssetAmount {
        amount: trade.amount,
        asset: trade.base_asset.clone(),
    }
    .to_string();
    let quote = AssetAmount {
        amount: trade.quote_amount(),
        asset: trade.quote_asset.clone(),
    }
    .to_string();
    let fee = match (trade.fee, &trade.fee_currency) {
        (Some(fee), Some(currency)) if !fee.is_zero() => Some(
            AssetAmount {
                amount: fee,
                asset: currency.clone(),
            }
            .to_string(),
        ),
        _ => None,
    };
    let (buy, sell) = match trade.trade_type {
        TradeType::Buy => (Some(base), None),
        TradeType::Sell => (None, Some(base)),
    };
    TradeEntry {
        buy,
        fee,
        quote,
        link: trade.link.clone(),
        location: Some(trade.location.clone()),
        notes: trade.notes.clone(),
        sell,
        timestamp: TimestampRepr::Text(format_timestamp(trade.timestamp)),
    }
}

pub fn serialize_trades(trades: &[Trade]) -> Vec<TradeEntry> {
    trades.iter().map(serialize_trade).collect()
}

pub fn deserialize_trade(entry: &TradeEntry) -> Result<Trade> {
    let (trade_type, base) = match (&entry.buy, &entry.sell) {
        (Some(buy), None) => (TradeType::Buy, buy),
        (None, Some(sell)) => (TradeType::Sell, sell),
        _ => bail!("trade needs exactly one of 'buy' or 'sell'"),
    };
    let base: AssetAmount = base.parse()?;
    let quote: AssetAmount = entry.quote.parse()?;
    if base.amount.is_zero() {
        return Err(BuchfinkError::InvalidAmount(entry.quote.clone()).into());
    }
    let fee = entry
        .fee
        .as_deref()
        .map(str::parse::<AssetAmount>)
        .transpose()?;

    Ok(Trade {
        timestamp: entry.timestamp.resolve()?,
        location: entry
            .location
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        rate: quote.amount / base.amount,
        amount: base.amount,
        base_asset: base.asset,
        quote_asset: quote.asset,
        trade_type,
        fee: fee.as_ref().map(|f| f.amount),
        fee_currency: fee.map(|f| f.asset),
        link: entry.link.clone(),
        notes: entry.notes.clone(),
    })
}

pub fn serialize_action(action: &LedgerAction) -> ActionEntry {
    let mut entry = ActionEntry::new();
    entry.insert(
        action.action_type.as_str().to_string(),
        Value::String(
            AssetAmount {
                amount: action.amount,
                asset: action.asset.clone(),
            }
            .to_string(),
        ),
    );
    entry.insert(
        "timestamp".into(),
        Value::String(format_timestamp(action.timestamp)),
    );
    entry.insert("location".into(), Value::String(action.location.clone()));
    if let (Some(rate), Some(rate_asset)) = (action.rate, &action.rate_asset) {
        entry.insert(
            "rate".into(),
            Value::String(
                AssetAmount {
                    amount: rate,
                    asset: rate_asset.clone(),
                }
                .to_string(),
            ),
        );
    }
    if let Some(link) = &action.link {
        entry.insert("link".into(), Value::String(link.clone()));
    }
    if let Some(notes) = &action.notes {
        entry.insert("notes".into(), Value::String(notes.clone()));
    }
    entry
}

pub fn serialize_actions(actions: &[LedgerAction]) -> Vec<ActionEntry> {
    actions.iter().map(serialize_action).collect()
}

fn string_field(entry: &ActionEntry, key: &str) -> Result<Option<String>> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => bail!("field '{key}' must be a string, got {other:?}"),
    }
}

pub fn deserialize_action(entry: &ActionEntry) -> Result<LedgerAction> {
    let mut found = entry
        .keys()
        .filter_map(|key| key.parse::<ActionType>().ok().map(|t| (key, t)));
    let (key, action_type) = match (found.next(), found.next()) {
        (Some(one), None) => one,
        (None, _) => bail!("action has no type key (one of income, expense, loss, ...)"),
        (Some(_), Some(_)) => bail!("action has more than one type key"),
    };
    let amount: AssetAmount = string_field(entry, key)?
        .context("action amount missing")?
        .parse()?;
    let timestamp = match entry.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .with_context(|| format!("invalid timestamp {n}"))?,
        Some(Value::String(s)) => parse_timestamp(s)?,
        _ => bail!("action timestamp missing"),
    };
    let rate = string_field(entry, "rate")?
        .map(|r| r.parse::<AssetAmount>())
        .transpose()?;

    Ok(LedgerAction {
        timestamp,
        action_type,
        location: string_field(entry, "location")?
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
        amount: amount.amount,
        asset: amount.asset,
        rate: rate.as_ref().map(|r| r.amount),
        rate_asset: rate.map(|r| r.asset),
        link: string_field(entry, "link")?,
        notes: string_field(entry, "notes")?,
    })
}

pub fn parse_snapshot(text: &str) -> Result<(Vec<Trade>, Vec<LedgerAction>)> {
    // An empty file parses as YAML null.
    let snapshot: Option<Snapshot> = serde_yaml::from_str(text)?;
    let snapshot = snapshot.unwrap_or_default();
    let trades = snapshot
        .trades
        .iter()
        .enumerate()
        .map(|(i, e)| deserialize_trade(e).with_context(|| format!("trade #{}", i + 1)))
        .collect::<Result<Vec<_>>>()?;
    let actions = snapshot
        .actions
        .iter()
        .enumerate()
        .map(|(i, e)| deserialize_action(e).with_context(|| format!("action #{}", i + 1)))
        .collect::<Result<Vec<_>>>()?;
    Ok((trades, actions))
}

pub fn trades_to_yaml(trades: &[Trade]) -> Result<String> {
    Ok(serde_yaml::to_string(&Snapshot {
        trades: serialize_trades(trades),
        ..Default::default()
    })?)
}

pub fn actions_to_yaml(actions: &[LedgerAction]) -> Result<String> {
    Ok(serde_yaml::to_string(&Snapshot {
        actions: serialize_actions(actions),
        ..Default::default()
    })?)
}

/// Serde adapter writing timestamps as `YYYY-MM-DD HH:MM:SS` and reading
/// any format `parse_timestamp` understands.
pub mod formatted_timestamp {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TimestampRepr;
    use crate::time::{Timestamp, format_timestamp};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        TimestampRepr::deserialize(deserializer)?
            .resolve()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    const SNAPSHOT: &str = r#"
trades:
- buy: 1 BTC
  for: 5000 EUR
  timestamp: 2017-01-01
  link: T1
  location: kraken
- sell: 0.5 BTC
  for: 10000 EUR
  fee: 5 EUR
  timestamp: '2017-12-01 10:00:00'
actions:
- income: 0.25 ETH
  timestamp: 1577836800
  notes: staking
- airdrop: 400 UNI
  timestamp: '2020-09-17'
"#;

    #[test]
    fn parses_hand_written_snapshot() {
        let (trades, actions) = parse_snapshot(SNAPSHOT).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(actions.len(), 2);

        let buy = &trades[0];
        assert_eq!(buy.trade_type, TradeType::Buy);
        assert_eq!(buy.rate, Decimal::from(5000));
        assert_eq!(buy.location, "kraken");
        assert_eq!(buy.link.as_deref(), Some("T1"));

        let sell = &trades[1];
        assert_eq!(sell.trade_type, TradeType::Sell);
        assert_eq!(sell.rate, Decimal::from(20000));
        assert_eq!(sell.fee, Some(Decimal::from(5)));
        assert_eq!(sell.fee_currency.as_deref(), Some("EUR"));
        assert_eq!(sell.location, DEFAULT_LOCATION);

        assert_eq!(actions[0].action_type, ActionType::Income);
        assert_eq!(actions[0].timestamp, 1_577_836_800);
        assert_eq!(actions[0].notes.as_deref(), Some("staking"));
        assert_eq!(actions[1].action_type, ActionType::Airdrop);
        assert_eq!(actions[1].asset, "UNI");
    }

    #[test]
    fn written_trades_have_sorted_keys() {
        let (trades, _) = parse_snapshot(SNAPSHOT).unwrap();
        let yaml = trades_to_yaml(&trades[1..]).unwrap();
        let keys: Vec<&str> = yaml
            .lines()
            .skip(1)
            .map(|l| l.trim_start_matches(['-', ' ']))
            .filter_map(|l| l.split(':').next())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(yaml.contains("sell: 0.5 BTC"));
        assert!(yaml.contains("for: 10000 EUR"));
    }

    #[test]
    fn written_snapshot_reads_back() {
        let (trades, actions) = parse_snapshot(SNAPSHOT).unwrap();
        let (again, _) = parse_snapshot(&trades_to_yaml(&trades).unwrap()).unwrap();
        assert_eq!(again, trades);
        let (_, again) = parse_snapshot(&actions_to_yaml(&actions).unwrap()).unwrap();
        assert_eq!(again[0].amount, actions[0].amount);
        assert_eq!(again[1].location, DEFAULT_LOCATION);
    }

    #[test]
    fn inexact_rates_write_back_the_quote_amount() {
        let text = "trades:\n- buy: 3 BTC\n  for: 1 EUR\n  timestamp: 0\n- sell: 7 ETH\n  for: 10 DAI\n  timestamp: 1\n";
        let (trades, _) = parse_snapshot(text).unwrap();
        let yaml = trades_to_yaml(&trades).unwrap();
        assert!(yaml.contains("for: 1 EUR"), "{yaml}");
        assert!(yaml.contains("for: 10 DAI"), "{yaml}");

        let (again, _) = parse_snapshot(&yaml).unwrap();
        assert_eq!(again, trades);
        assert_eq!(trades_to_yaml(&again).unwrap(), yaml);
    }

    #[test]
    fn rejects_ambiguous_entries() {
        let err = parse_snapshot("trades:\n- buy: 1 BTC\n  sell: 1 BTC\n  for: 1 EUR\n  timestamp: 0\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("exactly one"));

        let err = parse_snapshot("actions:\n- income: 1 ETH\n  gift: 1 ETH\n  timestamp: 0\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("more than one"));
    }

    #[test]
    fn empty_file_is_empty_snapshot() {
        let (trades, actions) = parse_snapshot("").unwrap();
        assert!(trades.is_empty() && actions.is_empty());
    }
}
