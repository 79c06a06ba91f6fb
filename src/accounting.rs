//! Profit and loss over a trade and ledger action history.
//!
//! The engine replays every event in time order, keeping first-in first-out
//! lots per asset. Lots are valued in the main currency at acquisition; a
//! disposal consumes the oldest lots first and each consumed slice counts as
//! tax-free once it was held for `taxfree_after_period` seconds.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::asset::AssetRegistry;
use crate::config::Settings;
use crate::model::{ActionType, Asset, LedgerAction, Trade, TradeType};
use crate::price::PriceOracle;
use crate::serialization::formatted_timestamp;
use crate::time::Timestamp;

pub const CATEGORY_TRADE: &str = "trade";
pub const CATEGORY_FEE: &str = "fee";
pub const CATEGORY_LEDGER_ACTION: &str = "ledger action";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pnl {
    pub free: Decimal,
    pub taxable: Decimal,
}

impl Pnl {
    pub fn total(&self) -> Decimal {
        self.free + self.taxable
    }

    fn normalize(self) -> Self {
        Pnl {
            free: self.free.normalize(),
            taxable: self.taxable.normalize(),
        }
    }
}

impl AddAssign for Pnl {
    fn add_assign(&mut self, other: Pnl) {
        self.free += other.free;
        self.taxable += other.taxable;
    }
}

/// One processed trade or ledger action inside the report period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlEvent {
    #[serde(with = "formatted_timestamp")]
    pub timestamp: Timestamp,
    pub category: String,
    pub event_type: String,
    pub location: String,
    pub asset: Asset,
    pub amount: Decimal,
    /// Market value in the main currency
    pub value: Decimal,
    pub free: Decimal,
    pub taxable: Decimal,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    #[serde(with = "formatted_timestamp")]
    pub start: Timestamp,
    #[serde(with = "formatted_timestamp")]
    pub end: Timestamp,
    pub main_currency: String,
    pub pnl: BTreeMap<String, Pnl>,
    pub pnl_totals: Pnl,
}

#[derive(Debug, Clone)]
pub struct ProcessedHistory {
    pub events: Vec<PnlEvent>,
    pub overview: Overview,
}

/// Amount of an asset that can be sold without tax right now.
#[derive(Debug, Clone, PartialEq)]
pub struct Allowance {
    pub asset: Asset,
    pub amount: Decimal,
    /// Average acquisition price per unit in the main currency
    pub avg_buy_price: Decimal,
}

#[async_trait]
pub trait Accountant: Send + Sync {
    /// PnL of the events in `[start, end)`. Earlier events only build up
    /// the holdings; later ones are ignored.
    async fn process_history(
        &self,
        start: Timestamp,
        end: Timestamp,
        trades: &[Trade],
        actions: &[LedgerAction],
    ) -> Result<ProcessedHistory>;
}

#[derive(Debug, Clone)]
struct Lot {
    timestamp: Timestamp,
    amount: Decimal,
    cost_per_unit: Decimal,
}

/// Open lots per asset.
#[derive(Debug, Default)]
struct Holdings {
    lots: HashMap<Asset, VecDeque<Lot>>,
    taxfree_after_period: Option<i64>,
}

impl Holdings {
    fn acquire(&mut self, asset: &str, amount: Decimal, cost: Decimal, timestamp: Timestamp) {
        if amount <= Decimal::ZERO {
            return;
        }
        self.lots.entry(asset.to_uppercase()).or_default().push_back(Lot {
            timestamp,
            amount,
            cost_per_unit: cost / amount,
        });
    }

    fn is_taxfree(&self, acquired: Timestamp, disposed: Timestamp) -> bool {
        self.taxfree_after_period
            .is_some_and(|period| disposed - acquired >= period)
    }

    /// Consume `amount` first in first out and split the gain against
    /// `proceeds` into free and taxable parts.
    fn dispose(&mut self, asset: &str, amount: Decimal, proceeds: Decimal, timestamp: Timestamp) -> Pnl {
        let mut pnl = Pnl::default();
        if amount <= Decimal::ZERO {
            return pnl;
        }
        let mut remaining = amount;
        let lots = self.lots.entry(asset.to_uppercase()).or_default();
        let mut slices = vec![];
        while remaining > Decimal::ZERO {
            let Some(lot) = lots.front_mut() else {
                break;
            };
            let used = remaining.min(lot.amount);
            slices.push((lot.timestamp, used, used * lot.cost_per_unit));
            lot.amount -= used;
            remaining -= used;
            if lot.amount.is_zero() {
                lots.pop_front();
            }
        }
        if remaining > Decimal::ZERO {
            warn!(
                "Disposing {} {} without matching acquisition; assuming zero cost basis",
                remaining.normalize(),
                asset
            );
            slices.push((timestamp, remaining, Decimal::ZERO));
        }
        for (acquired, used, cost) in slices {
            let gain = proceeds * used / amount - cost;
            if self.is_taxfree(acquired, timestamp) {
                pnl.free += gain;
            } else {
                pnl.taxable += gain;
            }
        }
        pnl
    }
}

enum Event<'a> {
    Trade(&'a Trade),
    Action(&'a LedgerAction),
}

impl Event<'_> {
    fn timestamp(&self) -> Timestamp {
        match self {
            Event::Trade(t) => t.timestamp,
            Event::Action(a) => a.timestamp,
        }
    }
}

/// First-in first-out lot matcher with a tax-free holding period.
pub struct FifoAccountant {
    main_currency: String,
    taxfree_after_period: Option<i64>,
    taxable_actions: Vec<ActionType>,
    assets: AssetRegistry,
    oracle: Arc<dyn PriceOracle>,
}

impl FifoAccountant {
    pub fn new(settings: &Settings, assets: AssetRegistry, oracle: Arc<dyn PriceOracle>) -> Self {
        FifoAccountant {
            main_currency: settings.main_currency.clone(),
            taxfree_after_period: settings.taxfree_after_period,
            taxable_actions: settings.taxable_actions.clone(),
            assets,
            oracle,
        }
    }

    /// Fiat and the main currency are cash, not holdings.
    fn is_tracked(&self, asset: &str) -> bool {
        !asset.eq_ignore_ascii_case(&self.main_currency) && !self.assets.is_fiat(asset)
    }

    /// Value of `amount` units of `asset` in the main currency. A missing
    /// price is logged as error and counts as zero.
    async fn value(&self, asset: &str, amount: Decimal, timestamp: Timestamp) -> Decimal {
        if amount.is_zero() {
            return Decimal::ZERO;
        }
        match self
            .oracle
            .historical_price(asset, &self.main_currency, timestamp)
            .await
        {
            Ok(price) => amount * price,
            Err(e) => {
                error!("Cannot value {} {}: {:#}", amount.normalize(), asset, e);
                Decimal::ZERO
            }
        }
    }

    async fn fee_value(&self, trade: &Trade) -> Decimal {
        match (trade.fee, &trade.fee_currency) {
            (Some(fee), Some(currency)) => self.value(currency, fee, trade.timestamp).await,
            _ => Decimal::ZERO,
        }
    }

    async fn process_trade(&self, holdings: &mut Holdings, trade: &Trade) -> PnlEvent {
        let ts = trade.timestamp;
        let quote_amount = trade.quote_amount();
        let (given, given_amount, got, got_amount) = match trade.trade_type {
            TradeType::Buy => (&trade.quote_asset, quote_amount, &trade.base_asset, trade.amount),
            TradeType::Sell => (&trade.base_asset, trade.amount, &trade.quote_asset, quote_amount),
        };
        let give_tracked = self.is_tracked(given);
        let get_tracked = self.is_tracked(got);

        // Cash legs are valued directly, crypto-to-crypto by the spent asset.
        let value = if !give_tracked || get_tracked {
            self.value(given, given_amount, ts).await
        } else {
            self.value(got, got_amount, ts).await
        };
        let fee_amount = trade.fee.unwrap_or_default();
        let fee_asset = trade
            .fee_currency
            .as_deref()
            .filter(|c| !fee_amount.is_zero() && self.is_tracked(c));
        let fee_in_given = fee_asset.is_some_and(|c| c.eq_ignore_ascii_case(given));
        let fee_in_got = fee_asset.is_some_and(|c| c.eq_ignore_ascii_case(got));
        // A fee in one of the legs only changes the amounts moved. Any other
        // fee is an expense on top of the trade.
        let expense = if fee_in_given || fee_in_got {
            Decimal::ZERO
        } else {
            self.fee_value(trade).await
        };

        let mut pnl = Pnl::default();
        if give_tracked {
            let spent = if fee_in_given { given_amount + fee_amount } else { given_amount };
            pnl = holdings.dispose(given, spent, value - expense, ts);
        }
        if get_tracked {
            let received = if fee_in_got { got_amount - fee_amount } else { got_amount };
            let cost = if give_tracked { value } else { value + expense };
            holdings.acquire(got, received, cost, ts);
        }
        if let Some(fee_currency) = fee_asset
            && !fee_in_given
            && !fee_in_got
        {
            // Paying with a third asset disposes of it at market value.
            pnl += holdings.dispose(fee_currency, fee_amount, expense, ts);
        }

        PnlEvent {
            timestamp: ts,
            category: CATEGORY_TRADE.into(),
            event_type: trade.trade_type.to_string(),
            location: trade.location.clone(),
            asset: trade.base_asset.clone(),
            amount: trade.amount,
            value,
            free: pnl.free,
            taxable: pnl.taxable,
            notes: trade.notes.clone().unwrap_or_default(),
        }
    }

    async fn action_value(&self, action: &LedgerAction) -> Decimal {
        match (action.rate, &action.rate_asset) {
            (Some(rate), Some(rate_asset)) => {
                self.value(rate_asset, action.amount * rate, action.timestamp)
                    .await
            }
            _ => self.value(&action.asset, action.amount, action.timestamp).await,
        }
    }

    async fn process_action(&self, holdings: &mut Holdings, action: &LedgerAction) -> PnlEvent {
        let ts = action.timestamp;
        let value = self.action_value(action).await;
        let tracked = self.is_tracked(&action.asset);

        let mut pnl = Pnl::default();
        if action.action_type.is_acquisition() {
            if tracked {
                holdings.acquire(&action.asset, action.amount, value, ts);
            }
            if self.taxable_actions.contains(&action.action_type) {
                pnl.taxable = value;
            } else {
                pnl.free = value;
            }
        } else {
            // An expense is a sale at market value; fees and losses give
            // the asset away for nothing.
            let proceeds = match action.action_type {
                ActionType::Expense => value,
                _ => Decimal::ZERO,
            };
            if tracked {
                pnl = holdings.dispose(&action.asset, action.amount, proceeds, ts);
            } else {
                pnl.taxable = proceeds - value;
            }
        }

        PnlEvent {
            timestamp: ts,
            category: match action.action_type {
                ActionType::Fee => CATEGORY_FEE,
                _ => CATEGORY_LEDGER_ACTION,
            }
            .into(),
            event_type: action.action_type.to_string(),
            location: action.location.clone(),
            asset: action.asset.clone(),
            amount: action.amount,
            value,
            free: pnl.free,
            taxable: pnl.taxable,
            notes: action.notes.clone().unwrap_or_default(),
        }
    }

    /// Replay everything before `end`; events from `start` on produce PnL
    /// events.
    async fn replay(
        &self,
        start: Timestamp,
        end: Timestamp,
        trades: &[Trade],
        actions: &[LedgerAction],
    ) -> (Holdings, Vec<PnlEvent>) {
        let mut events: Vec<Event> = trades
            .iter()
            .map(Event::Trade)
            .chain(actions.iter().map(Event::Action))
            .collect();
        events.sort_by_key(|e| e.timestamp());

        let mut holdings = Holdings {
            taxfree_after_period: self.taxfree_after_period,
            ..Default::default()
        };
        let mut processed = vec![];
        for event in events {
            if event.timestamp() >= end {
                break;
            }
            let pnl_event = match event {
                Event::Trade(trade) => self.process_trade(&mut holdings, trade).await,
                Event::Action(action) => self.process_action(&mut holdings, action).await,
            };
            if pnl_event.timestamp >= start {
                debug!(
                    "{} {} {} {}: free {} taxable {}",
                    pnl_event.event_type,
                    pnl_event.amount.normalize(),
                    pnl_event.asset,
                    pnl_event.location,
                    pnl_event.free.normalize(),
                    pnl_event.taxable.normalize()
                );
                processed.push(pnl_event);
            }
        }
        (holdings, processed)
    }

    /// Per asset, what was held for at least the tax-free period at `now`.
    /// Empty when every disposal is taxable.
    pub async fn allowances(
        &self,
        trades: &[Trade],
        actions: &[LedgerAction],
        now: Timestamp,
    ) -> Result<Vec<Allowance>> {
        let Some(period) = self.taxfree_after_period else {
            return Ok(vec![]);
        };
        let (holdings, _) = self.replay(now + 1, now + 1, trades, actions).await;
        let mut allowances: Vec<Allowance> = holdings
            .lots
            .into_iter()
            .filter_map(|(asset, lots)| {
                let (amount, cost) = lots
                    .iter()
                    .filter(|lot| now - lot.timestamp >= period)
                    .fold((Decimal::ZERO, Decimal::ZERO), |(amount, cost), lot| {
                        (amount + lot.amount, cost + lot.amount * lot.cost_per_unit)
                    });
                (amount > Decimal::ZERO).then(|| Allowance {
                    asset,
                    amount: amount.normalize(),
                    avg_buy_price: (cost / amount).round_dp(8).normalize(),
                })
            })
            .collect();
        allowances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(allowances)
    }
}

#[async_trait]
impl Accountant for FifoAccountant {
    async fn process_history(
        &self,
        start: Timestamp,
        end: Timestamp,
        trades: &[Trade],
        actions: &[LedgerAction],
    ) -> Result<ProcessedHistory> {
        let (_, events) = self.replay(start, end, trades, actions).await;

        let mut pnl: BTreeMap<String, Pnl> = [CATEGORY_TRADE, CATEGORY_FEE, CATEGORY_LEDGER_ACTION]
            .into_iter()
            .map(|c| (c.to_string(), Pnl::default()))
            .collect();
        let mut pnl_totals = Pnl::default();
        for event in &events {
            let event_pnl = Pnl {
                free: event.free,
                taxable: event.taxable,
            };
            *pnl.entry(event.category.clone()).or_default() += event_pnl;
            pnl_totals += event_pnl;
        }

        Ok(ProcessedHistory {
            events,
            overview: Overview {
                start,
                end,
                main_currency: self.main_currency.clone(),
                pnl: pnl.into_iter().map(|(k, v)| (k, v.normalize())).collect(),
                pnl_totals: pnl_totals.normalize(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::ManualPriceConfig;
    use crate::price::{Inquirer, ManualPrices, PriceCache};
    use crate::time::parse_timestamp;

    const YEAR: i64 = 31_536_000;

    fn ts(s: &str) -> Timestamp {
        parse_timestamp(s).unwrap()
    }

    fn accountant(prices: &[(&str, &str, Decimal)]) -> FifoAccountant {
        let manual = prices
            .iter()
            .map(|(from, at, price)| ManualPriceConfig {
                from: from.to_string(),
                to: "EUR".into(),
                price: *price,
                timestamp: Some(ts(at)),
            })
            .collect::<Vec<_>>();
        let oracle = Inquirer::new(
            ManualPrices::from_config(&manual),
            PriceCache::new(std::env::temp_dir().join("buchfink-accounting-tests")),
            None,
            AssetRegistry::default(),
        );
        let settings = Settings {
            taxfree_after_period: Some(YEAR),
            ..Default::default()
        };
        FifoAccountant::new(&settings, AssetRegistry::default(), Arc::new(oracle))
    }

    fn trade(at: &str, trade_type: TradeType, amount: Decimal, base: &str, total: Decimal, quote: &str) -> Trade {
        Trade {
            timestamp: ts(at),
            location: "test".into(),
            base_asset: base.into(),
            quote_asset: quote.into(),
            trade_type,
            amount,
            rate: total / amount,
            fee: None,
            fee_currency: None,
            link: None,
            notes: None,
        }
    }

    fn action(at: &str, action_type: ActionType, amount: Decimal, asset: &str) -> LedgerAction {
        LedgerAction {
            timestamp: ts(at),
            action_type,
            location: "test".into(),
            amount,
            asset: asset.into(),
            rate: None,
            rate_asset: None,
            link: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn holding_period_splits_free_and_taxable() {
        let trades = vec![
            trade("2016-01-01", TradeType::Buy, dec!(1), "BTC", dec!(3000), "EUR"),
            trade("2017-01-01", TradeType::Buy, dec!(1), "BTC", dec!(5000), "EUR"),
            trade("2017-12-15", TradeType::Sell, dec!(2), "BTC", dec!(30000), "EUR"),
        ];
        let result = accountant(&[])
            .process_history(ts("2017-01-01"), ts("2018-01-01"), &trades, &[])
            .await
            .unwrap();

        let trade_pnl = result.overview.pnl[CATEGORY_TRADE];
        assert_eq!(trade_pnl.free, dec!(12000));
        assert_eq!(trade_pnl.taxable, dec!(10000));
        assert_eq!(result.overview.pnl_totals.total(), dec!(22000));
        // the 2016 buy happened before the period
        assert_eq!(result.events.len(), 2);
    }

    #[tokio::test]
    async fn fees_reduce_gains() {
        let mut buy = trade("2020-01-01", TradeType::Buy, dec!(1), "ETH", dec!(100), "EUR");
        buy.fee = Some(dec!(1));
        buy.fee_currency = Some("EUR".into());
        let mut sell = trade("2020-02-01", TradeType::Sell, dec!(1), "ETH", dec!(200), "EUR");
        sell.fee = Some(dec!(2));
        sell.fee_currency = Some("EUR".into());

        let result = accountant(&[])
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &[buy, sell], &[])
            .await
            .unwrap();
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(97));
    }

    #[tokio::test]
    async fn fee_in_spent_asset_leaves_the_lots() {
        let buy = trade("2018-01-01", TradeType::Buy, dec!(1), "ETH", dec!(100), "EUR");
        let mut sell = trade("2018-02-01", TradeType::Sell, dec!(0.5), "ETH", dec!(100), "EUR");
        sell.fee = Some(dec!(0.1));
        sell.fee_currency = Some("ETH".into());
        let trades = vec![buy, sell];
        let acc = accountant(&[]);

        let result = acc
            .process_history(ts("2018-01-01"), ts("2019-01-01"), &trades, &[])
            .await
            .unwrap();
        // 0.6 ETH at a basis of 60 leave for 100 EUR
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(40));

        let allowances = acc.allowances(&trades, &[], ts("2020-02-01")).await.unwrap();
        assert_eq!(allowances.len(), 1);
        assert_eq!(allowances[0].amount, dec!(0.4));
        assert_eq!(allowances[0].avg_buy_price, dec!(100));
    }

    #[tokio::test]
    async fn fee_in_received_asset_reduces_the_acquired_amount() {
        let mut buy = trade("2018-01-01", TradeType::Buy, dec!(1), "ETH", dec!(200), "EUR");
        buy.fee = Some(dec!(0.2));
        buy.fee_currency = Some("ETH".into());
        let sell = trade("2018-02-01", TradeType::Sell, dec!(0.8), "ETH", dec!(160), "EUR");
        let trades = vec![buy, sell];
        let acc = accountant(&[]);

        let allowances = acc.allowances(&trades[..1], &[], ts("2020-01-01")).await.unwrap();
        assert_eq!(allowances[0].amount, dec!(0.8));
        assert_eq!(allowances[0].avg_buy_price, dec!(250));

        // the whole 200 EUR is the basis of the 0.8 ETH received
        let result = acc
            .process_history(ts("2018-01-01"), ts("2019-01-01"), &trades, &[])
            .await
            .unwrap();
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(-40));
        assert!(acc.allowances(&trades, &[], ts("2020-01-01")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fee_in_third_asset_is_disposed_at_market_value() {
        let mut sell = trade("2020-02-01", TradeType::Sell, dec!(1), "ETH", dec!(200), "EUR");
        sell.fee = Some(dec!(0.1));
        sell.fee_currency = Some("BNB".into());
        let trades = vec![
            trade("2020-01-01", TradeType::Buy, dec!(1), "BNB", dec!(10), "EUR"),
            trade("2020-01-01", TradeType::Buy, dec!(1), "ETH", dec!(100), "EUR"),
            sell,
        ];
        let acc = accountant(&[("BNB", "2020-01-15", dec!(20))]);
        let result = acc
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &trades, &[])
            .await
            .unwrap();
        // ETH: 198 - 100, BNB: 2 - 1
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(99));

        let allowances = acc.allowances(&trades, &[], ts("2022-01-01")).await.unwrap();
        assert_eq!(allowances.len(), 1);
        assert_eq!(allowances[0].asset, "BNB");
        assert_eq!(allowances[0].amount, dec!(0.9));
    }

    #[tokio::test]
    async fn crypto_to_crypto_trade_moves_cost_basis() {
        let trades = vec![
            trade("2020-01-01", TradeType::Buy, dec!(1), "BTC", dec!(7000), "EUR"),
            // 1 BTC -> 50 ETH while ETH trades at 200 EUR
            trade("2020-03-01", TradeType::Buy, dec!(50), "ETH", dec!(1), "BTC"),
            trade("2020-04-01", TradeType::Sell, dec!(50), "ETH", dec!(12000), "EUR"),
        ];
        let acc = accountant(&[("BTC", "2020-03-01", dec!(10000))]);
        let result = acc
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &trades, &[])
            .await
            .unwrap();
        // 3000 on BTC -> ETH, 2000 on ETH -> EUR
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(5000));
    }

    #[tokio::test]
    async fn selling_without_acquisition_has_zero_cost() {
        let trades = vec![trade("2020-06-01", TradeType::Sell, dec!(5), "UNI", dec!(40), "EUR")];
        let result = accountant(&[])
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &trades, &[])
            .await
            .unwrap();
        assert_eq!(result.overview.pnl[CATEGORY_TRADE].taxable, dec!(40));
    }

    #[tokio::test]
    async fn ledger_actions_book_income_and_fees() {
        let actions = vec![
            action("2020-03-01", ActionType::Income, dec!(10), "ETH"),
            action("2020-03-02", ActionType::Gift, dec!(1), "ETH"),
            action("2020-04-01", ActionType::Fee, dec!(1), "ETH"),
        ];
        let trades = vec![trade("2020-06-01", TradeType::Sell, dec!(10), "ETH", dec!(3000), "EUR")];
        let acc = accountant(&[("ETH", "2020-01-01", dec!(100))]);
        let result = acc
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &trades, &actions)
            .await
            .unwrap();

        let overview = result.overview;
        assert_eq!(overview.pnl[CATEGORY_LEDGER_ACTION].taxable, dec!(1000));
        assert_eq!(overview.pnl[CATEGORY_LEDGER_ACTION].free, dec!(100));
        assert_eq!(overview.pnl[CATEGORY_FEE].taxable, dec!(-100));
        assert_eq!(overview.pnl[CATEGORY_TRADE].taxable, dec!(2000));
    }

    #[tokio::test]
    async fn events_after_end_are_ignored() {
        let trades = vec![
            trade("2020-01-01", TradeType::Buy, dec!(1), "BTC", dec!(7000), "EUR"),
            trade("2021-06-01", TradeType::Sell, dec!(1), "BTC", dec!(30000), "EUR"),
        ];
        let result = accountant(&[])
            .process_history(ts("2020-01-01"), ts("2021-01-01"), &trades, &[])
            .await
            .unwrap();
        assert_eq!(result.overview.pnl_totals, Pnl::default());
        assert_eq!(result.events.len(), 1);
    }

    #[tokio::test]
    async fn allowances_count_long_held_lots() {
        let trades = vec![
            trade("2019-01-01", TradeType::Buy, dec!(1), "BTC", dec!(3000), "EUR"),
            trade("2019-06-01", TradeType::Buy, dec!(1), "BTC", dec!(7000), "EUR"),
            trade("2020-03-01", TradeType::Buy, dec!(1), "BTC", dec!(8000), "EUR"),
        ];
        let allowances = accountant(&[])
            .allowances(&trades, &[], ts("2020-07-01"))
            .await
            .unwrap();
        assert_eq!(
            allowances,
            vec![Allowance {
                asset: "BTC".into(),
                amount: dec!(2),
                avg_buy_price: dec!(5000),
            }]
        );
    }
}
