use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BuchfinkError;
use crate::time::{Timestamp, format_timestamp};

pub type Asset = String;

/// Precision of quote amounts (wei).
pub const QUOTE_DECIMALS: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeType::Buy => f.write_str("buy"),
            TradeType::Sell => f.write_str("sell"),
        }
    }
}

/// A trade of `amount` units of `base_asset` at `rate` units of
/// `quote_asset` each.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub timestamp: Timestamp,
    pub location: String,
    pub base_asset: Asset,
    pub quote_asset: Asset,
    pub trade_type: TradeType,
    pub amount: Decimal,
    pub rate: Decimal,
    pub fee: Option<Decimal>,
    pub fee_currency: Option<Asset>,
    pub link: Option<String>,
    pub notes: Option<String>,
}

impl Trade {
    /// `amount * rate`, rounded so that a rate derived from a quote
    /// amount gives that amount back.
    pub fn quote_amount(&self) -> Decimal {
        (self.amount * self.rate).round_dp(QUOTE_DECIMALS).normalize()
    }

    /// Key used to detect the same trade reported twice.
    pub fn identity(&self) -> Option<(&str, &str)> {
        self.link
            .as_deref()
            .map(|link| (self.location.as_str(), link))
    }

    pub fn involves(&self, asset: &str) -> bool {
        self.base_asset.eq_ignore_ascii_case(asset) || self.quote_asset.eq_ignore_ascii_case(asset)
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} for {} {} at {} ({})",
            self.trade_type,
            self.amount.normalize(),
            self.base_asset,
            self.quote_amount().normalize(),
            self.quote_asset,
            format_timestamp(self.timestamp),
            self.location
        )?;
        if let Some(link) = &self.link {
            write!(f, " [{link}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Income,
    Expense,
    Loss,
    DividendsIncome,
    DonationReceived,
    Airdrop,
    Gift,
    Grant,
    Fee,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        ActionType::Income,
        ActionType::Expense,
        ActionType::Loss,
        ActionType::DividendsIncome,
        ActionType::DonationReceived,
        ActionType::Airdrop,
        ActionType::Gift,
        ActionType::Grant,
        ActionType::Fee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Income => "income",
            ActionType::Expense => "expense",
            ActionType::Loss => "loss",
            ActionType::DividendsIncome => "dividends_income",
            ActionType::DonationReceived => "donation_received",
            ActionType::Airdrop => "airdrop",
            ActionType::Gift => "gift",
            ActionType::Grant => "grant",
            ActionType::Fee => "fee",
        }
    }

    /// Whether the action adds the asset to the account (as opposed to
    /// removing it).
    pub fn is_acquisition(&self) -> bool {
        !matches!(self, ActionType::Expense | ActionType::Loss | ActionType::Fee)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("unknown action type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerAction {
    pub timestamp: Timestamp,
    pub action_type: ActionType,
    pub location: String,
    pub amount: Decimal,
    pub asset: Asset,
    pub rate: Option<Decimal>,
    pub rate_asset: Option<Asset>,
    pub link: Option<String>,
    pub notes: Option<String>,
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} at {}",
            self.action_type,
            self.amount.normalize(),
            self.asset,
            format_timestamp(self.timestamp)
        )
    }
}

/// `<amount> <ASSET>` as used throughout the YAML snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetAmount {
    pub amount: Decimal,
    pub asset: Asset,
}

impl FromStr for AssetAmount {
    type Err = BuchfinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuchfinkError::InvalidAmount(s.to_string());
        let mut parts = s.split_whitespace();
        let (Some(amount), Some(asset), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        let amount = Decimal::from_str(amount)
            .or_else(|_| Decimal::from_scientific(amount))
            .map_err(|_| invalid())?;
        Ok(AssetAmount {
            amount,
            asset: asset.to_string(),
        })
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.normalize(), self.asset)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: Decimal,
    #[serde(default)]
    pub usd_value: Decimal,
}

impl std::ops::AddAssign<&Balance> for Balance {
    fn add_assign(&mut self, other: &Balance) {
        self.amount += other.amount;
        self.usd_value += other.usd_value;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceSheet {
    #[serde(default)]
    pub assets: BTreeMap<Asset, Balance>,
    #[serde(default)]
    pub liabilities: BTreeMap<Asset, Balance>,
}

impl BalanceSheet {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty() && self.liabilities.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}
