use std::{fs, path::Path};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BuchfinkError;
use crate::model::ActionType;
use crate::serialization::TimestampRepr;
use crate::time::{Timestamp, parse_timestamp};

pub const CONFIG_FILE: &str = "buchfink.yaml";

/// Contents of `buchfink.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub reports: Vec<ReportConfig>,
    #[serde(default)]
    pub prices: Vec<ManualPriceConfig>,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config = serde_yaml::from_str::<Option<Config>>(text)?.unwrap_or_default();
        for account in &config.accounts {
            check_file_name("account", &account.name)?;
        }
        for report in &config.reports {
            check_file_name("report", &report.name)?;
        }
        Ok(config)
    }
}

/// Account and report names become file and directory names under the
/// data directory, so they must not contain path separators.
pub fn check_file_name(kind: &'static str, name: &str) -> Result<(), BuchfinkError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(BuchfinkError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_main_currency")]
    pub main_currency: String,
    /// Seconds after which a disposal is no longer taxable. Unset means
    /// every disposal is taxable.
    #[serde(default)]
    pub taxfree_after_period: Option<i64>,
    #[serde(default = "default_taxable_actions")]
    pub taxable_actions: Vec<ActionType>,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub coingecko_api_key: Option<String>,
    #[serde(default)]
    pub etherscan_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            main_currency: default_main_currency(),
            taxfree_after_period: None,
            taxable_actions: default_taxable_actions(),
            fetch_concurrency: default_fetch_concurrency(),
            coingecko_api_key: None,
            etherscan_api_key: None,
        }
    }
}

fn default_main_currency() -> String {
    "EUR".to_string()
}

fn default_taxable_actions() -> Vec<ActionType> {
    vec![
        ActionType::Income,
        ActionType::DividendsIncome,
        ActionType::DonationReceived,
        ActionType::Grant,
        ActionType::Airdrop,
    ]
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Which kinds of data `fetch` collects for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_true")]
    pub trades: bool,
    #[serde(default = "default_true")]
    pub actions: bool,
    #[serde(default = "default_true")]
    pub balances: bool,
    #[serde(default = "default_true")]
    pub nfts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            trades: true,
            actions: true,
            balances: true,
            nfts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ManualBalance {
    pub asset: String,
    pub amount: Decimal,
    #[serde(default)]
    pub liability: bool,
}

/// One entry of `accounts`. Exactly one of the source keys (`exchange`,
/// `ethereum`, `bitcoin`, `manual`, `generic`) is expected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub ethereum: Option<String>,
    #[serde(default)]
    pub bitcoin: Option<String>,
    #[serde(default)]
    pub manual: Option<Vec<ManualBalance>>,
    #[serde(default)]
    pub generic: Option<bool>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fetch: Option<FetchConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportConfig {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "from", deserialize_with = "de_timestamp")]
    pub from_ts: Timestamp,
    #[serde(rename = "to", deserialize_with = "de_timestamp")]
    pub to_ts: Timestamp,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualPriceConfig {
    pub from: String,
    pub to: String,
    pub price: Decimal,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub coingecko: Option<String>,
    /// ERC-20 contract address, matched by `eip155:1/erc20:<address>`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub fiat: bool,
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    match TimestampRepr::deserialize(deserializer)? {
        TimestampRepr::Unix(ts) => Ok(ts),
        TimestampRepr::Text(s) => parse_timestamp(&s).map_err(serde::de::Error::custom),
    }
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    de_timestamp(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_sparse_config() {
        let config = Config::from_yaml("accounts:\n- name: cold\n  generic: true\n").unwrap();
        assert_eq!(config.settings.main_currency, "EUR");
        assert_eq!(config.settings.fetch_concurrency, 4);
        assert!(config.settings.taxable_actions.contains(&ActionType::Income));
        assert_eq!(config.accounts[0].name, "cold");
        assert!(config.reports.is_empty());
    }

    #[test]
    fn empty_config_is_default() {
        let config = Config::from_yaml("").unwrap();
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn parses_reports_prices_and_fetch_flags() {
        let config = Config::from_yaml(
            r#"
settings:
  main_currency: USD
  taxfree_after_period: 31536000
  taxable_actions: [income]
accounts:
- name: kraken
  exchange: kraken
  api_key: key
  secret: c2VjcmV0
  fetch:
    balances: false
reports:
- name: taxes-2020
  title: Taxes 2020
  from: 2020-01-01
  to: '2021-01-01'
  template: report.html.j2
prices:
- from: ETH
  to: USD
  price: 230.5
  timestamp: 2020-01-01
- from: BTC
  to: USD
  price: '9000'
"#,
        )
        .unwrap();

        assert_eq!(config.settings.main_currency, "USD");
        assert_eq!(config.settings.taxfree_after_period, Some(31_536_000));
        assert_eq!(config.settings.taxable_actions, vec![ActionType::Income]);

        let fetch = config.accounts[0].fetch.unwrap();
        assert!(fetch.trades && !fetch.balances);

        let report = &config.reports[0];
        assert_eq!(report.from_ts, 1_577_836_800);
        assert_eq!(report.to_ts, 1_609_459_200);
        assert_eq!(report.template.as_deref(), Some("report.html.j2"));

        assert_eq!(config.prices[0].price, Decimal::new(2305, 1));
        assert_eq!(config.prices[0].timestamp, Some(1_577_836_800));
        assert_eq!(config.prices[1].timestamp, None);
    }

    #[test]
    fn names_must_stay_inside_the_data_directory() {
        for name in ["../outside", "a/b", "a\\b", "..", ""] {
            let text = format!("accounts:\n- name: '{name}'\n  generic: true\n");
            let err = Config::from_yaml(&text).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<BuchfinkError>(),
                    Some(BuchfinkError::InvalidName { kind: "account", .. })
                ),
                "{name}: {err:#}"
            );
        }
        let text = "reports:\n- name: ../../etc\n  from: 2020-01-01\n  to: 2021-01-01\n";
        assert!(Config::from_yaml(text).is_err());
        assert!(Config::from_yaml("accounts:\n- name: cold.wallet-2\n").is_ok());
    }
}
