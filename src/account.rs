use std::fmt;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::info;

use crate::config::{AccountConfig, FetchConfig, check_file_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Exchange,
    Ethereum,
    Bitcoin,
    Manual,
    Generic,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Exchange => "exchange",
            AccountType::Ethereum => "ethereum",
            AccountType::Bitcoin => "bitcoin",
            AccountType::Manual => "manual",
            AccountType::Generic => "generic",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub account_type: AccountType,
    /// Chain address for wallets, exchange name for exchange accounts.
    pub address: Option<String>,
    pub tags: Vec<String>,
    pub config: AccountConfig,
}

impl Account {
    pub fn from_config(config: &AccountConfig) -> Result<Self> {
        check_file_name("account", &config.name)?;
        let mut sources = Vec::new();
        if let Some(exchange) = &config.exchange {
            sources.push((AccountType::Exchange, Some(exchange.clone())));
        }
        if let Some(address) = &config.ethereum {
            sources.push((AccountType::Ethereum, Some(address.clone())));
        }
        if let Some(address) = &config.bitcoin {
            sources.push((AccountType::Bitcoin, Some(address.clone())));
        }
        if config.manual.is_some() {
            sources.push((AccountType::Manual, None));
        }
        if config.generic.unwrap_or(false) {
            sources.push((AccountType::Generic, None));
        }
        let (account_type, address) = match sources.len() {
            0 => (AccountType::Generic, None),
            1 => sources.remove(0),
            _ => bail!(
                "account '{}' names more than one source ({})",
                config.name,
                sources.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>().join(", ")
            ),
        };
        // Exchange accounts report no chain address.
        let address = match account_type {
            AccountType::Exchange => None,
            _ => address,
        };
        Ok(Account {
            name: config.name.clone(),
            account_type,
            address,
            tags: config.tags.clone(),
            config: config.clone(),
        })
    }

    pub fn fetch_config(&self) -> FetchConfig {
        self.config.fetch.unwrap_or_default()
    }

    /// Named output field for `list --output`.
    pub fn field(&self, field: &str) -> Option<String> {
        match field {
            "name" => Some(self.name.clone()),
            "account_type" | "type" => Some(self.account_type.to_string()),
            "address" => Some(self.address.clone().unwrap_or_default()),
            "tags" => Some(self.tags.join(",")),
            "exchange" => Some(self.config.exchange.clone().unwrap_or_default()),
            _ => None,
        }
    }
}

/// Build an ad-hoc account from `--external`: `ethereum:<address>`,
/// `bitcoin:<address>`, or a bare `0x` address.
pub fn account_from_string(s: &str) -> Result<Account> {
    let (kind, address) = match s.split_once(':') {
        Some((kind, address)) => (kind, address),
        None if s.starts_with("0x") => ("ethereum", s),
        None => bail!("cannot infer account type of '{s}', use <type>:<address>"),
    };
    let mut config = AccountConfig {
        name: address.to_string(),
        ..Default::default()
    };
    match kind {
        "ethereum" | "eth" => config.ethereum = Some(address.to_string()),
        "bitcoin" | "btc" => config.bitcoin = Some(address.to_string()),
        other => bail!("unsupported external account type '{other}'"),
    }
    Account::from_config(&config)
}

/// Name matcher: `/re/` is a regular expression, anything else a substring.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Substring(String),
    Regex(Regex),
}

impl NamePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            let re = Regex::new(inner).with_context(|| format!("invalid regex {pattern}"))?;
            Ok(NamePattern::Regex(re))
        } else {
            Ok(NamePattern::Substring(pattern.to_string()))
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Substring(s) => name.contains(s.as_str()),
            NamePattern::Regex(re) => re.is_match(name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub keyword: Option<String>,
    pub exclude: Option<String>,
    pub account_type: Option<String>,
}

impl AccountFilter {
    pub fn keyword(keyword: Option<&str>) -> Self {
        AccountFilter {
            keyword: keyword.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn apply(&self, accounts: Vec<Account>) -> Result<Vec<Account>> {
        let keyword = self.keyword.as_deref().map(NamePattern::parse).transpose()?;
        let exclude = self.exclude.as_deref().map(NamePattern::parse).transpose()?;

        let accounts: Vec<Account> = accounts
            .into_iter()
            .filter(|acc| keyword.as_ref().is_none_or(|k| k.matches(&acc.name)))
            .filter(|acc| exclude.as_ref().is_none_or(|x| !x.matches(&acc.name)))
            .filter(|acc| {
                self.account_type
                    .as_deref()
                    .is_none_or(|t| acc.account_type.as_str().contains(t))
            })
            .collect();

        info!(
            "Collected {} account(s): {}",
            accounts.len(),
            accounts.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(accounts)
    }
}

/// Accounts to operate on: the `--external` ones when given, otherwise the
/// configured accounts, narrowed by the filter.
pub fn select_accounts(
    configured: Vec<Account>,
    external: &[String],
    filter: &AccountFilter,
) -> Result<Vec<Account>> {
    let accounts = if external.is_empty() {
        configured
    } else {
        external
            .iter()
            .map(|e| account_from_string(e))
            .collect::<Result<Vec<_>>>()?
    };
    filter.apply(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str, kind: &str) -> Account {
        let mut config = AccountConfig {
            name: name.to_string(),
            ..Default::default()
        };
        match kind {
            "exchange" => config.exchange = Some("kraken".into()),
            "ethereum" => config.ethereum = Some(format!("0x{name}")),
            _ => config.generic = Some(true),
        }
        Account::from_config(&config).unwrap()
    }

    fn names(accounts: &[Account]) -> Vec<&str> {
        accounts.iter().map(|a| a.name.as_str()).collect()
    }

    fn sample() -> Vec<Account> {
        vec![
            account("kraken-main", "exchange"),
            account("kraken-old", "exchange"),
            account("ledger1", "ethereum"),
            account("ledger2", "ethereum"),
            account("paper", "generic"),
        ]
    }

    #[test]
    fn keyword_substring_and_regex() {
        let filter = AccountFilter::keyword(Some("kraken"));
        assert_eq!(names(&filter.apply(sample()).unwrap()), ["kraken-main", "kraken-old"]);

        let filter = AccountFilter::keyword(Some("/^ledger[0-9]$/"));
        assert_eq!(names(&filter.apply(sample()).unwrap()), ["ledger1", "ledger2"]);
    }

    #[test]
    fn exclude_and_type() {
        let filter = AccountFilter {
            exclude: Some("/old$/".into()),
            account_type: Some("exch".into()),
            ..Default::default()
        };
        assert_eq!(names(&filter.apply(sample()).unwrap()), ["kraken-main"]);

        let filter = AccountFilter {
            exclude: Some("ledger".into()),
            ..Default::default()
        };
        assert_eq!(
            names(&filter.apply(sample()).unwrap()),
            ["kraken-main", "kraken-old", "paper"]
        );
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let filter = AccountFilter::keyword(Some("/([/"));
        assert!(filter.apply(sample()).is_err());
    }

    #[test]
    fn external_accounts_replace_configured() {
        let external = vec!["0xabc".to_string(), "bitcoin:bc1qxyz".to_string()];
        let accounts = select_accounts(sample(), &external, &AccountFilter::default()).unwrap();
        assert_eq!(names(&accounts), ["0xabc", "bc1qxyz"]);
        assert_eq!(accounts[0].account_type, AccountType::Ethereum);
        assert_eq!(accounts[1].account_type, AccountType::Bitcoin);
        assert_eq!(accounts[1].address.as_deref(), Some("bc1qxyz"));
        assert!(account_from_string("solana:abc").is_err());
        assert!(account_from_string("abc").is_err());
        assert!(account_from_string("bitcoin:../../x").is_err());
    }

    #[test]
    fn one_source_per_account() {
        let config = AccountConfig {
            name: "both".into(),
            exchange: Some("kraken".into()),
            ethereum: Some("0x1".into()),
            ..Default::default()
        };
        assert!(Account::from_config(&config).is_err());

        let exchange = account("k", "exchange");
        assert_eq!(exchange.address, None);
        assert_eq!(exchange.field("exchange").as_deref(), Some("kraken"));
        assert!(exchange.fetch_config().trades);
    }
}
