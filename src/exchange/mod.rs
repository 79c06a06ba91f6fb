use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::account::{Account, AccountType};
use crate::model::{BalanceSheet, Trade};
use crate::time::Timestamp;

pub mod kraken;

pub use kraken::Kraken;

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// `(true, "")` when the credentials work, otherwise `(false, reason)`.
    async fn validate_api_key(&self) -> (bool, String);

    async fn query_online_trade_history(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Result<Vec<Trade>>;

    /// Current holdings; `usd_value` is left at zero.
    async fn query_balances(&self) -> Result<BalanceSheet>;
}

/// Build the exchange client for an exchange account from its credentials.
pub fn get_exchange(account: &Account) -> Result<Arc<dyn Exchange>> {
    if account.account_type != AccountType::Exchange {
        bail!("account '{}' is not an exchange account", account.name);
    }
    let exchange = account.config.exchange.as_deref().unwrap_or_default();
    let (Some(api_key), Some(secret)) = (&account.config.api_key, &account.config.secret) else {
        bail!("exchange account '{}' needs api_key and secret", account.name);
    };
    match exchange.to_lowercase().as_str() {
        "kraken" => Ok(Arc::new(Kraken::new(api_key, secret)?)),
        other => bail!("unsupported exchange '{other}' for account '{}'", account.name),
    }
}
