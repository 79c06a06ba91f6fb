use anyhow::{Result, bail};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::account::{Account, AccountType};

pub mod bitcoin;
pub mod ethereum;

pub use bitcoin::Blockstream;
pub use ethereum::{EthTransaction, Etherscan, NftTransfer, gas_fee_actions, held_nfts};

/// Read access to an Ethereum address.
#[async_trait]
pub trait EthereumExplorer: Send + Sync {
    async fn transactions(&self, address: &str) -> Result<Vec<EthTransaction>>;

    /// ETH balance of the address
    async fn balance(&self, address: &str) -> Result<Decimal>;

    async fn nft_transfers(&self, address: &str) -> Result<Vec<NftTransfer>>;
}

#[async_trait]
pub trait BitcoinExplorer: Send + Sync {
    /// Confirmed BTC balance of the address
    async fn balance(&self, address: &str) -> Result<Decimal>;
}

/// Block explorer page for a wallet account.
pub fn explorer_url(account: &Account) -> Result<String> {
    match (account.account_type, &account.address) {
        (AccountType::Ethereum, Some(address)) => Ok(format!("https://etherscan.io/address/{address}")),
        (AccountType::Bitcoin, Some(address)) => {
            Ok(format!("https://blockstream.info/address/{address}"))
        }
        _ => bail!("no block explorer for {} account '{}'", account.account_type, account.name),
    }
}

/// Scale an integer amount of the smallest unit (wei, satoshi) down by
/// `decimals`.
pub fn from_base_units(raw: &str, decimals: u32) -> Result<Decimal> {
    let units: i128 = raw.trim().parse().map_err(|_| anyhow::anyhow!("invalid amount '{raw}'"))?;
    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|e| anyhow::anyhow!("amount '{raw}' out of range: {e}"))
}
