use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url, header};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{BitcoinExplorer, from_base_units};
use crate::http::{do_get_json, mk_client};

const BLOCKSTREAM_API: &str = "https://blockstream.info/api";

#[derive(Debug, Deserialize)]
struct ChainStats {
    funded_txo_sum: i128,
    spent_txo_sum: i128,
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    chain_stats: ChainStats,
}

impl AddressInfo {
    fn balance(&self) -> Result<Decimal> {
        let sats = self.chain_stats.funded_txo_sum - self.chain_stats.spent_txo_sum;
        from_base_units(&sats.to_string(), 8)
    }
}

pub struct Blockstream {
    client: Client,
}

impl Blockstream {
    pub fn new() -> Result<Self> {
        Ok(Blockstream {
            client: mk_client(header::HeaderMap::new())?,
        })
    }
}

#[async_trait]
impl BitcoinExplorer for Blockstream {
    async fn balance(&self, address: &str) -> Result<Decimal> {
        let url = Url::parse(&format!("{BLOCKSTREAM_API}/address/{address}"))?;
        let info: AddressInfo = do_get_json(&self.client, url).await?;
        info.balance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_is_funded_minus_spent() {
        let info: AddressInfo = serde_json::from_str(
            r#"{"address":"bc1q","chain_stats":{"funded_txo_count":2,"funded_txo_sum":150000000,
                "spent_txo_count":1,"spent_txo_sum":50000000,"tx_count":3},
                "mempool_stats":{"funded_txo_sum":0,"spent_txo_sum":0}}"#,
        )
        .unwrap();
        assert_eq!(info.balance().unwrap(), Decimal::ONE);
    }
}
