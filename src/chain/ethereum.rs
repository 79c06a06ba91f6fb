use std::collections::BTreeMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::{Client, Url, header};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{EthereumExplorer, from_base_units};
use crate::http::{do_get_json, mk_client};
use crate::model::{ActionType, LedgerAction, Nft};
use crate::time::Timestamp;

const ETHERSCAN_API: &str = "https://api.etherscan.io/api";
const WEI_DECIMALS: u32 = 18;

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: Value,
}

fn de_number_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Normal transaction as listed by `txlist`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTransaction {
    pub hash: String,
    #[serde(rename = "timeStamp", deserialize_with = "de_number_string")]
    pub timestamp: Timestamp,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub value: String,
    pub gas_used: String,
    pub gas_price: String,
    #[serde(default)]
    pub is_error: String,
}

impl EthTransaction {
    /// Gas paid in ETH
    pub fn fee(&self) -> Result<Decimal> {
        let used: i128 = self.gas_used.parse()?;
        let price: i128 = self.gas_price.parse()?;
        let wei = used
            .checked_mul(price)
            .ok_or_else(|| anyhow::anyhow!("gas fee overflow in {}", self.hash))?;
        from_base_units(&wei.to_string(), WEI_DECIMALS)
    }
}

/// ERC-721 transfer as listed by `tokennfttx`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftTransfer {
    pub hash: String,
    #[serde(rename = "timeStamp", deserialize_with = "de_number_string")]
    pub timestamp: Timestamp,
    pub from: String,
    pub to: String,
    pub contract_address: String,
    #[serde(rename = "tokenID")]
    pub token_id: String,
    #[serde(default)]
    pub token_name: String,
}

/// One `fee` action per transaction sent from `address`, failed ones
/// included since they still pay for gas.
pub fn gas_fee_actions(address: &str, txs: &[EthTransaction]) -> Result<Vec<LedgerAction>> {
    let mut actions = Vec::new();
    for tx in txs.iter().filter(|tx| tx.from.eq_ignore_ascii_case(address)) {
        let fee = tx.fee()?;
        if fee.is_zero() {
            continue;
        }
        let notes = if tx.is_error == "1" {
            format!("Gas fee (failed transaction to {})", tx.to)
        } else {
            format!("Gas fee (transaction to {})", tx.to)
        };
        actions.push(LedgerAction {
            timestamp: tx.timestamp,
            action_type: ActionType::Fee,
            location: "ethereum".into(),
            amount: fee,
            asset: "ETH".into(),
            rate: None,
            rate_asset: None,
            link: Some(tx.hash.clone()),
            notes: Some(notes),
        });
    }
    actions.sort_by_key(|a| a.timestamp);
    Ok(actions)
}

/// Tokens transferred to `address` and not transferred away since.
pub fn held_nfts(address: &str, transfers: &[NftTransfer]) -> Vec<Nft> {
    let mut ordered: Vec<&NftTransfer> = transfers.iter().collect();
    ordered.sort_by_key(|t| t.timestamp);

    let mut held: BTreeMap<(String, String), &NftTransfer> = BTreeMap::new();
    for transfer in ordered {
        let key = (transfer.contract_address.to_lowercase(), transfer.token_id.clone());
        if transfer.from.eq_ignore_ascii_case(address) {
            held.remove(&key);
        }
        if transfer.to.eq_ignore_ascii_case(address) {
            held.insert(key, transfer);
        }
    }
    held.into_iter()
        .map(|((contract, token_id), t)| Nft {
            id: format!("{contract}/{token_id}"),
            name: format!("{} #{}", t.token_name, token_id),
            collection: (!t.token_name.is_empty()).then(|| t.token_name.clone()),
        })
        .collect()
}

/// Etherscan account API client
pub struct Etherscan {
    client: Client,
    api_key: Option<String>,
}

impl Etherscan {
    pub fn new(api_key: Option<&str>) -> Result<Self> {
        Ok(Etherscan {
            client: mk_client(header::HeaderMap::new())?,
            api_key: api_key.map(str::to_string),
        })
    }

    async fn account_query<T: DeserializeOwned>(
        &self,
        action: &str,
        address: &str,
        extra: &[(&str, &str)],
    ) -> Result<T> {
        let mut url = Url::parse(ETHERSCAN_API)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("module", "account");
            q.append_pair("action", action);
            q.append_pair("address", address);
            for (k, v) in extra {
                q.append_pair(k, v);
            }
            if let Some(key) = &self.api_key {
                q.append_pair("apikey", key);
            }
        }
        let resp: EtherscanResponse = do_get_json(&self.client, url).await?;
        debug!("etherscan {} {}: {}", action, address, resp.message);
        if resp.status != "1" {
            // An empty history is reported as an error status with an empty list.
            if resp.result.as_array().is_some_and(|r| r.is_empty()) {
                return Ok(serde_json::from_value(Value::Array(vec![]))?);
            }
            bail!("etherscan {action}: {} ({})", resp.message, resp.result);
        }
        Ok(serde_json::from_value(resp.result)?)
    }
}

#[async_trait]
impl EthereumExplorer for Etherscan {
    async fn transactions(&self, address: &str) -> Result<Vec<EthTransaction>> {
        self.account_query(
            "txlist",
            address,
            &[("startblock", "0"), ("endblock", "99999999"), ("sort", "asc")],
        )
        .await
    }

    async fn balance(&self, address: &str) -> Result<Decimal> {
        let wei: String = self
            .account_query("balance", address, &[("tag", "latest")])
            .await?;
        from_base_units(&wei, WEI_DECIMALS)
    }

    async fn nft_transfers(&self, address: &str) -> Result<Vec<NftTransfer>> {
        self.account_query("tokennfttx", address, &[("sort", "asc")])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "0xAbC0000000000000000000000000000000000001";

    fn tx(hash: &str, ts: i64, from: &str, is_error: &str) -> EthTransaction {
        EthTransaction {
            hash: hash.into(),
            timestamp: ts,
            from: from.into(),
            to: "0xdead".into(),
            value: "0".into(),
            gas_used: "21000".into(),
            gas_price: "50000000000".into(),
            is_error: is_error.into(),
        }
    }

    fn nft(ts: i64, from: &str, to: &str, token: &str) -> NftTransfer {
        NftTransfer {
            hash: format!("0x{ts}"),
            timestamp: ts,
            from: from.into(),
            to: to.into(),
            contract_address: "0xC0FFEE".into(),
            token_id: token.into(),
            token_name: "Kitty".into(),
        }
    }

    #[test]
    fn fee_actions_only_for_outgoing_transactions() {
        let txs = vec![
            tx("0x2", 200, &ME.to_lowercase(), "1"),
            tx("0x1", 100, ME, "0"),
            tx("0x3", 300, "0xsomeoneelse", "0"),
        ];
        let actions = gas_fee_actions(ME, &txs).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].link.as_deref(), Some("0x1"));
        assert_eq!(actions[0].action_type, ActionType::Fee);
        // 21000 * 50 gwei
        assert_eq!(actions[0].amount, Decimal::new(105, 5));
        assert!(actions[1].notes.as_deref().unwrap().contains("failed"));
    }

    #[test]
    fn nfts_sent_away_are_not_held() {
        let transfers = vec![
            nft(1, "0x0", ME, "1"),
            nft(2, "0x0", ME, "2"),
            nft(3, ME, "0xother", "1"),
        ];
        let held = held_nfts(ME, &transfers);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, "0xc0ffee/2");
        assert_eq!(held[0].name, "Kitty #2");
    }

    #[test]
    fn parses_txlist_rows() {
        let row: EthTransaction = serde_json::from_str(
            r#"{"blockNumber":"1","timeStamp":"1609459200","hash":"0xh","from":"0xa",
                "to":"0xb","value":"1","gas":"21000","gasPrice":"1000000000",
                "gasUsed":"21000","isError":"0","txreceipt_status":"1"}"#,
        )
        .unwrap();
        assert_eq!(row.timestamp, 1_609_459_200);
        assert_eq!(row.fee().unwrap(), Decimal::new(21, 6));
    }
}
