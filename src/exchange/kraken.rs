use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use reqwest::{Client, header};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, info};

use super::Exchange;
use crate::http::{mk_client, send_json};
use crate::model::{Balance, BalanceSheet, Trade, TradeType};
use crate::time::Timestamp;

const BASE_URL: &str = "https://api.kraken.com";
const PAGE_SIZE: usize = 50;

type HmacSha512 = Hmac<Sha512>;

/// Normalize Kraken currency codes to standard format.
///
/// Kraken prefixes legacy crypto codes with `X` and fiat with `Z`, and
/// marks staked or opt-in rewards balances with a `.S`/`.M`/`.F` suffix.
pub fn normalize_currency(currency: &str) -> String {
    let currency = currency.split('.').next().unwrap_or(currency);
    match currency {
        "XXBT" | "XBT" => "BTC".to_owned(),
        "XETH" => "ETH".to_owned(),
        "XXRP" => "XRP".to_owned(),
        "XLTC" => "LTC".to_owned(),
        "XXLM" => "XLM".to_owned(),
        "XXMR" => "XMR".to_owned(),
        "XXDG" | "XDG" => "DOGE".to_owned(),
        "XETC" => "ETC".to_owned(),
        "XZEC" => "ZEC".to_owned(),
        "ZEUR" => "EUR".to_owned(),
        "ZUSD" => "USD".to_owned(),
        "ZGBP" => "GBP".to_owned(),
        "ZJPY" => "JPY".to_owned(),
        "ZCAD" => "CAD".to_owned(),
        "ZAUD" => "AUD".to_owned(),
        "ZCHF" => "CHF".to_owned(),
        other if other.len() == 4 && (other.starts_with('X') || other.starts_with('Z')) => {
            other[1..].to_owned()
        }
        other => other.to_owned(),
    }
}

/// Split a Kraken pair such as `XXBTZEUR` or `DOTUSD` into base and quote.
pub fn parse_pair(pair: &str) -> (String, String) {
    const KNOWN_QUOTES: [&str; 16] = [
        "ZEUR", "ZUSD", "ZGBP", "ZCAD", "ZAUD", "ZJPY", "ZCHF", "XXBT", "XETH", "XBT", "EUR",
        "USD", "GBP", "CHF", "USDT", "USDC",
    ];
    for quote in KNOWN_QUOTES {
        if let Some(base) = pair.strip_suffix(quote)
            && !base.is_empty()
        {
            return (normalize_currency(base), normalize_currency(quote));
        }
    }
    let mid = if pair.len() > 6 { 4 } else { 3 }.min(pair.len());
    (normalize_currency(&pair[..mid]), normalize_currency(&pair[mid..]))
}

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TradesHistory {
    trades: HashMap<String, KrakenTrade>,
    count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KrakenTradeType {
    Buy,
    Sell,
}

/// Kraken trade record as returned by `TradesHistory`
#[derive(Debug, Deserialize)]
struct KrakenTrade {
    pair: String,
    time: f64,
    #[serde(rename = "type")]
    trade_type: KrakenTradeType,
    price: Decimal,
    fee: Decimal,
    vol: Decimal,
}

impl KrakenTrade {
    fn into_trade(self, txid: String) -> Trade {
        let (base, quote) = parse_pair(&self.pair);
        Trade {
            timestamp: self.time as Timestamp,
            location: "kraken".into(),
            base_asset: base,
            // Kraken charges spot fees in the quote currency.
            fee_currency: Some(quote.clone()),
            quote_asset: quote,
            trade_type: match self.trade_type {
                KrakenTradeType::Buy => TradeType::Buy,
                KrakenTradeType::Sell => TradeType::Sell,
            },
            amount: self.vol,
            rate: self.price,
            fee: Some(self.fee),
            link: Some(txid),
            notes: None,
        }
    }
}

/// Kraken private REST API client
pub struct Kraken {
    client: Client,
    api_key: String,
    secret: Vec<u8>,
}

impl Kraken {
    pub fn new(api_key: &str, secret: &str) -> Result<Self> {
        let secret = STANDARD
            .decode(secret.trim())
            .context("kraken secret must be base64")?;
        Ok(Kraken {
            client: mk_client(header::HeaderMap::new())?,
            api_key: api_key.to_string(),
            secret,
        })
    }

    fn nonce() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default()
    }

    /// `API-Sign`: HMAC-SHA512 over `path + SHA256(nonce + body)` keyed
    /// with the decoded secret.
    pub fn sign(&self, path: &str, nonce: &str, body: &str) -> Result<String> {
        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(body.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&self.secret)
            .map_err(|_| anyhow!("invalid kraken secret"))?;
        mac.update(path.as_bytes());
        mac.update(&digest);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn private<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
        let path = format!("/0/private/{method}");
        let url = format!("{BASE_URL}{path}");
        let resp: KrakenResponse<T> = send_json(|| {
            let nonce = Self::nonce().to_string();
            let mut body = format!("nonce={nonce}");
            for (key, value) in params {
                body.push_str(&format!("&{key}={value}"));
            }
            let signature = self.sign(&path, &nonce, &body)?;
            Ok(self
                .client
                .post(&url)
                .header("API-Key", &self.api_key)
                .header("API-Sign", signature)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body))
        })
        .await?;

        if !resp.error.is_empty() {
            bail!("kraken {method}: {}", resp.error.join(", "));
        }
        resp.result
            .with_context(|| format!("kraken {method}: empty result"))
    }
}

#[async_trait]
impl Exchange for Kraken {
    fn name(&self) -> &str {
        "kraken"
    }

    async fn validate_api_key(&self) -> (bool, String) {
        match self.private::<HashMap<String, Decimal>>("Balance", &[]).await {
            Ok(_) => (true, String::new()),
            Err(e) => (false, format!("{e:#}")),
        }
    }

    async fn query_online_trade_history(
        &self,
        start_ts: Timestamp,
        end_ts: Timestamp,
    ) -> Result<Vec<Trade>> {
        let mut trades = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: TradesHistory = self
                .private(
                    "TradesHistory",
                    &[
                        ("start", start_ts.to_string()),
                        ("end", end_ts.to_string()),
                        ("ofs", offset.to_string()),
                    ],
                )
                .await?;
            let received = page.trades.len();
            debug!("kraken: {} trade(s) at offset {} of {}", received, offset, page.count);
            trades.extend(
                page.trades
                    .into_iter()
                    .map(|(txid, trade)| trade.into_trade(txid)),
            );
            offset += received;
            if received < PAGE_SIZE || offset >= page.count {
                break;
            }
        }
        trades.sort_by_key(|t| t.timestamp);
        info!("kraken: fetched {} trade(s)", trades.len());
        Ok(trades)
    }

    async fn query_balances(&self) -> Result<BalanceSheet> {
        let raw: HashMap<String, Decimal> = self.private("Balance", &[]).await?;
        let mut sheet = BalanceSheet::default();
        for (code, amount) in raw {
            if amount.is_zero() {
                continue;
            }
            sheet
                .assets
                .entry(normalize_currency(&code))
                .or_insert_with(Balance::default)
                .amount += amount;
        }
        Ok(sheet)
    }
}
