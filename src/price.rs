//! Price lookups: manual quotes from the config, a local CSV cache of daily
//! prices and the CoinGecko API, chained behind [`PriceOracle`].

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use itertools::Itertools;
use reqwest::{Client, header};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::asset::{AssetInfo, AssetRegistry};
use crate::config::ManualPriceConfig;
use crate::error::BuchfinkError;
use crate::http::{do_get_json, mk_client};
use crate::time::{Timestamp, day_start, to_date};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one unit of `from` in `to`, now.
    async fn current_price(&self, from: &str, to: &str) -> Result<Decimal>;

    /// Price of one unit of `from` in `to` at `timestamp`.
    async fn historical_price(&self, from: &str, to: &str, timestamp: Timestamp)
    -> Result<Decimal>;

    async fn find_usd_price(&self, asset: &str) -> Result<Decimal> {
        self.current_price(asset, "USD").await
    }
}

fn same_asset(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[derive(Debug, Clone)]
pub struct ManualPrice {
    pub from: String,
    pub to: String,
    pub price: Decimal,
    pub timestamp: Option<Timestamp>,
}

/// The `prices` section of the config.
#[derive(Debug, Clone, Default)]
pub struct ManualPrices {
    prices: Vec<ManualPrice>,
}

impl ManualPrices {
    pub fn new(prices: Vec<ManualPrice>) -> Self {
        ManualPrices { prices }
    }

    pub fn from_config(config: &[ManualPriceConfig]) -> Self {
        Self::new(
            config
                .iter()
                .map(|p| ManualPrice {
                    from: p.from.clone(),
                    to: p.to.clone(),
                    price: p.price,
                    timestamp: p.timestamp,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Quotes for the pair, inverted when only the opposite direction is
    /// configured.
    fn quotes<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> impl Iterator<Item = (Option<Timestamp>, Decimal)> + 'a {
        self.prices.iter().filter_map(move |p| {
            if same_asset(&p.from, from) && same_asset(&p.to, to) {
                Some((p.timestamp, p.price))
            } else if same_asset(&p.from, to) && same_asset(&p.to, from) && !p.price.is_zero() {
                Some((p.timestamp, Decimal::ONE / p.price))
            } else {
                None
            }
        })
    }

    /// An undated quote, or else the most recent dated one.
    pub fn current(&self, from: &str, to: &str) -> Option<Decimal> {
        let quotes: Vec<_> = self.quotes(from, to).collect();
        quotes
            .iter()
            .find(|(ts, _)| ts.is_none())
            .or_else(|| quotes.iter().max_by_key(|(ts, _)| *ts))
            .map(|(_, price)| *price)
    }

    /// The latest dated quote at or before `timestamp`.
    pub fn historical(&self, from: &str, to: &str, timestamp: Timestamp) -> Option<Decimal> {
        self.quotes(from, to)
            .filter_map(|(ts, price)| ts.map(|ts| (ts, price)))
            .filter(|(ts, _)| *ts <= timestamp)
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, price)| price)
    }
}

/// In-memory normalized daily row
#[derive(Clone, Debug, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Deserialize)]
struct CacheRow {
    date: NaiveDate,
    close: String,
}

/// Daily closes stored as `cache/<ASSET>_<BASE>.csv`.
#[derive(Debug)]
pub struct PriceCache {
    directory: PathBuf,
    loaded: Mutex<HashMap<PathBuf, BTreeMap<NaiveDate, Decimal>>>,
}

impl PriceCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        PriceCache {
            directory: directory.into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, from: &str, to: &str) -> PathBuf {
        self.directory
            .join(format!("{}_{}.csv", from.to_uppercase(), to.to_uppercase()))
    }

    pub fn lookup(&self, from: &str, to: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let path = self.path(from, to);
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| anyhow::anyhow!("price cache lock poisoned"))?;
        if !loaded.contains_key(&path) {
            let closes = read_closes(&path)?;
            loaded.insert(path.clone(), closes);
        }
        Ok(loaded.get(&path).and_then(|closes| closes.get(&date)).copied())
    }

    /// Latest day with a close on disk. Unparsable rows are an error so
    /// that `update` never appends to a damaged file.
    pub fn last_cached_day(&self, from: &str, to: &str) -> Result<Option<NaiveDate>> {
        let closes = read_closes(&self.path(from, to))?;
        Ok(closes.last_key_value().map(|(date, _)| *date))
    }

    /// Append the days after the last cached one. Without `resume`, or
    /// without a file yet, a fresh file replaces the old one atomically.
    pub async fn update(
        &self,
        gecko: &CoinGecko,
        asset: &AssetInfo,
        base: &str,
        start_ts: Timestamp,
        end_ts: Timestamp,
        resume: bool,
    ) -> Result<usize> {
        let coin_id = asset
            .coingecko
            .as_deref()
            .ok_or_else(|| BuchfinkError::UnknownAsset(asset.symbol.clone()))?;
        let out_path = self.path(&asset.symbol, base);
        fs::create_dir_all(&self.directory).ok();

        let mut eff_start_ts = start_ts;
        let last_date = if resume {
            self.last_cached_day(&asset.symbol, base)?
        } else {
            None
        };
        if let Some(ld) = last_date
            && let Some(next) = ld.succ_opt()
        {
            eff_start_ts = day_start(next);
            if eff_start_ts > end_ts {
                info!("{} up-to-date through {}; skipping", asset.symbol, ld);
                return Ok(0);
            }
        }

        let mut rows = gecko
            .fetch_daily_bars(coin_id, base, eff_start_ts, end_ts)
            .await?;

        if let Some(ld) = last_date {
            rows.retain(|r| r.date > ld);
        }

        if rows.is_empty() {
            info!("{} no new rows", asset.symbol);
            return Ok(0);
        }
        let written = rows.len();

        if out_path.exists() && resume {
            // append without headers
            let mut f = fs::OpenOptions::new().append(true).open(&out_path)?;
            for r in rows {
                writeln!(
                    f,
                    "{},{:.8},{:.8},{:.8},{:.8}",
                    r.date.format("%Y-%m-%d"),
                    r.open,
                    r.high,
                    r.low,
                    r.close
                )?;
            }
            f.flush()?;
        } else {
            // write fresh file to temp, then rename
            let mut tmp = NamedTempFile::new_in(&self.directory)?;
            {
                let mut wtr = WriterBuilder::new().from_writer(tmp.as_file_mut());
                wtr.write_record(["date", "open", "high", "low", "close"])?;
                for r in rows {
                    wtr.write_record(&[
                        r.date.format("%Y-%m-%d").to_string(),
                        format!("{:.8}", r.open),
                        format!("{:.8}", r.high),
                        format!("{:.8}", r.low),
                        format!("{:.8}", r.close),
                    ])?;
                }
                wtr.flush()?;
            }
            tmp.persist(&out_path)?;
        }

        if let Ok(mut loaded) = self.loaded.lock() {
            loaded.remove(&out_path);
        }
        info!("wrote {}", out_path.display());
        Ok(written)
    }
}

fn read_closes(path: &Path) -> Result<BTreeMap<NaiveDate, Decimal>> {
    let mut closes = BTreeMap::new();
    if !path.exists() {
        return Ok(closes);
    }
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    for rec in rdr.deserialize::<CacheRow>() {
        let row = rec.with_context(|| format!("read {}", path.display()))?;
        let close: Decimal = row
            .close
            .parse()
            .with_context(|| format!("bad close {:?} in {}", row.close, path.display()))?;
        closes.insert(row.date, close);
    }
    Ok(closes)
}

/// Group `[timestamp_ms, price]` points into one bar per UTC day.
pub fn daily_bars(mut points: Vec<(f64, f64)>) -> Vec<DailyBar> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut out = vec![];
    for (date, group) in &points.into_iter().chunk_by(|p| {
        let ts = (p.0 / 1000.0) as i64; // ms -> s
        to_date(ts)
    }) {
        let prices: Vec<f64> = group.map(|p| p.1).collect();
        let (Some(open), Some(close)) = (prices.first(), prices.last()) else {
            continue;
        };
        out.push(DailyBar {
            date,
            open: *open,
            high: prices.iter().copied().fold(f64::MIN, f64::max),
            low: prices.iter().copied().fold(f64::MAX, f64::min),
            close: *close,
        });
    }
    out
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).with_context(|| format!("price {value} out of range"))
}

/// CoinGecko REST client. Uses the pro endpoint when an API key is given.
pub struct CoinGecko {
    client: Client,
    base: &'static str,
    request_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct CoinHistory {
    market_data: Option<CoinHistoryMarketData>,
}

#[derive(Debug, Deserialize)]
struct CoinHistoryMarketData {
    current_price: HashMap<String, f64>,
}

impl CoinGecko {
    pub fn new(api_key: Option<&str>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let base = match api_key {
            Some(key) => {
                headers.insert("x-cg-pro-api-key", header::HeaderValue::from_str(key)?);
                "https://pro-api.coingecko.com/api/v3"
            }
            None => "https://api.coingecko.com/api/v3",
        };
        Ok(CoinGecko {
            client: mk_client(headers)?,
            base,
            request_delay: Duration::from_millis(if api_key.is_some() { 250 } else { 2500 }),
        })
    }

    pub async fn simple_price(&self, coin_id: &str, vs: &str) -> Result<Option<Decimal>> {
        let vs = vs.to_lowercase();
        let url = reqwest::Url::parse_with_params(
            &format!("{}/simple/price", self.base),
            &[("ids", coin_id), ("vs_currencies", vs.as_str())],
        )?;
        let resp: HashMap<String, HashMap<String, f64>> = do_get_json(&self.client, url).await?;
        resp.get(coin_id)
            .and_then(|prices| prices.get(&vs))
            .map(|p| to_decimal(*p))
            .transpose()
    }

    pub async fn history(&self, coin_id: &str, vs: &str, date: NaiveDate) -> Result<Option<Decimal>> {
        let vs = vs.to_lowercase();
        let url = reqwest::Url::parse_with_params(
            &format!("{}/coins/{}/history", self.base, coin_id),
            &[
                ("date", date.format("%d-%m-%Y").to_string()),
                ("localization", "false".to_string()),
            ],
        )?;
        let resp: CoinHistory = do_get_json(&self.client, url).await?;
        resp.market_data
            .and_then(|m| m.current_price.get(&vs).copied())
            .map(to_decimal)
            .transpose()
    }

    /// Return normalized daily bars for [`from_ts..=to_ts`], deduped per date
    pub async fn fetch_daily_bars(
        &self,
        coin_id: &str,
        vs: &str,
        from_ts: Timestamp,
        to_ts: Timestamp,
    ) -> Result<Vec<DailyBar>> {
        let vs = vs.to_lowercase();
        let one_day = 86_400i64;
        let max_days = 365i64;
        let mut cur_from = from_ts;
        let mut points: Vec<(f64, f64)> = vec![];

        while cur_from < to_ts {
            let cur_to = (cur_from + max_days * one_day).min(to_ts);
            let url = reqwest::Url::parse_with_params(
                &format!("{}/coins/{}/market_chart/range", self.base, coin_id),
                &[
                    ("vs_currency", vs.clone()),
                    ("from", cur_from.to_string()),
                    ("to", cur_to.to_string()),
                ],
            )?;
            let chart: MarketChart = do_get_json(&self.client, url).await?;
            debug!("{} {}: {} points", coin_id, vs, chart.prices.len());
            points.extend(chart.prices);
            sleep(self.request_delay).await;
            cur_from = cur_to + 1;
        }
        Ok(daily_bars(points))
    }
}

/// Price oracle chaining manual prices, the local cache and CoinGecko.
pub struct Inquirer {
    manual: ManualPrices,
    cache: PriceCache,
    provider: Option<CoinGecko>,
    assets: AssetRegistry,
    memo: Mutex<HashMap<(String, String, Option<NaiveDate>), Decimal>>,
}

impl Inquirer {
    pub fn new(
        manual: ManualPrices,
        cache: PriceCache,
        provider: Option<CoinGecko>,
        assets: AssetRegistry,
    ) -> Self {
        Inquirer {
            manual,
            cache,
            provider,
            assets,
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn memo_get(&self, key: &(String, String, Option<NaiveDate>)) -> Option<Decimal> {
        self.memo.lock().ok().and_then(|m| m.get(key).copied())
    }

    fn memo_put(&self, key: (String, String, Option<NaiveDate>), price: Decimal) {
        if let Ok(mut m) = self.memo.lock() {
            m.insert(key, price);
        }
    }

    async fn query_provider(
        &self,
        from: &str,
        to: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<Decimal>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        let from_info = self.assets.lookup_or_adhoc(from);
        match &from_info.coingecko {
            Some(id) => match date {
                Some(date) => provider.history(id, to, date).await,
                None => provider.simple_price(id, to).await,
            },
            // Fiat (or unmapped) source: go through bitcoin.
            None if from_info.fiat => {
                let btc_to = match date {
                    Some(date) => provider.history("bitcoin", to, date).await?,
                    None => provider.simple_price("bitcoin", to).await?,
                };
                let btc_from = match date {
                    Some(date) => provider.history("bitcoin", from, date).await?,
                    None => provider.simple_price("bitcoin", from).await?,
                };
                Ok(match (btc_to, btc_from) {
                    (Some(t), Some(f)) if !f.is_zero() => Some(t / f),
                    _ => None,
                })
            }
            None => Ok(None),
        }
    }

    fn no_price(from: &str, to: &str, timestamp: Timestamp) -> anyhow::Error {
        BuchfinkError::NoPriceForGivenTimestamp {
            from: from.to_string(),
            to: to.to_string(),
            timestamp,
        }
        .into()
    }
}

#[async_trait]
impl PriceOracle for Inquirer {
    async fn current_price(&self, from: &str, to: &str) -> Result<Decimal> {
        if same_asset(from, to) {
            return Ok(Decimal::ONE);
        }
        if let Some(price) = self.manual.current(from, to) {
            return Ok(price);
        }
        let key = (from.to_uppercase(), to.to_uppercase(), None);
        if let Some(price) = self.memo_get(&key) {
            return Ok(price);
        }
        match self.query_provider(from, to, None).await? {
            Some(price) => {
                self.memo_put(key, price);
                Ok(price)
            }
            None => Err(Self::no_price(from, to, crate::time::now())),
        }
    }

    async fn historical_price(
        &self,
        from: &str,
        to: &str,
        timestamp: Timestamp,
    ) -> Result<Decimal> {
        if same_asset(from, to) {
            return Ok(Decimal::ONE);
        }
        if let Some(price) = self.manual.historical(from, to, timestamp) {
            return Ok(price);
        }
        let date = to_date(timestamp);
        if let Some(price) = self.cache.lookup(from, to, date)? {
            return Ok(price);
        }
        let key = (from.to_uppercase(), to.to_uppercase(), Some(date));
        if let Some(price) = self.memo_get(&key) {
            return Ok(price);
        }
        match self.query_provider(from, to, Some(date)).await {
            Ok(Some(price)) => {
                self.memo_put(key, price);
                Ok(price)
            }
            Ok(None) => Err(Self::no_price(from, to, timestamp)),
            Err(e) => Err(e.context(Self::no_price(from, to, timestamp))),
        }
    }
}

/// Refuse obviously wrong ranges before hitting the network.
pub fn check_range(start_ts: Timestamp, end_ts: Timestamp) -> Result<()> {
    if end_ts <= start_ts {
        bail!("end must be after start");
    }
    Ok(())
}
