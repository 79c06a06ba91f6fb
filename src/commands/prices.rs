use std::process::ExitCode;

use anyhow::{Result, bail};
use rust_decimal::Decimal;
use tracing::{error, info};

use super::{fmt_amount, fmt_value};
use crate::db::Buchfink;
use crate::price::{PriceOracle, check_range};
use crate::time::{EPOCH_START, format_timestamp, now, parse_timestamp};
use crate::{CacheArgs, QuoteArgs};

/// A parsed `[AMOUNT] ASSET[/BASE]` request.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub amount: Decimal,
    pub asset: String,
    pub base: Option<String>,
}

/// Parse the quote arguments. Accepts `ETH`, `100 ETH`, `ETH/BTC`,
/// `2.5 ETH/BTC` and several assets at once (`ETH BTC`). An amount
/// applies to the asset that follows it.
pub fn parse_quote_request(tokens: &[String]) -> Result<Vec<QuoteRequest>> {
    let mut requests = vec![];
    let mut amount: Option<Decimal> = None;
    for token in tokens.iter().flat_map(|t| t.split_whitespace()) {
        if let Ok(value) = token.parse::<Decimal>() {
            if amount.replace(value).is_some() {
                bail!("two amounts in a row near '{token}'");
            }
            continue;
        }
        let (asset, base) = match token.split_once('/') {
            Some((asset, base)) if !asset.is_empty() && !base.is_empty() => {
                (asset, Some(base.to_uppercase()))
            }
            Some(_) => bail!("invalid pair '{token}'"),
            None => (token, None),
        };
        requests.push(QuoteRequest {
            amount: amount.take().unwrap_or(Decimal::ONE),
            asset: asset.to_uppercase(),
            base,
        });
    }
    if amount.is_some() {
        bail!("amount without asset");
    }
    if requests.is_empty() {
        bail!("nothing to quote");
    }
    Ok(requests)
}

pub async fn quote(db: &Buchfink, args: &QuoteArgs) -> Result<ExitCode> {
    let mut requests = parse_quote_request(&args.assets)?;
    if let Some(amount) = args.amount {
        for request in &mut requests {
            request.amount = amount;
        }
    }
    let timestamp = args.timestamp.as_deref().map(parse_timestamp).transpose()?;
    let default_base = args
        .base
        .clone()
        .unwrap_or_else(|| db.get_main_currency().to_string())
        .to_uppercase();
    let oracle = db.inquirer()?;

    let mut code = ExitCode::SUCCESS;
    for request in requests {
        let base = request.base.as_deref().unwrap_or(&default_base);
        let price = match timestamp {
            Some(ts) => oracle.historical_price(&request.asset, base, ts).await,
            None => oracle.current_price(&request.asset, base).await,
        };
        match price {
            Ok(price) => {
                let value = request.amount * price;
                let value = if db.assets.is_fiat(base) {
                    fmt_value(value)
                } else {
                    fmt_amount(value)
                };
                let at = timestamp.map(|ts| format!(" at {}", format_timestamp(ts)));
                println!(
                    "{} {} = {} {}{}",
                    fmt_amount(request.amount),
                    request.asset,
                    value,
                    base,
                    at.unwrap_or_default()
                );
            }
            Err(e) => {
                error!("No price for {}/{}: {:#}", request.asset, base, e);
                code = ExitCode::FAILURE;
            }
        }
    }
    Ok(code)
}

pub async fn cache(db: &Buchfink, args: &CacheArgs) -> Result<ExitCode> {
    let base = args
        .base
        .clone()
        .unwrap_or_else(|| db.get_main_currency().to_string())
        .to_uppercase();
    let start = args
        .from
        .as_deref()
        .map(parse_timestamp)
        .transpose()?
        .unwrap_or(EPOCH_START);
    let end = now();
    check_range(start, end)?;

    let gecko = db.coingecko()?;
    let cache = db.price_cache();
    let mut code = ExitCode::SUCCESS;
    for symbol in &args.assets {
        let asset = match db.assets.get_asset_by_symbol(symbol) {
            Ok(asset) => asset,
            Err(e) => {
                error!("{}", e);
                code = ExitCode::FAILURE;
                continue;
            }
        };
        match cache.update(&gecko, asset, &base, start, end, true).await {
            Ok(rows) => info!(
                "Cached {} new day(s) of {}/{} in {}",
                rows,
                asset.symbol,
                base,
                cache.path(&asset.symbol, &base).display()
            ),
            Err(e) => {
                error!("Could not cache {}/{}: {:#}", asset.symbol, base, e);
                code = ExitCode::FAILURE;
            }
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn parse(args: &[&str]) -> Result<Vec<QuoteRequest>> {
        let tokens: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_quote_request(&tokens)
    }

    fn request(amount: Decimal, asset: &str, base: Option<&str>) -> QuoteRequest {
        QuoteRequest {
            amount,
            asset: asset.into(),
            base: base.map(str::to_string),
        }
    }

    #[test]
    fn short_forms() {
        assert_eq!(parse(&["eth"]).unwrap(), vec![request(dec!(1), "ETH", None)]);
        assert_eq!(parse(&["100", "ETH"]).unwrap(), vec![request(dec!(100), "ETH", None)]);
        assert_eq!(parse(&["100 ETH"]).unwrap(), vec![request(dec!(100), "ETH", None)]);
        assert_eq!(
            parse(&["ETH/btc"]).unwrap(),
            vec![request(dec!(1), "ETH", Some("BTC"))]
        );
        assert_eq!(
            parse(&["2.5 ETH/BTC"]).unwrap(),
            vec![request(dec!(2.5), "ETH", Some("BTC"))]
        );
    }

    #[test]
    fn several_assets() {
        assert_eq!(
            parse(&["ETH", "3", "BTC"]).unwrap(),
            vec![request(dec!(1), "ETH", None), request(dec!(3), "BTC", None)]
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["100"]).is_err());
        assert!(parse(&["1", "2", "ETH"]).is_err());
        assert!(parse(&["ETH/"]).is_err());
    }
}
