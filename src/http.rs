use std::time::Duration;

use anyhow::{Result, bail};
use reqwest::{Client, RequestBuilder, header};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::info;

const USER_AGENT: &str = concat!("buchfink/", env!("CARGO_PKG_VERSION"), " (rust)");
const MAX_ATTEMPTS: usize = 6;

/// Make an HTTP client with the given default headers
pub fn mk_client(headers: header::HeaderMap) -> Result<Client> {
    let client = Client::builder()
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

/// Core HTTP GET with retry/backoff (+Retry-After)
pub async fn do_get_json<T: DeserializeOwned>(client: &Client, url: reqwest::Url) -> Result<T> {
    send_json(|| Ok(client.get(url.clone()))).await
}

/// Send the request built by `request` until it succeeds, backing off on
/// failures and honoring `Retry-After`.
pub async fn send_json<T, F>(request: F) -> Result<T>
where
    T: DeserializeOwned,
    F: Fn() -> Result<RequestBuilder>,
{
    let mut attempt = 0usize;
    loop {
        let resp = request()?.send().await?;
        if resp.status().is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        attempt += 1;
        if attempt >= MAX_ATTEMPTS || status.is_client_error() && status.as_u16() != 429 {
            let txt = resp.text().await.unwrap_or_default();
            bail!("HTTP {} after {} attempt(s); body: {}", status, attempt, txt);
        }
        let backoff_ms = retry_after
            .map(|s| s * 1000)
            .unwrap_or(300 * attempt as u64);
        info!("{} -> retrying in {}ms", status, backoff_ms);
        sleep(Duration::from_millis(backoff_ms)).await;
    }
}
