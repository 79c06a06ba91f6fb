use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::account::{Account, AccountType};
use crate::chain::{BitcoinExplorer, Blockstream, EthereumExplorer, Etherscan, gas_fee_actions, held_nfts};
use crate::db::Buchfink;
use crate::exchange::{Exchange, get_exchange};
use crate::importers::zerion_csv;
use crate::model::{Balance, BalanceSheet, LedgerAction, Trade};
use crate::price::PriceOracle;
use crate::time::{EPOCH_END, EPOCH_START};

/// Kinds requested on the command line. No flag at all means every kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchLimits {
    pub actions: bool,
    pub balances: bool,
    pub trades: bool,
    pub nfts: bool,
}

impl FetchLimits {
    pub fn all() -> Self {
        FetchLimits::default()
    }

    pub fn only_trades() -> Self {
        FetchLimits {
            trades: true,
            ..Default::default()
        }
    }

    pub fn only_balances() -> Self {
        FetchLimits {
            balances: true,
            ..Default::default()
        }
    }

    fn unrestricted(&self) -> bool {
        !(self.actions || self.balances || self.trades || self.nfts)
    }

    /// What to fetch for `account`: the requested kinds narrowed by the
    /// account's own `fetch` settings.
    pub fn for_account(&self, account: &Account) -> FetchLimits {
        let config = account.fetch_config();
        let all = self.unrestricted();
        FetchLimits {
            actions: (all || self.actions) && config.actions,
            balances: (all || self.balances) && config.balances,
            trades: (all || self.trades) && config.trades,
            nfts: (all || self.nfts) && config.nfts,
        }
    }
}

type ExchangeFactory = dyn Fn(&Account) -> Result<Arc<dyn Exchange>> + Send + Sync;

/// The remote services a fetch talks to.
pub struct Connectors {
    pub exchange: Box<ExchangeFactory>,
    pub ethereum: Arc<dyn EthereumExplorer>,
    pub bitcoin: Arc<dyn BitcoinExplorer>,
    pub oracle: Arc<dyn PriceOracle>,
}

impl Connectors {
    pub fn live(db: &Buchfink) -> Result<Self> {
        let etherscan_key = db
            .config
            .settings
            .etherscan_api_key
            .clone()
            .or_else(|| std::env::var("ETHERSCAN_API_KEY").ok());
        Ok(Connectors {
            exchange: Box::new(get_exchange),
            ethereum: Arc::new(Etherscan::new(etherscan_key.as_deref())?),
            bitcoin: Arc::new(Blockstream::new()?),
            oracle: Arc::new(db.inquirer()?),
        })
    }
}

/// Keep the first trade for every `(location, link)`; trades without a
/// link are always kept.
pub fn dedup_trades(trades: Vec<Trade>) -> Vec<Trade> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::with_capacity(trades.len());
    for trade in trades {
        if let Some((location, link)) = trade.identity() {
            if !seen.insert((location.to_string(), link.to_string())) {
                warn!("Ignoring duplicate trade: {}", trade);
                continue;
            }
        }
        unique.push(trade);
    }
    unique
}

/// Fetch every account, `fetch_concurrency` at a time. Returns whether
/// any account failed.
pub async fn fetch(
    db: &Buchfink,
    accounts: Vec<Account>,
    limits: FetchLimits,
    connectors: Arc<Connectors>,
) -> Result<bool> {
    let _lock = db.lock()?;
    let db = Arc::new(db.clone());
    let sem = Arc::new(Semaphore::new(db.config.settings.fetch_concurrency.max(1)));

    let mut tasks = vec![];
    for account in accounts {
        let permit = sem.clone().acquire_owned().await?;
        let db = db.clone();
        let connectors = connectors.clone();
        let task = tokio::spawn(async move {
            let _p = permit;
            fetch_account(&db, &account, limits, &connectors).await
        });
        tasks.push(task);
    }

    let mut failed = false;
    for result in join_all(tasks).await {
        match result {
            Ok(ok) => failed |= !ok,
            Err(e) => {
                error!("fetch task panicked: {}", e);
                failed = true;
            }
        }
    }
    Ok(failed)
}

/// Fetch one account. Returns `false` when some part failed.
pub async fn fetch_account(
    db: &Buchfink,
    account: &Account,
    limits: FetchLimits,
    connectors: &Connectors,
) -> bool {
    let limits = limits.for_account(account);
    info!("Fetching data for {}", account.name);
    let mut ok = true;

    let exchange = if account.account_type == AccountType::Exchange && (limits.trades || limits.balances) {
        match (connectors.exchange)(account) {
            Ok(exchange) => Some(exchange),
            Err(e) => {
                error!("Cannot connect {}: {:#}", account.name, e);
                ok = false;
                None
            }
        }
    } else {
        None
    };

    if limits.actions
        && let Err(e) = fetch_actions(db, account, connectors).await
    {
        error!("Failed to fetch actions for {}: {:#}", account.name, e);
        ok = false;
    }

    if limits.trades
        && let Err(e) = fetch_trades(db, account, exchange.as_deref()).await
    {
        error!("Failed to fetch trades for {}: {:#}", account.name, e);
        ok = false;
    }

    if limits.balances {
        match fetch_balances(account, exchange.as_deref(), connectors).await {
            Ok(Some(sheet)) => {
                if let Err(e) = db.write_balances(&account.name, &sheet) {
                    error!("Failed to write balances for {}: {:#}", account.name, e);
                    ok = false;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Failed to fetch balances for {}: {:#}", account.name, e);
                ok = false;
            }
        }
    }

    if limits.nfts
        && account.account_type == AccountType::Ethereum
        && let Err(e) = fetch_nfts(db, account, connectors).await
    {
        error!("Failed to fetch NFTs for {}: {:#}", account.name, e);
        ok = false;
    }

    ok
}

async fn fetch_actions(db: &Buchfink, account: &Account, connectors: &Connectors) -> Result<()> {
    let mut actions: Vec<LedgerAction> = match (account.account_type, &account.address) {
        (AccountType::Ethereum, Some(address)) => {
            let txs = connectors.ethereum.transactions(address).await?;
            gas_fee_actions(address, &txs)?
        }
        _ => {
            debug!("No actions to fetch for {} account {}", account.account_type, account.name);
            vec![]
        }
    };

    let annotations = db.get_actions_from_file(&db.annotations_path(&account.name))?;
    if !annotations.is_empty() {
        debug!("Adding {} annotated action(s) to {}", annotations.len(), account.name);
    }
    actions.extend(annotations);

    if !actions.is_empty() {
        actions.sort_by_key(|a| a.timestamp);
        info!("Fetched {} action(s) for {}", actions.len(), account.name);
        db.write_actions(&account.name, &actions)?;
    }
    Ok(())
}

async fn fetch_trades(db: &Buchfink, account: &Account, exchange: Option<&dyn Exchange>) -> Result<()> {
    let mut trades: Vec<Trade> = match account.account_type {
        AccountType::Ethereum => zerion_csv::get_trades(db, account)?,
        AccountType::Exchange => match exchange {
            Some(exchange) => {
                let (valid, reason) = exchange.validate_api_key().await;
                if !valid {
                    return Err(crate::error::BuchfinkError::InvalidApiKey {
                        exchange: exchange.name().to_string(),
                        reason,
                    }
                    .into());
                }
                exchange
                    .query_online_trade_history(EPOCH_START, EPOCH_END)
                    .await
                    .with_context(|| format!("query {} trade history", exchange.name()))?
            }
            None => vec![],
        },
        _ => {
            debug!("No trades to fetch for {} account {}", account.account_type, account.name);
            vec![]
        }
    };

    // Fetched trades win over annotations with the same link.
    trades.extend(db.get_trades_from_file(&db.annotations_path(&account.name))?);
    let mut trades = dedup_trades(trades);
    trades.sort_by_key(|t| t.timestamp);

    if trades.is_empty() {
        db.remove_trades(&account.name)?;
    } else {
        info!("Fetched {} trade(s) for {}", trades.len(), account.name);
        db.write_trades(&account.name, &trades)?;
    }
    Ok(())
}

/// Current balances with USD values, or `None` for account types that
/// have no balance source.
async fn fetch_balances(
    account: &Account,
    exchange: Option<&dyn Exchange>,
    connectors: &Connectors,
) -> Result<Option<BalanceSheet>> {
    let mut sheet = BalanceSheet::default();
    match (account.account_type, &account.address) {
        (AccountType::Exchange, _) => match exchange {
            Some(exchange) => sheet = exchange.query_balances().await?,
            None => return Ok(None),
        },
        (AccountType::Ethereum, Some(address)) => {
            let amount = connectors.ethereum.balance(address).await?;
            if !amount.is_zero() {
                sheet.assets.insert("ETH".into(), Balance { amount, ..Default::default() });
            }
        }
        (AccountType::Bitcoin, Some(address)) => {
            let amount = connectors.bitcoin.balance(address).await?;
            if !amount.is_zero() {
                sheet.assets.insert("BTC".into(), Balance { amount, ..Default::default() });
            }
        }
        (AccountType::Manual, _) => {
            for entry in account.config.manual.iter().flatten() {
                let side = if entry.liability {
                    &mut sheet.liabilities
                } else {
                    &mut sheet.assets
                };
                side.entry(entry.asset.clone()).or_default().amount += entry.amount;
            }
        }
        _ => {
            debug!("No balances to fetch for {} account {}", account.account_type, account.name);
            return Ok(None);
        }
    }

    for (asset, balance) in sheet.assets.iter_mut().chain(sheet.liabilities.iter_mut()) {
        match connectors.oracle.find_usd_price(asset).await {
            Ok(price) => balance.usd_value = balance.amount * price,
            Err(e) => warn!("No USD price for {}: {:#}", asset, e),
        }
    }
    Ok(Some(sheet))
}

async fn fetch_nfts(db: &Buchfink, account: &Account, connectors: &Connectors) -> Result<()> {
    let Some(address) = &account.address else {
        return Ok(());
    };
    let transfers = connectors.ethereum.nft_transfers(address).await?;
    let nfts = held_nfts(address, &transfers);
    if !nfts.is_empty() {
        info!("Found {} NFT(s) for {}", nfts.len(), account.name);
        db.write_nfts(&account.name, &nfts)?;
    }
    Ok(())
}
