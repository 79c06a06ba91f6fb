use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::account::Account;
use crate::asset::AssetRegistry;
use crate::config::{CONFIG_FILE, Config, ReportConfig};
use crate::error::BuchfinkError;
use crate::model::{BalanceSheet, LedgerAction, Nft, Trade};
use crate::price::{CoinGecko, Inquirer, ManualPrices, PriceCache};
use crate::serialization::{BalancesFile, actions_to_yaml, parse_snapshot, trades_to_yaml};

const INIT_CONFIG: &str = include_str!("data/init/buchfink.yaml");
const INIT_REPORT_TEMPLATE: &str = include_str!("data/init/report.html");

const LOCK_FILE: &str = ".buchfink.lock";

/// A buchfink data directory: the config plus the YAML snapshots next to it.
#[derive(Debug, Clone)]
pub struct Buchfink {
    pub config: Config,
    pub config_path: PathBuf,
    pub data_directory: PathBuf,
    pub assets: AssetRegistry,
}

impl Buchfink {
    pub fn open(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::load(&config_path)?;
        let data_directory = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let assets = AssetRegistry::new(&config.assets);
        let db = Buchfink {
            config,
            config_path,
            data_directory,
            assets,
        };
        for dir in [
            db.trades_directory(),
            db.actions_directory(),
            db.balances_directory(),
            db.reports_directory(),
            db.annotations_directory(),
            db.cache_directory(),
        ] {
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(db)
    }

    /// Write the starter config and report template into `directory`.
    pub fn init(directory: &Path) -> Result<Self> {
        let target_config = directory.join(CONFIG_FILE);
        if target_config.exists() {
            return Err(BuchfinkError::AlreadyInitialized(directory.display().to_string()).into());
        }
        fs::create_dir_all(directory)?;
        for (name, contents) in [(CONFIG_FILE, INIT_CONFIG), ("report.html", INIT_REPORT_TEMPLATE)] {
            debug!("Copying {}", name);
            write_atomic(&directory.join(name), contents)?;
        }
        Self::open(target_config)
    }

    pub fn trades_directory(&self) -> PathBuf {
        self.data_directory.join("trades")
    }

    pub fn actions_directory(&self) -> PathBuf {
        self.data_directory.join("actions")
    }

    pub fn balances_directory(&self) -> PathBuf {
        self.data_directory.join("balances")
    }

    pub fn reports_directory(&self) -> PathBuf {
        self.data_directory.join("reports")
    }

    pub fn annotations_directory(&self) -> PathBuf {
        self.data_directory.join("annotations")
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.data_directory.join("cache")
    }

    pub fn zerion_directory(&self) -> PathBuf {
        self.data_directory.join("zerion")
    }

    pub fn get_all_accounts(&self) -> Result<Vec<Account>> {
        self.config.accounts.iter().map(Account::from_config).collect()
    }

    pub fn get_account(&self, name: &str) -> Result<Account> {
        self.get_all_accounts()?
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| BuchfinkError::UnknownAccount(name.to_string()).into())
    }

    pub fn get_all_reports(&self) -> Vec<ReportConfig> {
        self.config.reports.clone()
    }

    pub fn get_main_currency(&self) -> &str {
        &self.config.settings.main_currency
    }

    /// The `prices` section as lookup table.
    pub fn manual_prices(&self) -> ManualPrices {
        ManualPrices::from_config(&self.config.prices)
    }

    pub fn price_cache(&self) -> PriceCache {
        PriceCache::new(self.cache_directory())
    }

    /// CoinGecko client, on the pro endpoint when an API key is configured.
    pub fn coingecko(&self) -> Result<CoinGecko> {
        let api_key = self
            .config
            .settings
            .coingecko_api_key
            .clone()
            .or_else(|| std::env::var("COINGECKO_API_KEY").ok());
        CoinGecko::new(api_key.as_deref())
    }

    /// Price oracle over manual prices, the cache and CoinGecko.
    pub fn inquirer(&self) -> Result<Inquirer> {
        Ok(Inquirer::new(
            self.manual_prices(),
            self.price_cache(),
            Some(self.coingecko()?),
            self.assets.clone(),
        ))
    }

    pub fn annotations_path(&self, account_name: &str) -> PathBuf {
        self.annotations_directory().join(format!("{account_name}.yaml"))
    }

    pub fn trades_path(&self, account_name: &str) -> PathBuf {
        self.trades_directory().join(format!("{account_name}.yaml"))
    }

    pub fn actions_path(&self, account_name: &str) -> PathBuf {
        self.actions_directory().join(format!("{account_name}.yaml"))
    }

    pub fn balances_path(&self, account_name: &str) -> PathBuf {
        self.balances_directory().join(format!("{account_name}.yaml"))
    }

    pub fn get_trades_from_file(&self, path: &Path) -> Result<Vec<Trade>> {
        Ok(read_snapshot(path)?.0)
    }

    pub fn get_actions_from_file(&self, path: &Path) -> Result<Vec<LedgerAction>> {
        Ok(read_snapshot(path)?.1)
    }

    /// Trades stored for the account by the last `fetch`.
    pub fn get_local_trades_for_account(&self, account_name: &str) -> Result<Vec<Trade>> {
        self.get_trades_from_file(&self.trades_path(account_name))
    }

    /// Ledger actions stored for the account by the last `fetch`.
    pub fn get_local_ledger_actions_for_account(
        &self,
        account_name: &str,
    ) -> Result<Vec<LedgerAction>> {
        self.get_actions_from_file(&self.actions_path(account_name))
    }

    pub fn write_trades(&self, account_name: &str, trades: &[Trade]) -> Result<()> {
        write_atomic(&self.trades_path(account_name), &trades_to_yaml(trades)?)
    }

    /// Drop the trades file so stale trades do not outlive an empty fetch.
    pub fn remove_trades(&self, account_name: &str) -> Result<()> {
        let path = self.trades_path(account_name);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }

    pub fn write_actions(&self, account_name: &str, actions: &[LedgerAction]) -> Result<()> {
        write_atomic(&self.actions_path(account_name), &actions_to_yaml(actions)?)
    }

    fn read_balances_file(&self, account_name: &str) -> Result<BalancesFile> {
        let path = self.balances_path(account_name);
        if !path.exists() {
            return Ok(BalancesFile::default());
        }
        let text = fs::read_to_string(&path)?;
        let file: Option<BalancesFile> =
            serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(file.unwrap_or_default())
    }

    pub fn get_balances(&self, account_name: &str) -> Result<BalanceSheet> {
        Ok(self.read_balances_file(account_name)?.sheet)
    }

    pub fn get_nfts(&self, account_name: &str) -> Result<Vec<Nft>> {
        Ok(self.read_balances_file(account_name)?.nfts.unwrap_or_default())
    }

    /// Replace the balances of an account, keeping any stored NFTs.
    pub fn write_balances(&self, account_name: &str, sheet: &BalanceSheet) -> Result<()> {
        let mut file = self.read_balances_file(account_name)?;
        file.sheet = sheet.clone();
        write_atomic(&self.balances_path(account_name), &serde_yaml::to_string(&file)?)
    }

    /// Merge the NFT list into the account's balances file.
    pub fn write_nfts(&self, account_name: &str, nfts: &[Nft]) -> Result<()> {
        let mut file = self.read_balances_file(account_name)?;
        file.nfts = Some(nfts.to_vec());
        write_atomic(&self.balances_path(account_name), &serde_yaml::to_string(&file)?)
    }

    /// Exclusive lock on the data directory; held until the file is dropped.
    pub fn lock(&self) -> Result<File> {
        acquire_lock(&self.data_directory.join(LOCK_FILE))
    }
}

fn read_snapshot(path: &Path) -> Result<(Vec<Trade>, Vec<LedgerAction>)> {
    if !path.exists() {
        return Ok((vec![], vec![]));
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_snapshot(&text).with_context(|| format!("parse {}", path.display()))
}

/// Write to a temp file next to `path`, then rename over it.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).ok();
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Acquire an exclusive file lock; keep the file handle alive to hold the lock.
pub fn acquire_lock(lock_path: &Path) -> Result<File> {
    fs::create_dir_all(lock_path.parent().unwrap_or(Path::new("."))).ok();
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(lock_path)?;
    file.lock_exclusive()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Balance;
    use rust_decimal::Decimal;

    #[test]
    fn init_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db = Buchfink::init(dir.path()).unwrap();
        assert!(db.trades_directory().is_dir());
        assert!(dir.path().join("report.html").exists());
        assert_eq!(db.get_all_accounts().unwrap()[0].name, "example");

        let err = Buchfink::init(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuchfinkError>(),
            Some(BuchfinkError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn missing_snapshots_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = Buchfink::init(dir.path()).unwrap();
        assert!(db.get_local_trades_for_account("nobody").unwrap().is_empty());
        assert!(db.get_local_ledger_actions_for_account("nobody").unwrap().is_empty());
        assert!(db.get_balances("nobody").unwrap().is_empty());
        assert!(db.get_account("nobody").is_err());
    }

    #[test]
    fn balances_and_nfts_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Buchfink::init(dir.path()).unwrap();

        let nfts = vec![Nft {
            id: "0xabc/1".into(),
            name: "Punk #1".into(),
            collection: None,
        }];
        db.write_nfts("wallet", &nfts).unwrap();

        let mut sheet = BalanceSheet::default();
        sheet.assets.insert(
            "ETH".into(),
            Balance {
                amount: Decimal::new(15, 1),
                usd_value: Decimal::from(3000),
            },
        );
        db.write_balances("wallet", &sheet).unwrap();

        assert_eq!(db.get_balances("wallet").unwrap(), sheet);
        assert_eq!(db.get_nfts("wallet").unwrap(), nfts);
    }

    #[test]
    fn remove_trades_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Buchfink::init(dir.path()).unwrap();
        db.write_trades("acc", &[]).unwrap();
        assert!(db.trades_path("acc").exists());
        db.remove_trades("acc").unwrap();
        db.remove_trades("acc").unwrap();
        assert!(!db.trades_path("acc").exists());
    }
}
