use std::collections::HashMap;

use crate::config::AssetConfig;
use crate::error::BuchfinkError;

pub const ERC20_PREFIX: &str = "eip155:1/erc20:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub symbol: String,
    pub name: String,
    pub coingecko: Option<String>,
    pub address: Option<String>,
    pub fiat: bool,
}

// symbol, name, coingecko id
const CRYPTO: &[(&str, &str, &str)] = &[
    ("BTC", "Bitcoin", "bitcoin"),
    ("ETH", "Ether", "ethereum"),
    ("USDT", "Tether", "tether"),
    ("USDC", "USD Coin", "usd-coin"),
    ("DAI", "Dai", "dai"),
    ("BNB", "BNB", "binancecoin"),
    ("SOL", "Solana", "solana"),
    ("ADA", "Cardano", "cardano"),
    ("DOT", "Polkadot", "polkadot"),
    ("XRP", "XRP", "ripple"),
    ("LTC", "Litecoin", "litecoin"),
    ("XLM", "Stellar", "stellar"),
    ("XMR", "Monero", "monero"),
    ("DOGE", "Dogecoin", "dogecoin"),
    ("LINK", "Chainlink", "chainlink"),
    ("UNI", "Uniswap", "uniswap"),
    ("AAVE", "Aave", "aave"),
    ("MKR", "Maker", "maker"),
    ("COMP", "Compound", "compound-governance-token"),
    ("SUSHI", "Sushi", "sushi"),
    ("MATIC", "Polygon", "matic-network"),
    ("ATOM", "Cosmos Hub", "cosmos"),
    ("WBTC", "Wrapped Bitcoin", "wrapped-bitcoin"),
    ("WETH", "Wrapped Ether", "weth"),
    ("ZEC", "Zcash", "zcash"),
    ("ETC", "Ethereum Classic", "ethereum-classic"),
];

const FIAT: &[(&str, &str)] = &[
    ("EUR", "Euro"),
    ("USD", "US Dollar"),
    ("GBP", "British Pound"),
    ("CHF", "Swiss Franc"),
    ("JPY", "Japanese Yen"),
    ("CAD", "Canadian Dollar"),
    ("AUD", "Australian Dollar"),
];

/// Known assets: a built-in table extended by the `assets` config section.
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    by_symbol: HashMap<String, AssetInfo>,
    by_address: HashMap<String, String>,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl AssetRegistry {
    pub fn new(extra: &[AssetConfig]) -> Self {
        let mut registry = AssetRegistry {
            by_symbol: HashMap::new(),
            by_address: HashMap::new(),
        };
        for (symbol, name, id) in CRYPTO {
            registry.insert(AssetInfo {
                symbol: symbol.to_string(),
                name: name.to_string(),
                coingecko: Some(id.to_string()),
                address: None,
                fiat: false,
            });
        }
        for (symbol, name) in FIAT {
            registry.insert(AssetInfo {
                symbol: symbol.to_string(),
                name: name.to_string(),
                coingecko: None,
                address: None,
                fiat: true,
            });
        }
        for asset in extra {
            registry.insert(AssetInfo {
                symbol: asset.symbol.clone(),
                name: asset.name.clone().unwrap_or_else(|| asset.symbol.clone()),
                coingecko: asset.coingecko.clone(),
                address: asset.address.clone(),
                fiat: asset.fiat,
            });
        }
        registry
    }

    fn insert(&mut self, info: AssetInfo) {
        if let Some(address) = &info.address {
            self.by_address
                .insert(address.to_lowercase(), info.symbol.to_uppercase());
        }
        self.by_symbol.insert(info.symbol.to_uppercase(), info);
    }

    /// Resolve a symbol (case-insensitive) or an `eip155:1/erc20:<address>`
    /// identifier.
    pub fn get_asset_by_symbol(&self, symbol: &str) -> Result<&AssetInfo, BuchfinkError> {
        let key = match symbol.strip_prefix(ERC20_PREFIX) {
            Some(address) => self
                .by_address
                .get(&address.to_lowercase())
                .cloned()
                .ok_or_else(|| BuchfinkError::UnknownAsset(symbol.to_string()))?,
            None => symbol.to_uppercase(),
        };
        self.by_symbol
            .get(&key)
            .ok_or_else(|| BuchfinkError::UnknownAsset(symbol.to_string()))
    }

    /// Like `get_asset_by_symbol` but never fails; unknown symbols come
    /// back as bare entries without a price source.
    pub fn lookup_or_adhoc(&self, symbol: &str) -> AssetInfo {
        self.get_asset_by_symbol(symbol)
            .cloned()
            .unwrap_or_else(|_| AssetInfo {
                symbol: symbol.to_string(),
                name: symbol.to_string(),
                coingecko: None,
                address: None,
                fiat: false,
            })
    }

    pub fn is_fiat(&self, symbol: &str) -> bool {
        self.get_asset_by_symbol(symbol)
            .map(|a| a.fiat)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_symbols_case_insensitively() {
        let registry = AssetRegistry::default();
        assert_eq!(registry.get_asset_by_symbol("eth").unwrap().name, "Ether");
        assert!(registry.is_fiat("EUR"));
        assert!(!registry.is_fiat("BTC"));
        assert!(matches!(
            registry.get_asset_by_symbol("NOPE"),
            Err(BuchfinkError::UnknownAsset(_))
        ));
    }

    #[test]
    fn resolves_configured_token_addresses() {
        let registry = AssetRegistry::new(&[AssetConfig {
            symbol: "GRT".into(),
            name: Some("The Graph".into()),
            coingecko: Some("the-graph".into()),
            address: Some("0xC944E90C64B2c07662A292be6244BDf05Cda44a7".into()),
            fiat: false,
        }]);
        let asset = registry
            .get_asset_by_symbol("eip155:1/erc20:0xc944e90c64b2c07662a292be6244bdf05cda44a7")
            .unwrap();
        assert_eq!(asset.symbol, "GRT");
        assert!(registry.get_asset_by_symbol("eip155:1/erc20:0xdead").is_err());
    }

    #[test]
    fn adhoc_lookup_keeps_symbol() {
        let registry = AssetRegistry::default();
        let asset = registry.lookup_or_adhoc("FOO");
        assert_eq!(asset.name, "FOO");
        assert!(asset.coingecko.is_none());
    }
}
