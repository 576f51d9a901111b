//! Network identity and the per-chain deployment table.

use std::{collections::BTreeMap, fs, path::Path};

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};

pub const HARDHAT_CHAIN_ID: u64 = 31337;

#[derive(Debug, thiserror::Error)]
pub enum ChainConfigError {
    #[error("chain id {chain_id} is not supported")]
    UnsupportedChain { chain_id: u64 },
    #[error("unknown network name {0}")]
    UnknownNetwork(String),
    #[error("failed to read chain config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse chain config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// What the connected network says about itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
}

impl Network {
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
        }
    }

    pub fn hardhat() -> Self {
        Self::new("hardhat", HARDHAT_CHAIN_ID)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub name: String,
    pub eth_usd_price_feed: Address,
    #[serde(default = "default_confirmations")]
    pub block_confirmations: u64,
}

fn default_confirmations() -> u64 {
    1
}

/// Constructor arguments of the mock aggregator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MockFeedParams {
    pub decimals: u8,
    pub initial_answer: i128,
}

impl Default for MockFeedParams {
    fn default() -> Self {
        Self {
            decimals: 8,
            initial_answer: 2000_00000000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub networks: BTreeMap<u64, NetworkEntry>,
    pub development_chains: Vec<String>,
    #[serde(default)]
    pub mock: MockFeedParams,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            5,
            NetworkEntry {
                name: "goerli".into(),
                eth_usd_price_feed: address!("0xD4a33860578De61DBAbDc8BFdb98FD742fA7028e"),
                block_confirmations: 6,
            },
        );
        networks.insert(
            137,
            NetworkEntry {
                name: "polygon".into(),
                eth_usd_price_feed: address!("0xF9680D99D6C9589e2a93a78A04A279e509205945"),
                block_confirmations: 6,
            },
        );
        networks.insert(
            11155111,
            NetworkEntry {
                name: "sepolia".into(),
                eth_usd_price_feed: address!("0x694AA1769357215DE4FAC081bf1f309aDC325306"),
                block_confirmations: 6,
            },
        );
        Self {
            networks,
            development_chains: vec!["hardhat".into(), "localhost".into()],
            mock: MockFeedParams::default(),
        }
    }
}

impl ChainConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChainConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ChainConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ChainConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn is_development(&self, network: &Network) -> bool {
        self.development_chains.iter().any(|name| *name == network.name)
    }

    pub fn entry(&self, chain_id: u64) -> Result<&NetworkEntry, ChainConfigError> {
        self.networks
            .get(&chain_id)
            .ok_or(ChainConfigError::UnsupportedChain { chain_id })
    }

    /// Resolves a network name to its identity: development names map to the local
    /// chain id, anything else must be in the table.
    pub fn network_by_name(&self, name: &str) -> Result<Network, ChainConfigError> {
        if self.development_chains.iter().any(|dev| dev == name) {
            return Ok(Network::new(name, HARDHAT_CHAIN_ID));
        }
        self.networks
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(chain_id, entry)| Network::new(entry.name.clone(), *chain_id))
            .ok_or_else(|| ChainConfigError::UnknownNetwork(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_known_feeds() {
        let config = ChainConfig::default();
        assert_eq!(config.entry(5).unwrap().name, "goerli");
        assert_eq!(
            config.entry(137).unwrap().eth_usd_price_feed,
            address!("0xF9680D99D6C9589e2a93a78A04A279e509205945")
        );
        assert!(matches!(
            config.entry(1),
            Err(ChainConfigError::UnsupportedChain { chain_id: 1 })
        ));
    }

    #[test]
    fn development_networks_are_matched_by_name() {
        let config = ChainConfig::default();
        assert!(config.is_development(&Network::hardhat()));
        assert!(config.is_development(&Network::new("localhost", HARDHAT_CHAIN_ID)));
        assert!(!config.is_development(&Network::new("goerli", 5)));
    }

    #[test]
    fn network_names_resolve_to_chain_ids() {
        let config = ChainConfig::default();
        assert_eq!(config.network_by_name("polygon").unwrap().chain_id, 137);
        assert_eq!(
            config.network_by_name("localhost").unwrap().chain_id,
            HARDHAT_CHAIN_ID
        );
        assert!(config.network_by_name("mainnet").is_err());
    }

    #[test]
    fn config_parses_from_json() {
        let raw = r#"{
            "networks": {
                "42161": { "name": "arbitrum", "ethUsdPriceFeed": "0x639Fe6ab55C921f74e7fac1ee960C0B6293ba612" }
            },
            "developmentChains": ["anvil"]
        }"#;
        let config: ChainConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.entry(42161).unwrap().block_confirmations, 1);
        assert_eq!(config.mock, MockFeedParams::default());
        assert!(config.is_development(&Network::new("anvil", HARDHAT_CHAIN_ID)));
    }
}
