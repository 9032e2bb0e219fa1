//! ============================================================================
//! Network Registry - Supported chains and their deployments
//! ============================================================================
//! Static table of the networks the booking contract is deployed on.
//! Built once at process start (compiled defaults, optional env overrides)
//! and shared read-only afterwards.
//!
//! | key       | chain id  | notes                                  |
//! |-----------|-----------|----------------------------------------|
//! | sepolia   | 11155111  | public testnet, needs an RPC API key   |
//! | localhost | 31337     | local hardhat/anvil node               |
//! ============================================================================

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{BookingError, Result};

/// Token left in RPC URLs that were never given real credentials
pub const RPC_PLACEHOLDER_TOKEN: &str = "YOUR_INFURA_PROJECT_ID";

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const LOCALHOST_CHAIN_ID: u64 = 31_337;

const DEFAULT_SEPOLIA_RPC: &str = "https://sepolia.infura.io/v3/YOUR_INFURA_PROJECT_ID";
const DEFAULT_SEPOLIA_CONTRACT: &str = "0x8A791620dd6260079BF849Dc5567aDC3F2FdC318";
const DEFAULT_LOCALHOST_RPC: &str = "http://127.0.0.1:8545";
/// First contract deployed by the default hardhat/anvil account
const DEFAULT_LOCALHOST_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

/// Stable identifier of a supported network
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKey {
    Sepolia,
    Localhost,
}

impl NetworkKey {
    pub const ALL: [NetworkKey; 2] = [NetworkKey::Sepolia, NetworkKey::Localhost];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKey::Sepolia => "sepolia",
            NetworkKey::Localhost => "localhost",
        }
    }

    /// Public networks reached through a credentialed RPC provider.
    /// These refuse to connect until the deployment fills in its RPC URL.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, NetworkKey::Sepolia)
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKey {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sepolia" => Ok(NetworkKey::Sepolia),
            "localhost" | "local" | "hardhat" | "anvil" => Ok(NetworkKey::Localhost),
            other => Err(BookingError::UnknownNetworkKind(other.to_string())),
        }
    }
}

/// Everything needed to talk to one deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkDescriptor {
    pub key: NetworkKey,
    pub display_name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_address: Address,
    pub native_symbol: String,
    /// Block explorer base URL; empty for local chains
    pub explorer_url: String,
}

impl NetworkDescriptor {
    /// Chain id as the 0x-prefixed hex string wallets expect
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }

    /// Parameters for `wallet_addEthereumChain`
    pub fn add_chain_params(&self) -> serde_json::Value {
        let mut params = serde_json::json!({
            "chainId": self.chain_id_hex(),
            "chainName": self.display_name,
            "nativeCurrency": {
                "name": self.native_symbol,
                "symbol": self.native_symbol,
                "decimals": 18,
            },
            "rpcUrls": [self.rpc_url],
        });
        if !self.explorer_url.is_empty() {
            params["blockExplorerUrls"] = serde_json::json!([self.explorer_url]);
        }
        params
    }

    /// Link to a transaction on the block explorer, if the network has one
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        if self.explorer_url.is_empty() {
            return None;
        }
        Some(format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash))
    }
}

/// Deployment-time overrides for the registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub sepolia_rpc_url: String,
    pub sepolia_contract: String,
    pub localhost_rpc_url: String,
    pub localhost_contract: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sepolia_rpc_url: DEFAULT_SEPOLIA_RPC.to_string(),
            sepolia_contract: DEFAULT_SEPOLIA_CONTRACT.to_string(),
            localhost_rpc_url: DEFAULT_LOCALHOST_RPC.to_string(),
            localhost_contract: DEFAULT_LOCALHOST_CONTRACT.to_string(),
        }
    }
}

impl RegistryConfig {
    /// Defaults overridden by SEPOLIA_RPC_URL, SEPOLIA_CONTRACT_ADDRESS,
    /// LOCALHOST_RPC_URL and LOCALHOST_CONTRACT_ADDRESS when set
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sepolia_rpc_url: env_url("SEPOLIA_RPC_URL").unwrap_or(defaults.sepolia_rpc_url),
            sepolia_contract: std::env::var("SEPOLIA_CONTRACT_ADDRESS")
                .unwrap_or(defaults.sepolia_contract),
            localhost_rpc_url: env_url("LOCALHOST_RPC_URL").unwrap_or(defaults.localhost_rpc_url),
            localhost_contract: std::env::var("LOCALHOST_CONTRACT_ADDRESS")
                .unwrap_or(defaults.localhost_contract),
        }
    }
}

fn env_url(var: &str) -> Option<String> {
    let value = std::env::var(var).ok()?;
    match url::Url::parse(&value) {
        Ok(_) => Some(value),
        Err(e) => {
            warn!("Ignoring {}: not a valid URL ({})", var, e);
            None
        }
    }
}

fn parse_contract(key: NetworkKey, raw: &str, fallback: &str) -> Address {
    Address::from_str(raw.trim()).unwrap_or_else(|e| {
        warn!("Invalid contract address for {}: {} - using default", key, e);
        // Compiled-in defaults are valid checksummed literals.
        Address::from_str(fallback).unwrap_or(Address::ZERO)
    })
}

/// Immutable table of supported networks
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    networks: Vec<NetworkDescriptor>,
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl NetworkRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let networks = vec![
            NetworkDescriptor {
                key: NetworkKey::Sepolia,
                display_name: "Sepolia Testnet".to_string(),
                chain_id: SEPOLIA_CHAIN_ID,
                rpc_url: config.sepolia_rpc_url,
                contract_address: parse_contract(
                    NetworkKey::Sepolia,
                    &config.sepolia_contract,
                    DEFAULT_SEPOLIA_CONTRACT,
                ),
                native_symbol: "ETH".to_string(),
                explorer_url: "https://sepolia.etherscan.io".to_string(),
            },
            NetworkDescriptor {
                key: NetworkKey::Localhost,
                display_name: "Localhost 8545".to_string(),
                chain_id: LOCALHOST_CHAIN_ID,
                rpc_url: config.localhost_rpc_url,
                contract_address: parse_contract(
                    NetworkKey::Localhost,
                    &config.localhost_contract,
                    DEFAULT_LOCALHOST_CONTRACT,
                ),
                native_symbol: "ETH".to_string(),
                explorer_url: String::new(),
            },
        ];
        debug!("Network registry built with {} networks", networks.len());
        Self { networks }
    }

    pub fn from_env() -> Self {
        Self::new(RegistryConfig::from_env())
    }

    /// Descriptor for a network key
    pub fn describe(&self, key: NetworkKey) -> Result<&NetworkDescriptor> {
        self.networks
            .iter()
            .find(|n| n.key == key)
            .ok_or_else(|| BookingError::UnknownNetworkKind(key.to_string()))
    }

    /// False while the RPC URL still carries the placeholder token.
    /// Readiness of the deployment, not liveness of the endpoint.
    pub fn is_configured(&self, key: NetworkKey) -> bool {
        self.describe(key)
            .map(|n| !n.rpc_url.contains(RPC_PLACEHOLDER_TOKEN))
            .unwrap_or(false)
    }

    pub fn preferred_default(&self) -> NetworkKey {
        NetworkKey::Sepolia
    }

    /// Reverse lookup used when the wallet reports its current chain
    pub fn key_for_chain(&self, chain_id: u64) -> Option<NetworkKey> {
        self.networks
            .iter()
            .find(|n| n.chain_id == chain_id)
            .map(|n| n.key)
    }

    pub fn all(&self) -> &[NetworkDescriptor] {
        &self.networks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_chain_ids_unique() {
        let registry = NetworkRegistry::default();
        let ids: HashSet<u64> = registry.all().iter().map(|n| n.chain_id).collect();
        assert_eq!(ids.len(), registry.all().len());
    }

    #[test]
    fn test_every_key_described() {
        let registry = NetworkRegistry::default();
        for key in NetworkKey::ALL {
            assert_eq!(registry.describe(key).unwrap().key, key);
        }
    }

    #[test]
    fn test_sepolia_placeholder_not_configured() {
        let registry = NetworkRegistry::default();
        assert!(!registry.is_configured(NetworkKey::Sepolia));
        assert!(registry.is_configured(NetworkKey::Localhost));
    }

    #[test]
    fn test_sepolia_configured_with_real_url() {
        let registry = NetworkRegistry::new(RegistryConfig {
            sepolia_rpc_url: "https://sepolia.infura.io/v3/abc123".into(),
            ..Default::default()
        });
        assert!(registry.is_configured(NetworkKey::Sepolia));
    }

    #[test]
    fn test_invalid_contract_falls_back() {
        let registry = NetworkRegistry::new(RegistryConfig {
            localhost_contract: "not-an-address".into(),
            ..Default::default()
        });
        let expected = Address::from_str(DEFAULT_LOCALHOST_CONTRACT).unwrap();
        assert_eq!(
            registry.describe(NetworkKey::Localhost).unwrap().contract_address,
            expected
        );
    }

    #[test]
    fn test_key_parsing() {
        assert_eq!("Sepolia".parse::<NetworkKey>().unwrap(), NetworkKey::Sepolia);
        assert_eq!("anvil".parse::<NetworkKey>().unwrap(), NetworkKey::Localhost);
        assert!(matches!(
            "mainnet".parse::<NetworkKey>(),
            Err(BookingError::UnknownNetworkKind(_))
        ));
    }

    #[test]
    fn test_chain_lookup_and_hex() {
        let registry = NetworkRegistry::default();
        assert_eq!(registry.key_for_chain(31337), Some(NetworkKey::Localhost));
        assert_eq!(registry.key_for_chain(1), None);
        assert_eq!(
            registry.describe(NetworkKey::Sepolia).unwrap().chain_id_hex(),
            "0xaa36a7"
        );
    }

    #[test]
    fn test_add_chain_params_omit_empty_explorer() {
        let registry = NetworkRegistry::default();
        let local = registry.describe(NetworkKey::Localhost).unwrap().add_chain_params();
        assert!(local.get("blockExplorerUrls").is_none());

        let sepolia = registry.describe(NetworkKey::Sepolia).unwrap();
        assert_eq!(sepolia.add_chain_params()["nativeCurrency"]["decimals"], 18);
        assert_eq!(
            sepolia.explorer_tx_url("0xabc").as_deref(),
            Some("https://sepolia.etherscan.io/tx/0xabc")
        );
    }
}
