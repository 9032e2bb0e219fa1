//! ============================================================================
//! Wallet Module - EIP-1193 style wallet provider interface
//! ============================================================================
//! The core never holds keys. Every account request, chain switch and
//! transaction goes through a `WalletProvider`, which forwards JSON-RPC
//! requests to an external wallet application and reports its events.
//!
//! ## Implementations
//! - **JsonRpcWallet**: HTTP JSON-RPC endpoint exposed by a desktop wallet
//! - **MockWallet**: scriptable in-memory wallet + booking contract for tests
//! ============================================================================

mod json_rpc;
pub mod mock;

pub use json_rpc::JsonRpcWallet;
pub use mock::MockWallet;

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// User rejected the request
pub const CODE_USER_REJECTED: i64 = 4001;
/// Requested method/account not authorized
pub const CODE_UNAUTHORIZED: i64 = 4100;
/// Provider is disconnected from all chains
pub const CODE_DISCONNECTED: i64 = 4900;
/// Chain has not been added to the wallet
pub const CODE_UNRECOGNIZED_CHAIN: i64 = 4902;
/// Execution reverted (eth_call / gas estimation)
pub const CODE_EXECUTION_REVERTED: i64 = 3;
/// Internal JSON-RPC error
pub const CODE_INTERNAL: i64 = -32603;

/// Error object returned by a wallet request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(CODE_USER_REJECTED, "User rejected the request.")
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, message)
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == CODE_USER_REJECTED
    }

    pub fn is_unknown_chain(&self) -> bool {
        self.code == CODE_UNRECOGNIZED_CHAIN
    }

    pub fn is_revert(&self) -> bool {
        self.code == CODE_EXECUTION_REVERTED
            || self.message.to_lowercase().contains("revert")
    }
}

impl fmt::Display for ProviderRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ProviderRpcError {}

/// Out-of-band changes reported by the wallet
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
}

/// Raw wallet provider: one request method plus an event stream
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Minimal receipt fields the core needs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    /// Pre-byzantium receipts carry no status; treat them as success
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s == U64::from(1)).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

fn parse<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, ProviderRpcError> {
    serde_json::from_value(value).map_err(|e| {
        ProviderRpcError::invalid_response(format!("Unexpected {} response: {}", method, e))
    })
}

fn parse_quantity(method: &str, value: Value) -> Result<U256, ProviderRpcError> {
    parse::<U256>(method, value)
}

/// Typed calls over a `WalletProvider`
#[derive(Clone)]
pub struct WalletClient {
    provider: Arc<dyn WalletProvider>,
}

impl fmt::Debug for WalletClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletClient")
            .field("provider", &"<dyn WalletProvider>")
            .finish()
    }
}

impl WalletClient {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self { provider }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.provider.subscribe()
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        debug!("[wallet] -> {}", method);
        let result = self.provider.request(method, params).await;
        if let Err(e) = &result {
            debug!("[wallet] <- {} failed: {}", method, e);
        }
        result
    }

    /// Prompts the user to authorize accounts
    pub async fn request_accounts(&self) -> Result<Vec<Address>, ProviderRpcError> {
        let value = self.call_raw("eth_requestAccounts", json!([])).await?;
        parse("eth_requestAccounts", value)
    }

    /// Already-authorized accounts, without prompting
    pub async fn accounts(&self) -> Result<Vec<Address>, ProviderRpcError> {
        let value = self.call_raw("eth_accounts", json!([])).await?;
        parse("eth_accounts", value)
    }

    pub async fn chain_id(&self) -> Result<u64, ProviderRpcError> {
        let value = self.call_raw("eth_chainId", json!([])).await?;
        let id = parse_quantity("eth_chainId", value)?;
        u64::try_from(id)
            .map_err(|_| ProviderRpcError::invalid_response("chain id does not fit in u64"))
    }

    pub async fn switch_chain(&self, chain_id_hex: &str) -> Result<(), ProviderRpcError> {
        self.call_raw(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain_id_hex }]),
        )
        .await?;
        Ok(())
    }

    pub async fn add_chain(&self, params: Value) -> Result<(), ProviderRpcError> {
        self.call_raw("wallet_addEthereumChain", json!([params])).await?;
        Ok(())
    }

    pub async fn balance(&self, address: Address) -> Result<U256, ProviderRpcError> {
        let value = self
            .call_raw("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_quantity("eth_getBalance", value)
    }

    pub async fn gas_price(&self) -> Result<u128, ProviderRpcError> {
        let value = self.call_raw("eth_gasPrice", json!([])).await?;
        let price = parse_quantity("eth_gasPrice", value)?;
        u128::try_from(price)
            .map_err(|_| ProviderRpcError::invalid_response("gas price does not fit in u128"))
    }

    /// Asks the wallet to sign and broadcast; returns the tx hash
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<B256, ProviderRpcError> {
        let value = self
            .call_raw(
                "eth_sendTransaction",
                json!([{ "from": from, "to": to, "data": data }]),
            )
            .await?;
        parse("eth_sendTransaction", value)
    }

    /// Read-only contract call against the latest block
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderRpcError> {
        let value = self
            .call_raw("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        parse("eth_call", value)
    }

    /// None while the transaction is still pending
    pub async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<RpcReceipt>, ProviderRpcError> {
        let value = self
            .call_raw("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        parse("eth_getTransactionReceipt", value).map(Some)
    }
}
