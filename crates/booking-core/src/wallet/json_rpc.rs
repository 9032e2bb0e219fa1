//! ============================================================================
//! JsonRpcWallet - Wallet provider over an HTTP JSON-RPC endpoint
//! ============================================================================
//! Desktop wallets (e.g. Frame on http://127.0.0.1:1248) expose the same
//! EIP-1193 request surface over plain JSON-RPC. Approval prompts appear in
//! the wallet application; this client just waits for the answer.
//!
//! HTTP has no push channel, so wallet events come from `watch()`, which
//! polls accounts and chain id and emits a `WalletEvent` on every change.
//! ============================================================================

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ProviderRpcError, WalletEvent, WalletProvider, CODE_DISCONNECTED, CODE_INTERNAL};

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Wallet provider backed by a JSON-RPC HTTP endpoint
pub struct JsonRpcWallet {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    events: broadcast::Sender<WalletEvent>,
}

impl JsonRpcWallet {
    pub fn new(url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            // No request timeout: approval prompts wait on the user.
            http: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Returns the wallet only if the endpoint answers `eth_chainId`.
    /// An unreachable endpoint means there is no wallet to talk to.
    pub async fn detect(url: impl Into<String>) -> Option<Self> {
        let wallet = Self::new(url);
        match wallet.request("eth_chainId", json!([])).await {
            Ok(_) => {
                info!("Wallet provider detected at {}", wallet.url);
                Some(wallet)
            }
            Err(e) => {
                debug!("No wallet provider at {}: {}", wallet.url, e);
                None
            }
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward an event to subscribers (used by `watch` and by hosts that
    /// receive wallet events through another channel)
    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    /// Poll accounts + chain id and emit an event whenever either changes
    pub fn watch(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut cursor = WatchCursor::default();

            loop {
                tokio::time::sleep(interval).await;

                match self.request("eth_accounts", json!([])).await {
                    Ok(value) => {
                        if let Some(event) = cursor.accounts(value) {
                            self.emit(event);
                        }
                    }
                    Err(e) => warn!("Wallet watch: eth_accounts failed: {}", e),
                }

                match self.request("eth_chainId", json!([])).await {
                    Ok(value) => {
                        if let Some(event) = cursor.chain(value) {
                            self.emit(event);
                        }
                    }
                    Err(e) => warn!("Wallet watch: eth_chainId failed: {}", e),
                }
            }
        })
    }
}

/// Last seen accounts and chain; the first reading of each only primes it
#[derive(Debug, Default)]
struct WatchCursor {
    accounts: Option<Vec<Address>>,
    chain: Option<u64>,
}

impl WatchCursor {
    fn accounts(&mut self, value: Value) -> Option<WalletEvent> {
        let accounts: Vec<Address> = match serde_json::from_value(value) {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Wallet watch: unreadable eth_accounts reply, skipping: {}", e);
                return None;
            }
        };
        let changed = self.accounts.as_ref().is_some_and(|prev| *prev != accounts);
        self.accounts = Some(accounts.clone());
        if changed {
            info!("Wallet accounts changed ({} authorized)", accounts.len());
            Some(WalletEvent::AccountsChanged(accounts))
        } else {
            None
        }
    }

    fn chain(&mut self, value: Value) -> Option<WalletEvent> {
        let chain = match serde_json::from_value::<U256>(value)
            .ok()
            .and_then(|id| u64::try_from(id).ok())
        {
            Some(chain) => chain,
            None => {
                warn!("Wallet watch: unreadable eth_chainId reply, skipping");
                return None;
            }
        };
        let changed = self.chain.is_some_and(|prev| prev != chain);
        self.chain = Some(chain);
        if changed {
            info!("Wallet chain changed to {}", chain);
            Some(WalletEvent::ChainChanged(chain))
        } else {
            None
        }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderRpcError::new(CODE_DISCONNECTED, format!("Wallet unreachable: {}", e)))?;

        let status = response.status();
        let parsed: RpcResponse = response.json().await.map_err(|e| {
            ProviderRpcError::new(
                CODE_INTERNAL,
                format!("Invalid wallet response (HTTP {}): {}", status, e),
            )
        })?;

        if let Some(err) = parsed.error {
            return Err(ProviderRpcError::new(err.code, err.message));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}
