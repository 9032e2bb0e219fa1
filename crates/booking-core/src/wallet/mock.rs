//! ============================================================================
//! MockWallet - Scriptable in-memory wallet with a booking contract
//! ============================================================================
//! Answers the same requests a browser or desktop wallet would, and executes
//! booking-contract calls against an in-memory session list so whole
//! connect -> book -> complete flows run without a chain.
//!
//! Scripting knobs: reject a method (code 4001), fail a method with any
//! error, forget chains (code 4902), revert or fail the next transaction,
//! delay receipts, hold a request until released, and push account/chain
//! changes as wallet events.
//! ============================================================================

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolEvent, SolInterface, SolValue};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};

use super::{
    ProviderRpcError, WalletEvent, WalletProvider, CODE_EXECUTION_REVERTED, CODE_UNAUTHORIZED,
    CODE_UNRECOGNIZED_CHAIN,
};
use crate::contract::ITutorSessions::{self, ITutorSessionsCalls};

const CODE_INVALID_PARAMS: i64 = -32602;
const CODE_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone)]
struct MockSession {
    tutor: String,
    student: String,
    time: U256,
    price: U256,
    completed: bool,
    booker: Address,
}

struct PendingReceipt {
    receipt: Value,
    null_polls_left: u32,
}

struct MockState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    known_chains: HashSet<u64>,
    balance: U256,
    gas_price: u128,
    rejected: HashSet<String>,
    failing: HashMap<String, ProviderRpcError>,
    revert_next_tx: Option<String>,
    fail_next_tx_on_chain: bool,
    receipt_delay_polls: u32,
    calls: Vec<String>,
    sessions: Vec<MockSession>,
    receipts: HashMap<B256, PendingReceipt>,
    block: u64,
    tx_count: u64,
}

/// In-memory wallet provider for tests and offline demos
pub struct MockWallet {
    state: Mutex<MockState>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    events: broadcast::Sender<WalletEvent>,
}

fn revert(reason: &str) -> ProviderRpcError {
    ProviderRpcError::new(
        CODE_EXECUTION_REVERTED,
        format!("execution reverted: {}", reason),
    )
}

fn hex_u64(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn field<T: serde::de::DeserializeOwned>(tx: &Value, name: &str) -> Result<T, ProviderRpcError> {
    serde_json::from_value(tx.get(name).cloned().unwrap_or(Value::Null))
        .map_err(|e| ProviderRpcError::new(CODE_INVALID_PARAMS, format!("bad {}: {}", name, e)))
}

impl MockWallet {
    /// Wallet holding `accounts` (not yet authorized), sitting on `chain_id`
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(MockState {
                accounts,
                authorized: false,
                chain_id,
                known_chains: HashSet::from([chain_id]),
                balance: U256::from(1_500_000_000_000_000_000u128),
                gas_price: 20_000_000_000,
                rejected: HashSet::new(),
                failing: HashMap::new(),
                revert_next_tx: None,
                fail_next_tx_on_chain: false,
                receipt_delay_polls: 0,
                calls: Vec::new(),
                sessions: Vec::new(),
                receipts: HashMap::new(),
                block: 1,
                tx_count: 0,
            }),
            holds: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accounts were granted in an earlier session
    pub fn pre_authorized(self) -> Self {
        self.lock().authorized = true;
        self
    }

    pub fn with_known_chain(self, chain_id: u64) -> Self {
        self.lock().known_chains.insert(chain_id);
        self
    }

    pub fn with_balance(self, wei: U256) -> Self {
        self.lock().balance = wei;
        self
    }

    /// Answer `method` with a user rejection until `allow` is called
    pub fn reject(&self, method: &str) {
        self.lock().rejected.insert(method.to_string());
    }

    pub fn allow(&self, method: &str) {
        let mut state = self.lock();
        state.rejected.remove(method);
        state.failing.remove(method);
    }

    pub fn fail(&self, method: &str, error: ProviderRpcError) {
        self.lock().failing.insert(method.to_string(), error);
    }

    /// The next `method` request waits until the returned handle is notified,
    /// like a wallet popup the user has not answered yet
    pub fn hold(&self, method: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(method.to_string(), release.clone());
        release
    }

    /// Next `eth_sendTransaction` fails gas estimation with a revert
    pub fn revert_next_transaction(&self, reason: &str) {
        self.lock().revert_next_tx = Some(reason.to_string());
    }

    /// Next transaction is mined with status 0
    pub fn fail_next_transaction_on_chain(&self) {
        self.lock().fail_next_tx_on_chain = true;
    }

    /// Receipts stay pending for this many polls
    pub fn delay_receipts(&self, polls: u32) {
        self.lock().receipt_delay_polls = polls;
    }

    /// Simulates the user switching or revoking accounts in the wallet
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        let visible = {
            let mut state = self.lock();
            state.accounts = accounts;
            if state.authorized {
                state.accounts.clone()
            } else {
                Vec::new()
            }
        };
        let _ = self.events.send(WalletEvent::AccountsChanged(visible));
    }

    /// Simulates the user revoking this site's access
    pub fn revoke(&self) {
        self.lock().authorized = false;
        let _ = self.events.send(WalletEvent::AccountsChanged(Vec::new()));
    }

    /// Simulates the user switching chains in the wallet UI
    pub fn set_chain(&self, chain_id: u64) {
        {
            let mut state = self.lock();
            state.chain_id = chain_id;
            state.known_chains.insert(chain_id);
        }
        let _ = self.events.send(WalletEvent::ChainChanged(chain_id));
    }

    pub fn current_chain(&self) -> u64 {
        self.lock().chain_id
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|m| m.as_str() == method).count()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn session_completed(&self, index: usize) -> Option<bool> {
        self.lock().sessions.get(index).map(|s| s.completed)
    }

    fn send_transaction(
        state: &mut MockState,
        params: &Value,
    ) -> Result<Value, ProviderRpcError> {
        let tx = params.get(0).cloned().unwrap_or(Value::Null);
        let from: Address = field(&tx, "from")?;
        let to: Address = field(&tx, "to")?;
        let data: Bytes = field(&tx, "data")?;

        if !state.authorized || !state.accounts.contains(&from) {
            return Err(ProviderRpcError::new(
                CODE_UNAUTHORIZED,
                "The requested account has not been authorized",
            ));
        }
        if let Some(reason) = state.revert_next_tx.take() {
            return Err(revert(&reason));
        }

        let call = ITutorSessionsCalls::abi_decode(&data, true)
            .map_err(|e| ProviderRpcError::new(CODE_INVALID_PARAMS, format!("bad calldata: {}", e)))?;

        let mined_ok = !std::mem::take(&mut state.fail_next_tx_on_chain);
        let mut logs = Vec::new();

        if mined_ok {
            match call {
                ITutorSessionsCalls::bookSession(c) => {
                    let id = U256::from(state.sessions.len());
                    state.sessions.push(MockSession {
                        tutor: c.tutorName.clone(),
                        student: c.studentName.clone(),
                        time: c.time,
                        price: c.price,
                        completed: false,
                        booker: from,
                    });
                    let log = ITutorSessions::SessionBooked {
                        sessionId: id,
                        tutorName: c.tutorName,
                        studentName: c.studentName,
                        time: c.time,
                        price: c.price,
                    }
                    .encode_log_data();
                    logs.push(json!({ "address": to, "topics": log.topics(), "data": log.data }));
                }
                ITutorSessionsCalls::completeSession(c) => {
                    let index = usize::try_from(c.sessionId).unwrap_or(usize::MAX);
                    let session = state
                        .sessions
                        .get_mut(index)
                        .ok_or_else(|| revert("Session does not exist"))?;
                    if session.booker != from {
                        return Err(revert("Only student can complete"));
                    }
                    if session.completed {
                        return Err(revert("Session already completed"));
                    }
                    session.completed = true;
                    let log = ITutorSessions::SessionCompleted { sessionId: c.sessionId }
                        .encode_log_data();
                    logs.push(json!({ "address": to, "topics": log.topics(), "data": log.data }));
                }
                _ => {}
            }
        }

        state.tx_count += 1;
        state.block += 1;
        let hash = keccak256(state.tx_count.to_be_bytes());
        let receipt = json!({
            "transactionHash": hash,
            "blockNumber": format!("0x{:x}", state.block),
            "status": if mined_ok { "0x1" } else { "0x0" },
            "logs": logs,
        });
        let null_polls_left = state.receipt_delay_polls;
        state.receipts.insert(hash, PendingReceipt { receipt, null_polls_left });

        Ok(json!(hash))
    }

    fn eth_call(state: &MockState, params: &Value) -> Result<Value, ProviderRpcError> {
        let tx = params.get(0).cloned().unwrap_or(Value::Null);
        let data: Bytes = field(&tx, "data")?;
        let call = ITutorSessionsCalls::abi_decode(&data, true)
            .map_err(|e| ProviderRpcError::new(CODE_INVALID_PARAMS, format!("bad calldata: {}", e)))?;

        let encoded = match call {
            ITutorSessionsCalls::sessionCount(_) => {
                (U256::from(state.sessions.len()),).abi_encode_params()
            }
            ITutorSessionsCalls::sessions(c) => {
                let index = usize::try_from(c.index).unwrap_or(usize::MAX);
                let s = state.sessions.get(index).ok_or_else(|| revert(""))?;
                (s.tutor.clone(), s.student.clone(), s.time, s.price, s.completed)
                    .abi_encode_params()
            }
            _ => return Err(revert("state-changing function called with eth_call")),
        };
        Ok(json!(Bytes::from(encoded)))
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        let held = self
            .holds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(method);
        if let Some(release) = held {
            release.notified().await;
        }

        let mut state = self.lock();
        state.calls.push(method.to_string());

        if state.rejected.contains(method) {
            return Err(ProviderRpcError::user_rejected());
        }
        if let Some(err) = state.failing.get(method) {
            return Err(err.clone());
        }

        match method {
            "eth_requestAccounts" => {
                state.authorized = true;
                Ok(json!(state.accounts))
            }
            "eth_accounts" => {
                if state.authorized {
                    Ok(json!(state.accounts))
                } else {
                    Ok(json!([]))
                }
            }
            "eth_chainId" => Ok(json!(format!("0x{:x}", state.chain_id))),
            "wallet_switchEthereumChain" => {
                let id = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(hex_u64)
                    .ok_or_else(|| ProviderRpcError::new(CODE_INVALID_PARAMS, "missing chainId"))?;
                if !state.known_chains.contains(&id) {
                    return Err(ProviderRpcError::new(
                        CODE_UNRECOGNIZED_CHAIN,
                        format!("Unrecognized chain ID 0x{:x}", id),
                    ));
                }
                state.chain_id = id;
                let _ = self.events.send(WalletEvent::ChainChanged(id));
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let id = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(hex_u64)
                    .ok_or_else(|| ProviderRpcError::new(CODE_INVALID_PARAMS, "missing chainId"))?;
                state.known_chains.insert(id);
                Ok(Value::Null)
            }
            "eth_getBalance" => Ok(json!(format!("0x{:x}", state.balance))),
            "eth_gasPrice" => Ok(json!(format!("0x{:x}", state.gas_price))),
            "eth_sendTransaction" => Self::send_transaction(&mut state, &params),
            "eth_getTransactionReceipt" => {
                let hash: B256 = params
                    .get(0)
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .ok_or_else(|| ProviderRpcError::new(CODE_INVALID_PARAMS, "missing hash"))?;
                match state.receipts.get_mut(&hash) {
                    Some(pending) if pending.null_polls_left > 0 => {
                        pending.null_polls_left -= 1;
                        Ok(Value::Null)
                    }
                    Some(pending) => Ok(pending.receipt.clone()),
                    None => Ok(Value::Null),
                }
            }
            "eth_call" => Self::eth_call(&state, &params),
            other => Err(ProviderRpcError::new(
                CODE_METHOD_NOT_FOUND,
                format!("Method {} not supported", other),
            )),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_switch_to_unknown_chain_reports_4902() {
        let mock = MockWallet::new(vec![Address::repeat_byte(1)], 1);
        let err = mock
            .request("wallet_switchEthereumChain", json!([{ "chainId": "0x7a69" }]))
            .await
            .unwrap_err();
        assert!(err.is_unknown_chain());

        mock.request("wallet_addEthereumChain", json!([{ "chainId": "0x7a69" }]))
            .await
            .unwrap();
        mock.request("wallet_switchEthereumChain", json!([{ "chainId": "0x7a69" }]))
            .await
            .unwrap();
        assert_eq!(mock.current_chain(), 31337);
    }

    #[tokio::test]
    async fn test_rejected_method() {
        let mock = MockWallet::new(vec![Address::repeat_byte(1)], 1);
        mock.reject("eth_requestAccounts");
        let err = mock.request("eth_requestAccounts", json!([])).await.unwrap_err();
        assert!(err.is_user_rejection());
        assert_eq!(mock.call_count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn test_revoke_emits_empty_accounts() {
        let mock = MockWallet::new(vec![Address::repeat_byte(1)], 1).pre_authorized();
        let mut rx = mock.subscribe();
        mock.revoke();
        assert_eq!(rx.recv().await.unwrap(), WalletEvent::AccountsChanged(vec![]));
        assert_eq!(mock.request("eth_accounts", json!([])).await.unwrap(), json!([]));
    }
}
