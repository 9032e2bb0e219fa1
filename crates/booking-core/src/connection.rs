//! ============================================================================
//! Wallet Connection Manager - Owns the connection state machine
//! ============================================================================
//! Disconnected -> connect(k) -> Connected(k)
//! Connected(k) -> switch_network(k') -> Connected(k') (or stays on k)
//! Connected(k) -> disconnect() / zero accounts -> Disconnected
//! Any state    -> wallet event -> full refresh from the wallet
//!
//! At most one connect/switch/disconnect runs at a time. A second attempt
//! while busy is rejected, never queued. Every operation commits its new
//! state in one step: a failure leaves the previous state untouched.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::confirmation::ConfirmationConfig;
use crate::error::{BookingError, Result};
use crate::networks::{NetworkDescriptor, NetworkKey, NetworkRegistry};
use crate::notify::{Notification, NotificationLevel, Notifier};
use crate::session_client::ContractSessionClient;
use crate::store::LocalStore;
use crate::types::ConnectionState;
use crate::units::{format_address, format_balance};
use crate::wallet::{ProviderRpcError, WalletClient, WalletEvent, WalletProvider, CODE_UNAUTHORIZED};

const DEFAULT_SYMBOL: &str = "ETH";

fn provider_error(e: ProviderRpcError) -> BookingError {
    if e.is_user_rejection() {
        BookingError::UserRejected
    } else {
        BookingError::Provider {
            code: e.code,
            message: e.message,
        }
    }
}

/// Fully derived connection: state plus the contract binding that goes with it
struct Derived {
    state: ConnectionState,
    client: Option<Arc<ContractSessionClient>>,
}

/// Clears the busy flag when the operation ends, however it ends
struct BusyGuard<'a> {
    manager: &'a ConnectionManager,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.manager.busy.store(false, Ordering::SeqCst);
        self.manager.state.send_modify(|s| s.is_busy = false);
    }
}

pub struct ConnectionManager {
    wallet: Option<WalletClient>,
    registry: Arc<NetworkRegistry>,
    store: Arc<LocalStore>,
    notifier: Arc<dyn Notifier>,
    confirmation: ConfirmationConfig,
    state: watch::Sender<ConnectionState>,
    client: RwLock<Option<Arc<ContractSessionClient>>>,
    busy: AtomicBool,
    /// Set by an explicit disconnect; suppresses silent reconnection on
    /// wallet events until the user connects again
    user_disconnected: AtomicBool,
}

impl ConnectionManager {
    /// `provider` is None when no wallet is available in this environment
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        registry: Arc<NetworkRegistry>,
        store: Arc<LocalStore>,
        notifier: Arc<dyn Notifier>,
        confirmation: ConfirmationConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            wallet: provider.map(WalletClient::new),
            registry,
            store,
            notifier,
            confirmation,
            state,
            client: RwLock::new(None),
            busy: AtomicBool::new(false),
            user_disconnected: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receives every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn has_provider(&self) -> bool {
        self.wallet.is_some()
    }

    /// Contract binding for the current signer and network
    pub async fn session_client(&self) -> Option<Arc<ContractSessionClient>> {
        self.client.read().await.clone()
    }

    pub(crate) fn wallet(&self) -> Option<&WalletClient> {
        self.wallet.as_ref()
    }

    pub(crate) fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn notify_error(&self, title: &str, err: &BookingError) {
        self.notify(Notification::new(err.severity(), title, err.to_string()));
    }

    /// Provider and chain failures leave the user to switch by hand
    fn notify_manual_switch(&self, title: &str, key: NetworkKey, err: &BookingError) {
        warn!("{} ({}): {}", title, key, err);
        self.notify(Notification::error(
            title,
            format!("Please switch to {} manually in your wallet. ({})", key, err),
        ));
    }

    // ========================================================================
    // Busy flag and state commits
    // ========================================================================

    fn begin(&self) -> Result<BusyGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Rejecting wallet operation: another one is in flight");
            return Err(BookingError::OperationInProgress);
        }
        self.state.send_modify(|s| s.is_busy = true);
        Ok(BusyGuard { manager: self })
    }

    /// Replace state and contract binding together
    async fn commit(&self, derived: Derived) {
        let mut client = self.client.write().await;
        *client = derived.client;
        let mut state = derived.state;
        state.is_busy = self.busy.load(Ordering::SeqCst);
        debug!(
            "Connection state: connected={} network={:?} chain={:?}",
            state.is_connected, state.active_network, state.chain_id
        );
        self.state.send_replace(state);
    }

    async fn reset(&self) {
        self.commit(Derived {
            state: ConnectionState::default(),
            client: None,
        })
        .await;
    }

    fn bind(
        &self,
        wallet: &WalletClient,
        signer: Address,
        network: &NetworkDescriptor,
    ) -> Arc<ContractSessionClient> {
        Arc::new(ContractSessionClient::new(
            wallet.clone(),
            signer,
            network.clone(),
            self.confirmation.clone(),
        ))
    }

    async fn balance_display(&self, wallet: &WalletClient, address: Address, symbol: &str) -> Result<String> {
        let wei = wallet.balance(address).await.map_err(provider_error)?;
        Ok(format_balance(wei, symbol))
    }

    // ========================================================================
    // Startup probe and external refresh
    // ========================================================================

    /// Silently pick up a connection the user granted earlier.
    /// Never fails: any error is logged and the state stays disconnected.
    pub async fn probe_existing_connection(&self) -> ConnectionState {
        let Some(wallet) = self.wallet.clone() else {
            debug!("No wallet provider; skipping connection probe");
            return self.state();
        };

        match self.derive(&wallet).await {
            Ok(Some(derived)) => {
                info!(
                    "Restored wallet connection {} on {:?}",
                    derived.state.address.map(|a| format_address(&a.to_string())).unwrap_or_default(),
                    derived.state.active_network
                );
                self.commit(derived).await;
            }
            Ok(None) => debug!("Wallet has no authorized accounts"),
            Err(e) => warn!("Connection probe failed: {}", e),
        }
        self.state()
    }

    /// Read everything from the wallet without prompting.
    /// None when the wallet reports zero authorized accounts.
    async fn derive(&self, wallet: &WalletClient) -> Result<Option<Derived>> {
        let accounts = wallet.accounts().await.map_err(provider_error)?;
        let Some(address) = accounts.first().copied() else {
            return Ok(None);
        };

        let chain_id = wallet.chain_id().await.map_err(provider_error)?;
        let network = self
            .registry
            .key_for_chain(chain_id)
            .and_then(|k| self.registry.describe(k).ok());
        if network.is_none() {
            warn!("Wallet is on unsupported chain {}", chain_id);
        }

        let symbol = network.map(|n| n.native_symbol.as_str()).unwrap_or(DEFAULT_SYMBOL);
        let balance_display = self.balance_display(wallet, address, symbol).await?;

        Ok(Some(Derived {
            state: ConnectionState {
                is_connected: true,
                address: Some(address),
                balance_display,
                active_network: network.map(|n| n.key),
                chain_id: Some(chain_id),
                is_busy: false,
            },
            client: network.map(|n| self.bind(wallet, address, n)),
        }))
    }

    /// Re-derive connection state from scratch.
    /// Runs regardless of any in-flight operation.
    pub async fn refresh(&self) -> ConnectionState {
        let Some(wallet) = self.wallet.clone() else {
            return self.state();
        };
        if self.user_disconnected.load(Ordering::SeqCst) {
            debug!("Refresh skipped: user disconnected explicitly");
            return self.state();
        }

        let was_connected = self.state().is_connected;
        match self.derive(&wallet).await {
            Ok(Some(derived)) => {
                let address = derived.state.address;
                self.commit(derived).await;
                if let Some(address) = address {
                    let known = self.store.wallet_address().ok().flatten();
                    if known.as_deref() != Some(address.to_string().as_str()) {
                        if let Err(e) = self.store.set_wallet_address(&address.to_string()) {
                            warn!("Failed to persist wallet address: {}", e);
                        }
                    }
                }
            }
            Ok(None) => self.accounts_removed(was_connected).await,
            Err(e) => {
                error!("Wallet refresh failed, resetting connection: {}", e);
                self.reset().await;
            }
        }
        self.state()
    }

    async fn accounts_removed(&self, was_connected: bool) {
        info!("Wallet reports no authorized accounts");
        self.reset().await;
        if let Err(e) = self.store.clear_wallet_address() {
            warn!("Failed to clear persisted wallet address: {}", e);
        }
        if was_connected {
            self.notify(Notification::info(
                "Wallet disconnected",
                "Your wallet no longer exposes any accounts to this application.",
            ));
        }
    }

    /// External interrupt from the wallet. Accepted in every state.
    pub async fn handle_event(&self, event: WalletEvent) -> ConnectionState {
        info!("Wallet event: {:?}", event);
        match event {
            WalletEvent::AccountsChanged(accounts) if accounts.is_empty() => {
                let was_connected = self.state().is_connected;
                self.accounts_removed(was_connected).await;
                self.state()
            }
            WalletEvent::AccountsChanged(_) | WalletEvent::ChainChanged(_) => self.refresh().await,
        }
    }

    /// Feed wallet events into `handle_event` until the provider goes away
    pub fn spawn_event_loop(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.wallet.as_ref()?.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.handle_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} wallet events, refreshing", missed);
                        self.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Wallet event stream closed");
                        break;
                    }
                }
            }
        });
        Some(handle)
    }

    // ========================================================================
    // Connect / switch / disconnect
    // ========================================================================

    /// Connect to `key`, prompting the user for account access.
    /// Notifies the outcome; a no-op when already connected to `key`.
    pub async fn connect(&self, key: NetworkKey) -> Result<ConnectionState> {
        let result = self.connect_inner(key).await;
        match &result {
            Ok(state) => {
                if let Some(address) = state.address {
                    self.notify(Notification::success(
                        "Wallet connected successfully!",
                        format!("Connected to {} on {}", format_address(&address.to_string()), key),
                    ));
                }
            }
            Err(BookingError::NoWalletProvider) => self.notify(Notification::error(
                "No wallet found",
                "Install or start a browser wallet such as MetaMask, then try again.",
            )),
            Err(BookingError::OperationInProgress) => {}
            Err(e @ BookingError::UserRejected) => self.notify_error("Connection cancelled", e),
            Err(e @ BookingError::ChainSwitchFailed { .. }) => {
                self.notify_manual_switch("Failed to switch network", key, e)
            }
            Err(e @ BookingError::Provider { .. }) => {
                self.notify_manual_switch("Failed to connect wallet", key, e)
            }
            Err(e) => self.notify_error("Failed to connect wallet", e),
        }
        result
    }

    async fn connect_inner(&self, key: NetworkKey) -> Result<ConnectionState> {
        let _guard = self.begin()?;

        let current = self.state();
        if current.is_on(key) {
            debug!("Already connected to {}", key);
            return Ok(current);
        }

        let wallet = self.wallet.clone().ok_or(BookingError::NoWalletProvider)?;
        let network = self.registry.describe(key)?.clone();
        if key.requires_credentials() && !self.registry.is_configured(key) {
            warn!("Refusing to connect to {}: RPC URL still has a placeholder", key);
            return Err(BookingError::NetworkNotConfigured(key.to_string()));
        }

        info!("Connecting wallet to {}", network.display_name);
        let accounts = wallet.request_accounts().await.map_err(provider_error)?;
        let address = accounts.first().copied().ok_or_else(|| BookingError::Provider {
            code: CODE_UNAUTHORIZED,
            message: "wallet returned no accounts".into(),
        })?;

        self.ensure_chain(&wallet, &network).await?;
        let balance_display = self
            .balance_display(&wallet, address, &network.native_symbol)
            .await?;

        self.store.set_wallet_address(&address.to_string())?;
        self.user_disconnected.store(false, Ordering::SeqCst);
        self.commit(Derived {
            state: ConnectionState {
                is_connected: true,
                address: Some(address),
                balance_display,
                active_network: Some(key),
                chain_id: Some(network.chain_id),
                is_busy: true,
            },
            client: Some(self.bind(&wallet, address, &network)),
        })
        .await;

        info!("Connected {} on {}", format_address(&address.to_string()), key);
        Ok(self.state())
    }

    /// Switch the wallet to the network's chain, registering the chain
    /// first if the wallet has never heard of it
    async fn ensure_chain(&self, wallet: &WalletClient, network: &NetworkDescriptor) -> Result<()> {
        let switch_failed = |reason: String| BookingError::ChainSwitchFailed {
            chain_id: network.chain_id,
            reason,
        };

        let current = wallet.chain_id().await.map_err(provider_error)?;
        if current == network.chain_id {
            return Ok(());
        }

        info!(
            "Switching wallet from chain {} to {} ({})",
            current, network.chain_id, network.display_name
        );
        let hex = network.chain_id_hex();
        match wallet.switch_chain(&hex).await {
            Ok(()) => {}
            Err(e) if e.is_unknown_chain() => {
                info!("Wallet does not know chain {}; adding it", network.chain_id);
                wallet
                    .add_chain(network.add_chain_params())
                    .await
                    .map_err(|e| match provider_error(e) {
                        BookingError::Provider { message, .. } => switch_failed(message),
                        other => other,
                    })?;
                wallet.switch_chain(&hex).await.map_err(|e| match provider_error(e) {
                    BookingError::Provider { message, .. } => switch_failed(message),
                    other => other,
                })?;
            }
            Err(e) if e.is_user_rejection() => return Err(BookingError::UserRejected),
            Err(e) => return Err(switch_failed(e.message)),
        }

        let now = wallet.chain_id().await.map_err(provider_error)?;
        if now != network.chain_id {
            return Err(switch_failed(format!("wallet still reports chain {}", now)));
        }
        Ok(())
    }

    /// Move an existing connection to another network.
    /// False means the user should switch manually; state is unchanged.
    pub async fn switch_network(&self, key: NetworkKey) -> bool {
        match self.switch_inner(key).await {
            Ok(state) => {
                self.notify(Notification::success(
                    "Network switched",
                    format!("Now connected to {}", key),
                ));
                debug!("Switch complete: {:?}", state.active_network);
                true
            }
            Err(BookingError::OperationInProgress) => false,
            Err(e) if e.severity() == NotificationLevel::Info => {
                self.notify_error("Network switch cancelled", &e);
                false
            }
            Err(e) => {
                self.notify_manual_switch("Failed to switch network", key, &e);
                false
            }
        }
    }

    async fn switch_inner(&self, key: NetworkKey) -> Result<ConnectionState> {
        let _guard = self.begin()?;

        let current = self.state();
        let address = match current.address {
            Some(a) if current.is_connected => a,
            _ => return Err(BookingError::WalletNotConnected),
        };
        if current.is_on(key) {
            return Ok(current);
        }

        let wallet = self.wallet.clone().ok_or(BookingError::NoWalletProvider)?;
        let network = self.registry.describe(key)?.clone();
        if key.requires_credentials() && !self.registry.is_configured(key) {
            return Err(BookingError::NetworkNotConfigured(key.to_string()));
        }

        self.ensure_chain(&wallet, &network).await?;
        let balance_display = self
            .balance_display(&wallet, address, &network.native_symbol)
            .await?;

        self.commit(Derived {
            state: ConnectionState {
                is_connected: true,
                address: Some(address),
                balance_display,
                active_network: Some(key),
                chain_id: Some(network.chain_id),
                is_busy: true,
            },
            client: Some(self.bind(&wallet, address, &network)),
        })
        .await;

        info!("Switched to {}", key);
        Ok(self.state())
    }

    /// Forget the connection locally. Wallet permissions are left alone;
    /// providers have no programmatic revocation.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.disconnect_inner().await;
        match &result {
            Ok(()) => self.notify(Notification::info(
                "Wallet disconnected",
                "Your wallet has been disconnected from the application.",
            )),
            Err(BookingError::OperationInProgress) => {}
            Err(e) => self.notify_error("Failed to disconnect wallet", e),
        }
        result
    }

    async fn disconnect_inner(&self) -> Result<()> {
        let _guard = self.begin()?;
        self.store.clear_wallet_address()?;
        self.user_disconnected.store(true, Ordering::SeqCst);
        self.reset().await;
        info!("Wallet disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{RegistryConfig, LOCALHOST_CHAIN_ID, SEPOLIA_CHAIN_ID};
    use crate::notify::RecordingNotifier;
    use crate::store::temp_store;
    use crate::wallet::MockWallet;

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn configured_registry() -> Arc<NetworkRegistry> {
        Arc::new(NetworkRegistry::new(RegistryConfig {
            sepolia_rpc_url: "https://sepolia.infura.io/v3/abc123".into(),
            ..Default::default()
        }))
    }

    fn manager(
        mock: Option<Arc<MockWallet>>,
        registry: Arc<NetworkRegistry>,
    ) -> (ConnectionManager, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let provider = mock.map(|m| m as Arc<dyn WalletProvider>);
        let manager = ConnectionManager::new(
            provider,
            registry,
            Arc::new(temp_store()),
            notifier.clone(),
            ConfirmationConfig::immediate(),
        );
        (manager, notifier)
    }

    fn assert_invariant(state: &ConnectionState) {
        assert_eq!(state.is_connected, state.address.is_some());
    }

    #[tokio::test]
    async fn test_no_provider() {
        let (manager, notifier) = manager(None, configured_registry());
        let err = manager.connect(NetworkKey::Sepolia).await.unwrap_err();
        assert_eq!(err, BookingError::NoWalletProvider);

        let state = manager.state();
        assert!(!state.is_connected);
        assert!(state.address.is_none());
        assert!(!state.is_busy);
        assert_eq!(notifier.count_level(NotificationLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_sepolia_is_refused_before_wallet() {
        let mock = Arc::new(MockWallet::new(vec![alice()], SEPOLIA_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), Arc::new(NetworkRegistry::default()));

        let err = manager.connect(NetworkKey::Sepolia).await.unwrap_err();
        assert_eq!(err, BookingError::NetworkNotConfigured("sepolia".into()));
        assert!(mock.calls().is_empty());
        assert_invariant(&manager.state());
    }

    #[tokio::test]
    async fn test_connect_switches_chain() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1).with_known_chain(LOCALHOST_CHAIN_ID));
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let state = manager.connect(NetworkKey::Localhost).await.unwrap();
        assert!(state.is_on(NetworkKey::Localhost));
        assert_eq!(state.address, Some(alice()));
        assert_eq!(state.balance_display, "1.5000 ETH");
        assert!(!manager.state().is_busy);
        assert_eq!(mock.current_chain(), LOCALHOST_CHAIN_ID);
        assert!(manager.session_client().await.is_some());
        assert_eq!(
            manager.store().wallet_address().unwrap(),
            Some(alice().to_string())
        );
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Success);
    }

    #[tokio::test]
    async fn test_connect_adds_unknown_chain() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());

        manager.connect(NetworkKey::Localhost).await.unwrap();
        assert_eq!(mock.call_count("wallet_addEthereumChain"), 1);
        assert_eq!(mock.call_count("wallet_switchEthereumChain"), 2);
        assert_eq!(mock.current_chain(), LOCALHOST_CHAIN_ID);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());

        let first = manager.connect(NetworkKey::Localhost).await.unwrap();
        let calls = mock.calls().len();
        let second = manager.connect(NetworkKey::Localhost).await.unwrap();

        assert_eq!(first.address, second.address);
        assert_eq!(mock.calls().len(), calls);
        assert_eq!(
            manager.store().wallet_address().unwrap(),
            Some(alice().to_string())
        );
    }

    #[tokio::test]
    async fn test_busy_rejects_without_contacting_provider() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());

        let guard = manager.begin().unwrap();
        assert!(manager.state().is_busy);
        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(err, BookingError::OperationInProgress);
        assert!(!manager.switch_network(NetworkKey::Sepolia).await);
        assert!(mock.calls().is_empty());

        drop(guard);
        assert!(!manager.state().is_busy);
        manager.connect(NetworkKey::Localhost).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_rejection_leaves_state() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        mock.reject("eth_requestAccounts");
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(err, BookingError::UserRejected);
        assert_eq!(manager.state(), ConnectionState::default());
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Info);
        assert!(manager.store().wallet_address().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_switch_failure_asks_for_manual_switch() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1).with_known_chain(LOCALHOST_CHAIN_ID));
        mock.fail(
            "wallet_switchEthereumChain",
            ProviderRpcError::new(-32000, "switch not allowed"),
        );
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert!(matches!(err, BookingError::ChainSwitchFailed { chain_id: LOCALHOST_CHAIN_ID, .. }));
        assert_eq!(manager.state(), ConnectionState::default());
        assert!(manager.store().wallet_address().unwrap().is_none());
        let last = notifier.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Error);
        assert_eq!(last.title, "Failed to switch network");
        assert!(last.description.contains("Please switch to localhost manually"));

        mock.allow("wallet_switchEthereumChain");
        manager.connect(NetworkKey::Localhost).await.unwrap();
        assert!(manager.state().is_on(NetworkKey::Localhost));
    }

    #[tokio::test]
    async fn test_connect_user_rejects_chain_switch() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1).with_known_chain(LOCALHOST_CHAIN_ID));
        mock.reject("wallet_switchEthereumChain");
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(err, BookingError::UserRejected);
        assert_eq!(manager.state(), ConnectionState::default());
        assert!(manager.store().wallet_address().unwrap().is_none());
        let last = notifier.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Info);
        assert_eq!(last.title, "Connection cancelled");
        assert_eq!(mock.current_chain(), 1);
    }

    #[tokio::test]
    async fn test_connect_add_chain_failure() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1));
        mock.fail(
            "wallet_addEthereumChain",
            ProviderRpcError::new(-32603, "rpc url unreachable"),
        );
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(
            err,
            BookingError::ChainSwitchFailed {
                chain_id: LOCALHOST_CHAIN_ID,
                reason: "rpc url unreachable".into(),
            }
        );
        assert_eq!(manager.state(), ConnectionState::default());
        assert_eq!(mock.call_count("wallet_switchEthereumChain"), 1);
        assert!(notifier.last().unwrap().description.contains("manually"));
    }

    #[tokio::test]
    async fn test_connect_add_chain_rejected() {
        let mock = Arc::new(MockWallet::new(vec![alice()], 1));
        mock.reject("wallet_addEthereumChain");
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(err, BookingError::UserRejected);
        assert_eq!(manager.state(), ConnectionState::default());
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Info);
        assert_eq!(mock.current_chain(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_connect_is_rejected() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let release = mock.hold("eth_requestAccounts");
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        let manager = Arc::new(manager);

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(NetworkKey::Localhost).await }
        });
        while !manager.state().is_busy {
            tokio::task::yield_now().await;
        }

        let err = manager.connect(NetworkKey::Localhost).await.unwrap_err();
        assert_eq!(err, BookingError::OperationInProgress);
        assert!(!manager.switch_network(NetworkKey::Sepolia).await);
        assert_eq!(manager.disconnect().await.unwrap_err(), BookingError::OperationInProgress);

        release.notify_one();
        let state = first.await.unwrap().unwrap();
        assert!(state.is_on(NetworkKey::Localhost));
        assert!(!manager.state().is_busy);
        assert_eq!(mock.call_count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn test_balance_display_rounds() {
        let mock = Arc::new(
            MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID)
                .with_balance(alloy_primitives::U256::from(42_000_050_000_000_000u128)),
        );
        let (manager, _) = manager(Some(mock), configured_registry());
        let state = manager.connect(NetworkKey::Localhost).await.unwrap();
        assert_eq!(state.balance_display, "0.0420 ETH");
    }

    #[tokio::test]
    async fn test_switch_failure_keeps_network() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        mock.fail(
            "wallet_switchEthereumChain",
            ProviderRpcError::new(-32000, "switch not allowed"),
        );
        assert!(!manager.switch_network(NetworkKey::Sepolia).await);

        let state = manager.state();
        assert!(state.is_on(NetworkKey::Localhost));
        assert_invariant(&state);
        let last = notifier.last().unwrap();
        assert_eq!(last.level, NotificationLevel::Error);
        assert!(last.description.contains("manually"));
    }

    #[tokio::test]
    async fn test_switch_requires_connection() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        assert!(!manager.switch_network(NetworkKey::Localhost).await);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_switch_network_success() {
        let mock = Arc::new(
            MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID).with_known_chain(SEPOLIA_CHAIN_ID),
        );
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        assert!(manager.switch_network(NetworkKey::Sepolia).await);
        assert!(manager.state().is_on(NetworkKey::Sepolia));
        let client = manager.session_client().await.unwrap();
        assert_eq!(client.network().key, NetworkKey::Sepolia);
    }

    #[tokio::test]
    async fn test_disconnect_clears_state_and_store() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::default());
        assert!(manager.session_client().await.is_none());
        assert!(manager.store().wallet_address().unwrap().is_none());

        // A chain change after an explicit disconnect does not reconnect
        manager.handle_event(WalletEvent::ChainChanged(LOCALHOST_CHAIN_ID)).await;
        assert!(!manager.state().is_connected);
    }

    #[tokio::test]
    async fn test_probe_restores_granted_connection() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID).pre_authorized());
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());

        let state = manager.probe_existing_connection().await;
        assert!(state.is_on(NetworkKey::Localhost));
        assert_eq!(mock.call_count("eth_requestAccounts"), 0);
        assert!(notifier.all().is_empty());
    }

    #[tokio::test]
    async fn test_probe_without_grant_stays_disconnected() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock), configured_registry());
        let state = manager.probe_existing_connection().await;
        assert_eq!(state, ConnectionState::default());
    }

    #[tokio::test]
    async fn test_probe_errors_are_silent() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID).pre_authorized());
        mock.fail("eth_chainId", ProviderRpcError::new(-32603, "boom"));
        let (manager, notifier) = manager(Some(mock), configured_registry());

        assert!(!manager.probe_existing_connection().await.is_connected);
        assert!(notifier.all().is_empty());
    }

    #[tokio::test]
    async fn test_zero_accounts_event_disconnects() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, notifier) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        mock.revoke();
        let state = manager.handle_event(WalletEvent::AccountsChanged(vec![])).await;
        assert_eq!(state, ConnectionState::default());
        assert!(manager.session_client().await.is_none());
        assert_eq!(notifier.last().unwrap().title, "Wallet disconnected");
    }

    #[tokio::test]
    async fn test_chain_change_to_unsupported_chain() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        mock.set_chain(1);
        let state = manager.handle_event(WalletEvent::ChainChanged(1)).await;
        assert!(state.is_connected);
        assert_eq!(state.active_network, None);
        assert_eq!(state.chain_id, Some(1));
        assert!(manager.session_client().await.is_none());
        assert_invariant(&state);
    }

    #[tokio::test]
    async fn test_account_switch_rebinds_signer() {
        let bob = Address::repeat_byte(0xb0);
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        manager.connect(NetworkKey::Localhost).await.unwrap();

        mock.set_accounts(vec![bob]);
        let state = manager.handle_event(WalletEvent::AccountsChanged(vec![bob])).await;
        assert_eq!(state.address, Some(bob));
        assert_eq!(manager.session_client().await.unwrap().signer(), bob);
        assert_eq!(manager.store().wallet_address().unwrap(), Some(bob.to_string()));
    }

    #[tokio::test]
    async fn test_event_loop_follows_wallet() {
        let mock = Arc::new(MockWallet::new(vec![alice()], LOCALHOST_CHAIN_ID));
        let (manager, _) = manager(Some(mock.clone()), configured_registry());
        let manager = Arc::new(manager);
        manager.connect(NetworkKey::Localhost).await.unwrap();

        let mut rx = manager.subscribe();
        let handle = manager.clone().spawn_event_loop().unwrap();
        mock.revoke();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while rx.borrow_and_update().is_connected {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(!manager.state().is_connected);
        handle.abort();
    }
}
