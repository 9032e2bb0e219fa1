//! ============================================================================
//! Booking Context - What the surrounding UI sees
//! ============================================================================
//! One injected handle over the connection manager and the contract client.
//! Pages read connection state and call booking operations through it
//! without touching provider or ABI details.
//! ============================================================================

use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::{BookingError, Result};
use crate::identity::{resolve_student, IdentitySet};
use crate::networks::NetworkKey;
use crate::notify::Notification;
use crate::session_client::{BookedSession, ContractSessionClient};
use crate::types::{ConnectionState, SessionRecord, TxReceipt};
use crate::units::{estimate_gas_fee, format_price, DEFAULT_GAS_PRICE_WEI};

#[derive(Clone)]
pub struct BookingContext {
    manager: Arc<ConnectionManager>,
}

impl BookingContext {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.state().address
    }

    pub fn balance_display(&self) -> String {
        self.state().balance_display
    }

    pub fn current_network(&self) -> Option<NetworkKey> {
        self.state().active_network
    }

    pub fn is_busy(&self) -> bool {
        self.state().is_busy
    }

    /// Connect to `key`, or to the registry's preferred default
    pub async fn connect(&self, key: Option<NetworkKey>) -> Result<ConnectionState> {
        let key = key.unwrap_or_else(|| self.manager.registry().preferred_default());
        self.manager.connect(key).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.manager.disconnect().await
    }

    pub async fn switch_network(&self, key: NetworkKey) -> bool {
        self.manager.switch_network(key).await
    }

    async fn client(&self) -> Result<Arc<ContractSessionClient>> {
        self.manager
            .session_client()
            .await
            .ok_or(BookingError::WalletNotConnected)
    }

    fn identity(&self, client: &ContractSessionClient) -> Result<IdentitySet> {
        let user = self.manager.store().user()?;
        Ok(IdentitySet::for_user(user.as_ref(), Some(&client.signer())))
    }

    /// Book as the current user without reporting the outcome.
    /// Shared by the payment flow, which reports on its own.
    pub(crate) async fn book_quietly(
        &self,
        tutor: &str,
        scheduled_time: u64,
        price: u64,
    ) -> Result<BookedSession> {
        let client = self.client().await?;
        let user = self.manager.store().user()?;
        let signer = client.signer();
        let student = resolve_student(user.as_ref(), Some(&signer))?;
        client.book_session(tutor, &student, scheduled_time, price).await
    }

    /// Book a session for the signed-in student. Blocks until mined.
    pub async fn book_session(
        &self,
        tutor: &str,
        scheduled_time: u64,
        price: u64,
    ) -> Result<BookedSession> {
        match self.book_quietly(tutor, scheduled_time, price).await {
            Ok(booked) => {
                self.manager.notify(Notification::success(
                    "Session booked successfully!",
                    format!(
                        "Session #{} with {} for ${}",
                        booked.session_id,
                        tutor,
                        format_price(price)
                    ),
                ));
                Ok(booked)
            }
            Err(e) => {
                let title = match e {
                    BookingError::WalletNotConnected => "Wallet not connected",
                    _ => "Transaction failed",
                };
                self.manager
                    .notify(Notification::new(e.severity(), title, e.to_string()));
                Err(e)
            }
        }
    }

    /// Complete a session. Authorization is left to the contract.
    pub async fn complete_session(&self, session_id: u64) -> Result<TxReceipt> {
        let result = async {
            let client = self.client().await?;
            client.complete_session(session_id).await
        }
        .await;

        match &result {
            Ok(_) => self.manager.notify(Notification::success(
                "Session completed!",
                "Payment has been released to the tutor.",
            )),
            Err(e) => {
                warn!("Completing session {} failed: {}", session_id, e);
                self.manager.notify(Notification::new(
                    e.severity(),
                    "Transaction failed",
                    e.to_string(),
                ));
            }
        }
        result
    }

    /// Every session booked under any of the user's identities
    pub async fn my_sessions(&self) -> Result<Vec<SessionRecord>> {
        let client = self.client().await?;
        let identity = self.identity(&client)?;
        client.sessions_for(&identity).await
    }

    pub async fn upcoming_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.my_sessions().await?;
        sessions.retain(|s| !s.completed);
        Ok(sessions)
    }

    pub async fn past_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.my_sessions().await?;
        sessions.retain(|s| s.completed);
        Ok(sessions)
    }

    /// Display estimate of one booking's fee, from the wallet's gas price
    /// when it answers, otherwise a nominal testnet price
    pub async fn gas_estimate(&self) -> String {
        let gas_price = match self.manager.wallet() {
            Some(wallet) => wallet.gas_price().await.unwrap_or_else(|e| {
                info!("Gas price unavailable ({}); using nominal price", e);
                DEFAULT_GAS_PRICE_WEI
            }),
            None => DEFAULT_GAS_PRICE_WEI,
        };
        estimate_gas_fee(gas_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::ConfirmationConfig;
    use crate::networks::{NetworkRegistry, LOCALHOST_CHAIN_ID};
    use crate::notify::{NotificationLevel, RecordingNotifier};
    use crate::store::{temp_store, UserRecord};
    use crate::wallet::{MockWallet, WalletProvider};

    fn context(mock: Option<Arc<MockWallet>>) -> (BookingContext, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let manager = ConnectionManager::new(
            mock.map(|m| m as Arc<dyn WalletProvider>),
            Arc::new(NetworkRegistry::default()),
            Arc::new(temp_store()),
            notifier.clone(),
            ConfirmationConfig::immediate(),
        );
        (BookingContext::new(Arc::new(manager)), notifier)
    }

    #[tokio::test]
    async fn test_book_requires_connection() {
        let (ctx, notifier) = context(None);
        let err = ctx.book_session("Tutor 1", 100, 5000).await.unwrap_err();
        assert_eq!(err, BookingError::WalletNotConnected);
        assert_eq!(notifier.last().unwrap().title, "Wallet not connected");
    }

    #[tokio::test]
    async fn test_default_network_is_preferred() {
        let mock = Arc::new(MockWallet::new(vec![Address::repeat_byte(1)], LOCALHOST_CHAIN_ID));
        let (ctx, _) = context(Some(mock.clone()));
        // Sepolia is the preferred default and has no real RPC URL here
        let err = ctx.connect(None).await.unwrap_err();
        assert_eq!(err, BookingError::NetworkNotConfigured("sepolia".into()));
        assert!(!ctx.is_connected());
    }

    #[tokio::test]
    async fn test_book_then_list_upcoming_and_past() {
        let student = Address::repeat_byte(0x42);
        let mock = Arc::new(MockWallet::new(vec![student], LOCALHOST_CHAIN_ID));
        let (ctx, notifier) = context(Some(mock.clone()));
        ctx.manager()
            .store()
            .save_user(&UserRecord::new("ada@example.com", Some("Ada".into())))
            .unwrap();

        ctx.connect(Some(NetworkKey::Localhost)).await.unwrap();
        assert_eq!(ctx.wallet_address(), Some(student));
        assert_eq!(ctx.current_network(), Some(NetworkKey::Localhost));

        let first = ctx.book_session("Tutor 1", 100, 5075).await.unwrap();
        let second = ctx.book_session("Tutor 2", 150, 4000).await.unwrap();
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Success);

        ctx.complete_session(first.session_id).await.unwrap();

        let upcoming = ctx.upcoming_sessions().await.unwrap();
        let past = ctx.past_sessions().await.unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].session_id, second.session_id);
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].session_id, first.session_id);
        assert_eq!(past[0].student, crate::identity::canonical_id("ada@example.com"));
    }

    #[tokio::test]
    async fn test_wallet_address_used_without_profile() {
        let student = Address::repeat_byte(0x42);
        let mock = Arc::new(MockWallet::new(vec![student], LOCALHOST_CHAIN_ID));
        let (ctx, _) = context(Some(mock));
        ctx.connect(Some(NetworkKey::Localhost)).await.unwrap();

        ctx.book_session("Tutor 1", 100, 100).await.unwrap();
        let mine = ctx.my_sessions().await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].student, student.to_string().to_lowercase());
    }

    #[tokio::test]
    async fn test_failed_completion_leaves_sessions() {
        let student = Address::repeat_byte(0x42);
        let mock = Arc::new(MockWallet::new(vec![student], LOCALHOST_CHAIN_ID));
        let (ctx, notifier) = context(Some(mock.clone()));
        ctx.connect(Some(NetworkKey::Localhost)).await.unwrap();
        let booked = ctx.book_session("Tutor 1", 100, 100).await.unwrap();

        mock.revert_next_transaction("Only student can complete");
        let err = ctx.complete_session(booked.session_id).await.unwrap_err();
        assert!(matches!(err, BookingError::TransactionReverted(_)));
        assert_eq!(notifier.last().unwrap().level, NotificationLevel::Error);
        assert_eq!(ctx.upcoming_sessions().await.unwrap().len(), 1);
        assert!(ctx.past_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gas_estimate() {
        let (offline, _) = context(None);
        assert_eq!(offline.gas_estimate().await, "0.003600");

        let mock = Arc::new(MockWallet::new(vec![Address::repeat_byte(1)], LOCALHOST_CHAIN_ID));
        let (ctx, _) = context(Some(mock));
        assert_eq!(ctx.gas_estimate().await, "0.003600");
    }
}
