//! ============================================================================
//! Contract Session Client - Booking contract bound to a wallet signer
//! ============================================================================
//! Encodes booking-contract calls, asks the wallet to sign and broadcast,
//! and waits for the receipt before returning. Waiting for the block is
//! deliberate: callers show a pending state instead of tracking a
//! half-finished booking.
//!
//! Reads (`sessionCount`, `sessions(i)`) go through `eth_call` and cost no gas.
//! ============================================================================

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use tracing::{debug, info, warn};

use crate::confirmation::{ConfirmationConfig, ConfirmationWatcher};
use crate::contract::{to_u64, ITutorSessions};
use crate::error::{BookingError, Result};
use crate::identity::IdentitySet;
use crate::networks::NetworkDescriptor;
use crate::types::{SessionRecord, TxReceipt};
use crate::wallet::{ProviderRpcError, RpcReceipt, WalletClient};

/// Result of a confirmed `bookSession`
#[derive(Debug, Clone, PartialEq)]
pub struct BookedSession {
    pub session_id: u64,
    pub receipt: TxReceipt,
}

/// Map a wallet error raised while submitting a transaction
fn submission_error(e: ProviderRpcError) -> BookingError {
    if e.is_user_rejection() {
        BookingError::TransactionRejected
    } else if e.is_revert() {
        BookingError::TransactionReverted(e.message)
    } else {
        BookingError::Provider {
            code: e.code,
            message: e.message,
        }
    }
}

fn read_error(e: ProviderRpcError) -> BookingError {
    BookingError::Provider {
        code: e.code,
        message: e.message,
    }
}

/// Booking contract client for one signer on one network
#[derive(Debug, Clone)]
pub struct ContractSessionClient {
    wallet: WalletClient,
    signer: Address,
    network: NetworkDescriptor,
    confirmation: ConfirmationConfig,
}

impl ContractSessionClient {
    pub fn new(
        wallet: WalletClient,
        signer: Address,
        network: NetworkDescriptor,
        confirmation: ConfirmationConfig,
    ) -> Self {
        info!(
            "Binding session contract {} on {} to signer {}",
            network.contract_address, network.key, signer
        );
        Self {
            wallet,
            signer,
            network,
            confirmation,
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn network(&self) -> &NetworkDescriptor {
        &self.network
    }

    fn contract(&self) -> Address {
        self.network.contract_address
    }

    fn tx_receipt(&self, receipt: &RpcReceipt) -> TxReceipt {
        let hash = receipt.transaction_hash.to_string();
        TxReceipt {
            explorer_url: self.network.explorer_tx_url(&hash),
            tx_hash: hash,
            block_number: receipt.block_number.map(|b| b.to::<u64>()),
        }
    }

    /// Sign, broadcast and wait for the block
    async fn transact(&self, data: Vec<u8>) -> Result<RpcReceipt> {
        let tx_hash: B256 = self
            .wallet
            .send_transaction(self.signer, self.contract(), Bytes::from(data))
            .await
            .map_err(submission_error)?;
        info!("Transaction submitted: {}", tx_hash);

        ConfirmationWatcher::new(&self.wallet, &self.confirmation)
            .wait(tx_hash)
            .await
    }

    /// Book a session. Returns once the booking is mined.
    ///
    /// `scheduled_time` and `price` are already in hundredths.
    pub async fn book_session(
        &self,
        tutor: &str,
        student: &str,
        scheduled_time: u64,
        price: u64,
    ) -> Result<BookedSession> {
        if student.trim().is_empty() {
            return Err(BookingError::MissingIdentity);
        }

        info!(
            "Booking session: tutor='{}' time={} price={} on {}",
            tutor, scheduled_time, price, self.network.key
        );

        let call = ITutorSessions::bookSessionCall {
            tutorName: tutor.to_string(),
            studentName: student.to_string(),
            time: U256::from(scheduled_time),
            price: U256::from(price),
        };
        let receipt = self.transact(call.abi_encode()).await?;

        let session_id = match self.session_id_from_logs(&receipt) {
            Some(id) => id,
            None => {
                warn!("No SessionBooked event in receipt; falling back to sessionCount - 1");
                self.session_count().await?.checked_sub(1).ok_or_else(|| {
                    BookingError::Abi("sessionCount is zero after a confirmed booking".into())
                })?
            }
        };

        info!("Session {} booked", session_id);
        Ok(BookedSession {
            session_id,
            receipt: self.tx_receipt(&receipt),
        })
    }

    fn session_id_from_logs(&self, receipt: &RpcReceipt) -> Option<u64> {
        receipt
            .logs
            .iter()
            .filter(|log| log.address == self.contract())
            .filter(|log| {
                log.topics.first() == Some(&ITutorSessions::SessionBooked::SIGNATURE_HASH)
            })
            .find_map(|log| {
                ITutorSessions::SessionBooked::decode_raw_log(
                    log.topics.iter().copied(),
                    &log.data,
                    true,
                )
                .ok()
            })
            .and_then(|event| u64::try_from(event.sessionId).ok())
    }

    /// Mark a session complete. Only the booking student may do this;
    /// the contract enforces it and anyone else gets `TransactionReverted`.
    pub async fn complete_session(&self, session_id: u64) -> Result<TxReceipt> {
        info!("Completing session {} on {}", session_id, self.network.key);

        let call = ITutorSessions::completeSessionCall {
            sessionId: U256::from(session_id),
        };
        let receipt = self.transact(call.abi_encode()).await?;

        info!("Session {} completed", session_id);
        Ok(self.tx_receipt(&receipt))
    }

    pub async fn session_count(&self) -> Result<u64> {
        let data = ITutorSessions::sessionCountCall {}.abi_encode();
        let raw = self
            .wallet
            .call(self.contract(), Bytes::from(data))
            .await
            .map_err(read_error)?;
        let decoded = ITutorSessions::sessionCountCall::abi_decode_returns(&raw, true)
            .map_err(|e| BookingError::Abi(format!("sessionCount: {}", e)))?;
        to_u64(decoded._0, "sessionCount")
    }

    pub async fn read_session(&self, session_id: u64) -> Result<SessionRecord> {
        let data = ITutorSessions::sessionsCall {
            index: U256::from(session_id),
        }
        .abi_encode();
        let raw = self
            .wallet
            .call(self.contract(), Bytes::from(data))
            .await
            .map_err(read_error)?;
        let s = ITutorSessions::sessionsCall::abi_decode_returns(&raw, true)
            .map_err(|e| BookingError::Abi(format!("sessions({}): {}", session_id, e)))?;

        Ok(SessionRecord {
            session_id,
            tutor: s.tutor,
            student: s.student,
            scheduled_time: to_u64(s.time, "time")?,
            price: to_u64(s.price, "price")?,
            completed: s.completed,
        })
    }

    /// Scan every session and keep the ones booked by `identity`
    pub async fn sessions_for(&self, identity: &IdentitySet) -> Result<Vec<SessionRecord>> {
        let count = self.session_count().await?;
        debug!("Scanning {} sessions for identity match", count);

        let mut mine = Vec::new();
        for id in 0..count {
            let session = self.read_session(id).await?;
            if identity.matches(&session.student) {
                mine.push(session);
            }
        }
        Ok(mine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::{NetworkKey, NetworkRegistry};
    use crate::wallet::MockWallet;
    use std::sync::Arc;

    async fn bound(mock: Arc<MockWallet>, signer: Address) -> ContractSessionClient {
        let wallet = WalletClient::new(mock);
        wallet.request_accounts().await.unwrap();
        let network = NetworkRegistry::default()
            .describe(NetworkKey::Localhost)
            .unwrap()
            .clone();
        ContractSessionClient::new(wallet, signer, network, ConfirmationConfig::immediate())
    }

    #[tokio::test]
    async fn test_book_and_read_back() {
        let student = Address::repeat_byte(0x11);
        let mock = Arc::new(MockWallet::new(vec![student], 31337));
        mock.delay_receipts(2);
        let client = bound(mock.clone(), student).await;

        let booked = client.book_session("Tutor 3", "uid:abc", 150, 5075).await.unwrap();
        assert_eq!(booked.session_id, 0);
        assert!(booked.receipt.explorer_url.is_none());

        let second = client.book_session("Tutor 4", "uid:abc", 100, 4500).await.unwrap();
        assert_eq!(second.session_id, 1);

        assert_eq!(client.session_count().await.unwrap(), 2);
        let record = client.read_session(0).await.unwrap();
        assert_eq!(record.tutor, "Tutor 3");
        assert_eq!(record.scheduled_time, 150);
        assert_eq!(record.price, 5075);
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn test_book_requires_student() {
        let signer = Address::repeat_byte(0x11);
        let client = bound(Arc::new(MockWallet::new(vec![signer], 31337)), signer).await;
        let err = client.book_session("Tutor 1", "  ", 100, 100).await.unwrap_err();
        assert_eq!(err, BookingError::MissingIdentity);
    }

    #[tokio::test]
    async fn test_rejected_signature() {
        let signer = Address::repeat_byte(0x11);
        let mock = Arc::new(MockWallet::new(vec![signer], 31337));
        let client = bound(mock.clone(), signer).await;
        mock.reject("eth_sendTransaction");

        let err = client.book_session("Tutor 1", "uid:x", 100, 100).await.unwrap_err();
        assert_eq!(err, BookingError::TransactionRejected);
        assert_eq!(mock.session_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_on_chain_is_reverted() {
        let signer = Address::repeat_byte(0x11);
        let mock = Arc::new(MockWallet::new(vec![signer], 31337));
        let client = bound(mock.clone(), signer).await;
        mock.fail_next_transaction_on_chain();

        let err = client.book_session("Tutor 1", "uid:x", 100, 100).await.unwrap_err();
        assert!(matches!(err, BookingError::TransactionReverted(_)));
    }

    #[tokio::test]
    async fn test_only_booking_student_can_complete() {
        let student = Address::repeat_byte(0x11);
        let stranger = Address::repeat_byte(0x22);
        let mock = Arc::new(MockWallet::new(vec![student, stranger], 31337));
        let as_student = bound(mock.clone(), student).await;
        let as_stranger = bound(mock.clone(), stranger).await;

        let booked = as_student.book_session("Tutor 1", "uid:x", 100, 100).await.unwrap();

        let err = as_stranger.complete_session(booked.session_id).await.unwrap_err();
        assert!(matches!(err, BookingError::TransactionReverted(_)));
        assert_eq!(mock.session_completed(0), Some(false));

        as_student.complete_session(booked.session_id).await.unwrap();
        assert!(as_student.read_session(0).await.unwrap().completed);
    }

    #[tokio::test]
    async fn test_sessions_for_identity() {
        let student = Address::repeat_byte(0x11);
        let mock = Arc::new(MockWallet::new(vec![student], 31337));
        let client = bound(mock, student).await;

        client.book_session("Tutor 1", "UID:ABC", 100, 100).await.unwrap();
        client.book_session("Tutor 2", "someone-else", 100, 100).await.unwrap();
        client.book_session("Tutor 3", "uid:abc", 100, 100).await.unwrap();

        let user = crate::store::UserRecord::new("x@example.com", Some("uid:abc".into()));
        let identity = IdentitySet::for_user(Some(&user), None);
        let mine = client.sessions_for(&identity).await.unwrap();
        assert_eq!(mine.iter().map(|s| s.session_id).collect::<Vec<_>>(), vec![0, 2]);
    }
}
