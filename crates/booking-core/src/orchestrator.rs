//! ============================================================================
//! Payment Orchestrator - From purchase intent to confirmed booking
//! ============================================================================
//! A catalog page leaves a PendingPaymentIntent in the store. Paying for it:
//!
//!   1. not connected           -> connect (fail: WalletConnectionRequired)
//!   2. connected, wrong chain  -> switch  (fail: NetworkMismatch)
//!   3. book on-chain (courses get a synthetic booking, then local enrollment)
//!   4. success                 -> clear the intent, send the user onward
//!   5. failure                 -> keep the intent so the user can retry
//!
//! Entering without an intent aborts straight to Home. Simulated mode runs
//! the same bookkeeping without a wallet.
//! ============================================================================

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::BookingContext;
use crate::error::{BookingError, Result};
use crate::networks::NetworkKey;
use crate::notify::Notification;
use crate::types::{
    Destination, ItemType, PaymentReceipt, PaymentStatus, PendingPaymentIntent, TxReceipt,
};
use crate::units::{format_price, price_to_hundredths};

/// Nominal booking length in hundredths of an hour (1h)
pub const NOMINAL_DURATION: u64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// No wallet, no chain: a synthetic receipt
    Simulated,
    /// Wallet-signed booking transaction
    OnChain,
}

/// Where to send the user when a payment attempt fails, if anywhere
pub fn redirect_for(err: &BookingError) -> Option<Destination> {
    match err {
        BookingError::NoPendingPayment => Some(Destination::Home),
        _ => None,
    }
}

fn destination_for(item_type: ItemType) -> Destination {
    match item_type {
        ItemType::Course => Destination::MyCourses,
        ItemType::Tutor => Destination::MySessions,
    }
}

fn course_title(course_id: &str) -> String {
    format!("Course {}", course_id)
}

pub struct PaymentOrchestrator {
    context: BookingContext,
    mode: PaymentMode,
    status: watch::Sender<PaymentStatus>,
}

impl PaymentOrchestrator {
    pub fn new(context: BookingContext, mode: PaymentMode) -> Self {
        let (status, _) = watch::channel(PaymentStatus::Idle);
        Self {
            context,
            mode,
            status,
        }
    }

    pub fn mode(&self) -> PaymentMode {
        self.mode
    }

    pub fn status(&self) -> PaymentStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PaymentStatus> {
        self.status.subscribe()
    }

    /// Record what the user wants to buy, replacing any earlier intent
    pub fn start_checkout(
        &self,
        item_type: ItemType,
        item_id: &str,
        price: f64,
    ) -> Result<PendingPaymentIntent> {
        let intent = PendingPaymentIntent::new(item_type, item_id, price);
        self.context.manager().store().set_pending_payment(&intent)?;
        info!("Checkout started: {} {} at {}", item_type, item_id, price);
        self.status.send_replace(PaymentStatus::Idle);
        Ok(intent)
    }

    pub fn pending(&self) -> Result<Option<PendingPaymentIntent>> {
        self.context.manager().store().pending_payment()
    }

    /// Pay for the pending intent on `selected` (or the preferred network)
    pub async fn execute_payment(&self, selected: Option<NetworkKey>) -> Result<PaymentReceipt> {
        let store = self.context.manager().store();
        let Some(intent) = store.pending_payment()? else {
            warn!("Payment entered without a pending intent");
            self.context.manager().notify(Notification::error(
                "No payment information found",
                "Please select a course or tutor to purchase.",
            ));
            return Err(BookingError::NoPendingPayment);
        };

        info!(
            "Executing {:?} payment for {} {} (${})",
            self.mode,
            intent.item_type,
            intent.item_id,
            format_price(price_to_hundredths(intent.price))
        );
        self.status.send_replace(PaymentStatus::Pending);

        let result = match self.mode {
            PaymentMode::Simulated => self.settle_simulated(&intent),
            PaymentMode::OnChain => self.settle_on_chain(&intent, selected).await,
        };

        match result {
            Ok(receipt) => {
                if let Err(e) = store.clear_pending_payment() {
                    // The booking is final; a stale intent only risks a repeat prompt
                    warn!("Failed to clear pending payment: {}", e);
                }
                let (title, description) = match intent.item_type {
                    ItemType::Course if receipt.enrollment_pending => (
                        "Course purchased successfully!",
                        format!(
                            "Payment confirmed in {}, but enrollment could not be saved on this device.",
                            receipt.tx.tx_hash
                        ),
                    ),
                    ItemType::Course => (
                        "Course purchased successfully!",
                        "You have been enrolled in the course.".to_string(),
                    ),
                    ItemType::Tutor => (
                        "Tutor session booked successfully!",
                        match receipt.session_id {
                            Some(id) => format!("Session #{} has been added to the blockchain.", id),
                            None => "Your session has been recorded.".to_string(),
                        },
                    ),
                };
                self.context
                    .manager()
                    .notify(Notification::success(title, description));
                self.status.send_replace(PaymentStatus::Succeeded {
                    receipt: receipt.clone(),
                });
                Ok(receipt)
            }
            Err(e) => {
                warn!("Payment failed, keeping pending intent: {}", e);
                self.context.manager().notify(Notification::new(
                    e.severity(),
                    "Payment failed",
                    format!("{}. Please try again.", e),
                ));
                self.status.send_replace(PaymentStatus::Failed {
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                });
                Err(e)
            }
        }
    }

    /// Steps 1 and 2: a connection on the selected network
    async fn ensure_network(&self, network: NetworkKey) -> Result<()> {
        let state = self.context.state();
        if !state.is_connected {
            info!("Payment needs a wallet; connecting to {}", network);
            if let Err(e) = self.context.connect(Some(network)).await {
                debug!("Connect during payment failed: {}", e);
                return Err(BookingError::WalletConnectionRequired);
            }
        } else if state.active_network != Some(network) {
            info!(
                "Wallet on {:?}, payment needs {}; switching",
                state.active_network, network
            );
            if !self.context.switch_network(network).await {
                return Err(BookingError::NetworkMismatch {
                    expected: network.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn settle_on_chain(
        &self,
        intent: &PendingPaymentIntent,
        selected: Option<NetworkKey>,
    ) -> Result<PaymentReceipt> {
        let network =
            selected.unwrap_or_else(|| self.context.manager().registry().preferred_default());
        self.ensure_network(network).await?;

        let price = price_to_hundredths(intent.price);
        let tutor = match intent.item_type {
            ItemType::Course => format!(
                "course:{}:{}",
                intent.item_id,
                chrono::Utc::now().timestamp_millis()
            ),
            ItemType::Tutor => format!("Tutor {}", intent.item_id),
        };

        let booked = self
            .context
            .book_quietly(&tutor, NOMINAL_DURATION, price)
            .await?;

        // The booking is mined; from here on the payment has succeeded
        let mut enrollment_pending = false;
        if intent.item_type == ItemType::Course {
            if let Err(e) = self
                .context
                .manager()
                .store()
                .enroll_course(&intent.item_id, &course_title(&intent.item_id))
            {
                error!(
                    "Course {} paid in session {} but enrollment failed: {}",
                    intent.item_id, booked.session_id, e
                );
                enrollment_pending = true;
            }
        }

        Ok(PaymentReceipt {
            item_type: intent.item_type,
            item_id: intent.item_id.clone(),
            session_id: Some(booked.session_id),
            tx: booked.receipt,
            destination: destination_for(intent.item_type),
            simulated: false,
            enrollment_pending,
        })
    }

    fn settle_simulated(&self, intent: &PendingPaymentIntent) -> Result<PaymentReceipt> {
        let tx_hash = keccak256(uuid::Uuid::new_v4().as_bytes()).to_string();
        debug!("Simulated payment {}", tx_hash);

        if intent.item_type == ItemType::Course {
            self.context
                .manager()
                .store()
                .enroll_course(&intent.item_id, &course_title(&intent.item_id))?;
        }

        Ok(PaymentReceipt {
            item_type: intent.item_type,
            item_id: intent.item_id.clone(),
            session_id: None,
            tx: TxReceipt {
                tx_hash,
                block_number: None,
                explorer_url: None,
            },
            destination: destination_for(intent.item_type),
            simulated: true,
            enrollment_pending: false,
        })
    }
}
