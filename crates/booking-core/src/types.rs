//! ============================================================================
//! Core Types for the Booking Core
//! ============================================================================
//! Connection state, on-chain session records and purchase intents.
//! Serializable so a host can forward them to its UI as JSON.
//! ============================================================================

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::networks::NetworkKey;
use crate::units::{format_price, format_time};

/// Snapshot of the wallet connection.
/// `address.is_some()` iff `is_connected`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub address: Option<Address>,
    pub balance_display: String,
    /// Network the wallet is on; None while disconnected or when the
    /// wallet sits on a chain outside the registry
    pub active_network: Option<NetworkKey>,
    /// Last chain id reported by the wallet
    pub chain_id: Option<u64>,
    pub is_busy: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            is_connected: false,
            address: None,
            balance_display: "0".to_string(),
            active_network: None,
            chain_id: None,
            is_busy: false,
        }
    }
}

impl ConnectionState {
    pub fn is_on(&self, key: NetworkKey) -> bool {
        self.is_connected && self.active_network == Some(key)
    }
}

/// One tutoring session as stored by the booking contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: u64,
    pub tutor: String,
    pub student: String,
    /// Duration in hundredths (100 = 1 hour)
    pub scheduled_time: u64,
    /// Price in hundredths of the display currency
    pub price: u64,
    pub completed: bool,
}

impl SessionRecord {
    pub fn price_display(&self) -> String {
        format_price(self.price)
    }

    pub fn time_display(&self) -> String {
        format_time(self.scheduled_time)
    }
}

/// What a purchase is for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Course,
    Tutor,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemType::Course => f.write_str("course"),
            ItemType::Tutor => f.write_str("tutor"),
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "course" => Ok(ItemType::Course),
            "tutor" => Ok(ItemType::Tutor),
            other => Err(format!("unknown item type '{}': expected course or tutor", other)),
        }
    }
}

/// A purchase the user started from a catalog page and has not paid yet.
/// Single slot: creating a new one replaces the old one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPaymentIntent {
    pub item_type: ItemType,
    pub item_id: String,
    /// Display price (e.g. 59.99)
    pub price: f64,
    /// Unix millis when the intent was created
    pub timestamp: i64,
}

impl PendingPaymentIntent {
    pub fn new(item_type: ItemType, item_id: impl Into<String>, price: f64) -> Self {
        Self {
            item_type,
            item_id: item_id.into(),
            price,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Confirmed transaction, as reported back to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub explorer_url: Option<String>,
}

/// Where the host should send the user after a successful payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Enrolled-courses view
    MyCourses,
    /// Upcoming-sessions view
    MySessions,
    /// Landing page; used when the payment flow was entered without an intent
    Home,
}

/// Successful payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentReceipt {
    pub item_type: ItemType,
    pub item_id: String,
    pub session_id: Option<u64>,
    pub tx: TxReceipt,
    pub destination: Destination,
    /// True when produced by the simulated flow
    pub simulated: bool,
    /// Paid for, but the local course enrollment could not be written
    #[serde(default)]
    pub enrollment_pending: bool,
}

/// State of an in-flight payment for a UI spinner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentStatus {
    Idle,
    Pending,
    Succeeded { receipt: PaymentReceipt },
    Failed { reason: String, retryable: bool },
}
