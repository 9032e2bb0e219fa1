//! ============================================================================
//! BOOKING-CORE: Wallet, Network and On-Chain Session Booking
//! ============================================================================
//! This crate handles everything between a tutoring marketplace UI and the
//! TutorSessions contract:
//! - Network registry (chain ids, RPC endpoints, contract addresses)
//! - Wallet connection lifecycle over an EIP-1193 style provider
//! - Contract session client (book, complete, read back)
//! - Payment orchestration from a pending purchase intent
//! - Local persisted state via redb
//! ============================================================================

pub mod confirmation;
pub mod connection;
pub mod context;
pub mod contract;
pub mod error;
pub mod identity;
pub mod networks;
pub mod notify;
pub mod orchestrator;
pub mod session_client;
pub mod store;
pub mod types;
pub mod units;
pub mod wallet;

// Re-export main types for convenience
pub use types::*;
pub use confirmation::ConfirmationConfig;
pub use connection::ConnectionManager;
pub use context::BookingContext;
pub use error::{BookingError, Result};
pub use networks::{NetworkDescriptor, NetworkKey, NetworkRegistry, RegistryConfig};
pub use notify::{ChannelNotifier, Notification, NotificationLevel, Notifier, TracingNotifier};
pub use orchestrator::{redirect_for, PaymentMode, PaymentOrchestrator};
pub use session_client::{BookedSession, ContractSessionClient};
pub use store::{EnrolledCourse, LocalStore, UserRecord};
pub use wallet::{JsonRpcWallet, MockWallet, WalletClient, WalletEvent, WalletProvider};
