//! ============================================================================
//! Booking Errors - Failure taxonomy for wallet, network and contract calls
//! ============================================================================
//! Every failure the core can produce is one of these variants. Each maps to
//! a notification severity so callers can surface it without inspecting the
//! variant themselves.
//! ============================================================================

use thiserror::Error;

use crate::notify::NotificationLevel;

pub type Result<T> = std::result::Result<T, BookingError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BookingError {
    // Configuration
    #[error("unknown network kind: {0}")]
    UnknownNetworkKind(String),
    #[error("network {0} is not configured for this deployment")]
    NetworkNotConfigured(String),

    // Environment
    #[error("no wallet provider available")]
    NoWalletProvider,

    // User declined
    #[error("request rejected in wallet")]
    UserRejected,
    #[error("transaction rejected in wallet")]
    TransactionRejected,

    // Concurrency guard
    #[error("another wallet operation is already in progress")]
    OperationInProgress,

    // Preconditions
    #[error("wallet not connected")]
    WalletNotConnected,
    #[error("no student identity could be resolved")]
    MissingIdentity,
    #[error("wallet connection required to continue")]
    WalletConnectionRequired,
    #[error("wallet is on the wrong network (expected {expected})")]
    NetworkMismatch { expected: String },
    #[error("no pending payment found")]
    NoPendingPayment,

    // Provider / chain
    #[error("failed to switch wallet to chain {chain_id}: {reason}")]
    ChainSwitchFailed { chain_id: u64, reason: String },
    #[error("wallet provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),

    // Local
    #[error("ABI error: {0}")]
    Abi(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Notification level used when this error is surfaced to the user.
    /// User-declined prompts are informational, not failures.
    pub fn severity(&self) -> NotificationLevel {
        match self {
            BookingError::UserRejected | BookingError::TransactionRejected => {
                NotificationLevel::Info
            }
            BookingError::OperationInProgress | BookingError::WalletConnectionRequired => {
                NotificationLevel::Warning
            }
            _ => NotificationLevel::Error,
        }
    }

    /// Whether the user can simply try again without changing anything.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BookingError::UnknownNetworkKind(_)
                | BookingError::NetworkNotConfigured(_)
                | BookingError::NoWalletProvider
                | BookingError::NoPendingPayment
        )
    }
}
