//! ============================================================================
//! Confirmation Polling - Wait for a submitted transaction to be mined
//! ============================================================================
//! Booking and completion calls block until their transaction is mined.
//! This module polls for the receipt with:
//! - Fixed poll interval while the transaction is pending
//! - Exponential backoff with jitter when the wallet/RPC errors
//! - Error classification (retryable vs permanent)
//!
//! No timeout is imposed by default: a pending transaction is the wallet's
//! and the network's business. `max_polls` exists for hosts that want one.
//! ============================================================================

use alloy_primitives::B256;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{BookingError, Result};
use crate::wallet::{ProviderRpcError, RpcReceipt, WalletClient};

/// Configuration for receipt polling
#[derive(Debug, Clone)]
pub struct ConfirmationConfig {
    /// Delay between polls while the transaction is pending
    pub poll_interval_ms: u64,
    /// Base delay after a failed poll (multiplied by 2^consecutive_failures)
    pub base_delay_ms: u64,
    /// Maximum delay after failed polls
    pub max_delay_ms: u64,
    /// Whether to add jitter to error delays
    pub jitter: bool,
    /// Give up after this many polls; None waits indefinitely
    pub max_polls: Option<u32>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            base_delay_ms: 500,
            max_delay_ms: 10000,
            jitter: true,
            max_polls: None,
        }
    }
}

impl ConfirmationConfig {
    /// Tight polling for in-memory wallets
    pub fn immediate() -> Self {
        Self {
            poll_interval_ms: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
            max_polls: Some(1000),
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, keep polling
    Retryable,
    /// Error is permanent, stop polling
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify a polling error to decide whether to keep waiting
pub fn classify_error(error: &ProviderRpcError) -> ErrorKind {
    let lower = error.message.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        return ErrorKind::RateLimited;
    }

    if error.code == crate::wallet::CODE_UNAUTHORIZED
        || lower.contains("method not found")
        || lower.contains("not supported")
        || lower.contains("invalid params")
    {
        return ErrorKind::Permanent;
    }

    ErrorKind::Retryable
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &ConfirmationConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // 0-50% extra
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Polls a wallet until a transaction has a receipt
pub struct ConfirmationWatcher<'a> {
    wallet: &'a WalletClient,
    config: &'a ConfirmationConfig,
}

impl<'a> ConfirmationWatcher<'a> {
    pub fn new(wallet: &'a WalletClient, config: &'a ConfirmationConfig) -> Self {
        Self { wallet, config }
    }

    /// Wait until `tx_hash` is mined. A mined-but-failed transaction is
    /// `TransactionReverted`.
    pub async fn wait(&self, tx_hash: B256) -> Result<RpcReceipt> {
        info!("Waiting for confirmation of {}", tx_hash);
        let mut polls: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            if let Some(max) = self.config.max_polls {
                if polls >= max {
                    warn!("Gave up on {} after {} polls", tx_hash, polls);
                    return Err(BookingError::Provider {
                        code: crate::wallet::CODE_INTERNAL,
                        message: format!("transaction {} not confirmed after {} polls", tx_hash, polls),
                    });
                }
            }
            polls += 1;

            match self.wallet.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.succeeded() {
                        info!(
                            "Transaction confirmed: {} (block {:?}, poll {})",
                            tx_hash, receipt.block_number, polls
                        );
                        return Ok(receipt);
                    }
                    warn!("Transaction failed on-chain: {}", tx_hash);
                    return Err(BookingError::TransactionReverted(format!(
                        "transaction {} was mined with failure status",
                        tx_hash
                    )));
                }
                Ok(None) => {
                    failures = 0;
                    debug!("Transaction not yet mined (poll {})", polls);
                    sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Err(e) => {
                    let kind = classify_error(&e);
                    warn!("Receipt poll {} failed ({:?}): {}", polls, kind, e);
                    match kind {
                        ErrorKind::Permanent => {
                            return Err(BookingError::Provider {
                                code: e.code,
                                message: e.message,
                            });
                        }
                        ErrorKind::RateLimited => {
                            sleep(Duration::from_millis(self.config.max_delay_ms)).await;
                        }
                        ErrorKind::Retryable => {
                            sleep(calculate_delay(failures, self.config)).await;
                        }
                    }
                    failures = failures.saturating_add(1);
                }
            }
        }
    }
}
