//! Wallet and trade-lifecycle collaborators
//!
//! The engine never builds or interprets transactions. It asks the wallet
//! to publish the payout a resolution describes and tells the trade
//! lifecycle about dispute state changes.

use arbiter_core::{Dispute, ResolutionOutcome, TradeId};
use async_trait::async_trait;

/// Wallet failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("wallet error: {message}")]
pub struct WalletError {
    /// Detail
    pub message: String,
}

impl WalletError {
    /// Create a wallet error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Trade lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trade error: {message}")]
pub struct TradeError {
    /// Detail
    pub message: String,
}

impl TradeError {
    /// Create a trade error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Escrow wallet capability
#[async_trait]
pub trait EscrowWallet: Send + Sync {
    /// Sign and broadcast the dispute payout; returns the transaction reference
    async fn publish_dispute_payout(
        &self,
        dispute: &Dispute,
        outcome: &ResolutionOutcome,
    ) -> Result<String, WalletError>;
}

/// Trade lifecycle capability
#[async_trait]
pub trait TradeLifecycle: Send + Sync {
    /// The counterparty opened a dispute on this trade
    async fn dispute_started_by_peer(&self, trade_id: &TradeId) -> Result<(), TradeError>;

    /// A resolution closed the dispute on this trade
    async fn dispute_closed(&self, trade_id: &TradeId) -> Result<(), TradeError>;
}
