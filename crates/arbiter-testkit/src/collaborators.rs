//! Recording wallet and trade lifecycle

use arbiter_core::{Dispute, ResolutionOutcome, TradeId};
use arbiter_dispute::{EscrowWallet, TradeError, TradeLifecycle, WalletError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Wallet that records publish requests and returns a fake transaction id
#[derive(Debug, Default)]
pub struct RecordingWallet {
    published: Mutex<Vec<(TradeId, u64, u64)>>,
    failing: AtomicBool,
}

impl RecordingWallet {
    /// Wallet that succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(trade, buyer_payout, seller_payout)` per successful publish
    pub fn published(&self) -> Vec<(TradeId, u64, u64)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EscrowWallet for RecordingWallet {
    async fn publish_dispute_payout(
        &self,
        dispute: &Dispute,
        outcome: &ResolutionOutcome,
    ) -> Result<String, WalletError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WalletError::new("wallet offline"));
        }
        self.published.lock().push((
            dispute.trade_id.clone(),
            outcome.buyer_payout,
            outcome.seller_payout,
        ));
        Ok(format!("payout-{}", dispute.trade_id))
    }
}

/// Trade lifecycle that records notifications
#[derive(Debug, Default)]
pub struct RecordingTrades {
    started_by_peer: Mutex<Vec<TradeId>>,
    closed: Mutex<Vec<TradeId>>,
}

impl RecordingTrades {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Trades moved to "dispute started by peer"
    pub fn started_by_peer(&self) -> Vec<TradeId> {
        self.started_by_peer.lock().clone()
    }

    /// Trades whose dispute was closed
    pub fn closed(&self) -> Vec<TradeId> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl TradeLifecycle for RecordingTrades {
    async fn dispute_started_by_peer(&self, trade_id: &TradeId) -> Result<(), TradeError> {
        self.started_by_peer.lock().push(trade_id.clone());
        Ok(())
    }

    async fn dispute_closed(&self, trade_id: &TradeId) -> Result<(), TradeError> {
        self.closed.lock().push(trade_id.clone());
        Ok(())
    }
}
