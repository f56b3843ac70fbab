//! Signed arbitration outcomes
//!
//! A [`Resolution`] pairs a [`ResolutionOutcome`] with the agent's ed25519
//! signature over the outcome's bincode encoding. The rationale chat
//! message rides along per delivery and is not covered by the signature.
//!
//! Once signed, a resolution is final: the engine re-sends it but never
//! signs a second outcome for the same dispute.

use crate::chat::ChatMessage;
use crate::contract::{EscrowAmounts, Side};
use crate::errors::{ArbiterError, Result};
use crate::identifiers::{Credential, TradeId};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

/// Why the agent decided the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    /// Anything not covered below
    Other,
    /// Software bug
    Bug,
    /// Usability problem led to a mistake
    Usability,
    /// Bank or payment provider problem
    BankProblems,
    /// Trade used as an option
    OptionTrade,
    /// Counterparty stopped responding
    SellerNotResponding,
    /// Payment came from an account not in the contract
    WrongSenderAccount,
    /// Trade was settled outside the protocol
    TradeAlreadySettled,
    /// Counterparty missed the trade period
    PeerWasLate,
    /// Legacy: decodes only
    ProtocolViolation,
    /// Legacy: decodes only
    NoReply,
    /// Legacy: decodes only
    Scam,
}

impl Reason {
    /// Legacy reasons are kept for historical records but never emitted
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            Reason::ProtocolViolation | Reason::NoReply | Reason::Scam
        )
    }
}

/// Canonical payout patterns offered to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayoutSuggestion {
    /// Buyer receives trade amount and own deposit
    BuyerGetsTradeAmount,
    /// As above, plus a compensation taken from the seller's deposit
    BuyerGetsTradeAmountPlusCompensation,
    /// As above, minus a penalty paid into the seller's share
    BuyerGetsTradeAmountMinusPenalty,
    /// Buyer receives everything except the minimum refund
    BuyerGetsAll,
    /// Seller receives trade amount and own deposit
    SellerGetsTradeAmount,
    /// As above, plus a compensation taken from the buyer's deposit
    SellerGetsTradeAmountPlusCompensation,
    /// As above, minus a penalty paid into the buyer's share
    SellerGetsTradeAmountMinusPenalty,
    /// Seller receives everything except the minimum refund
    SellerGetsAll,
    /// Amounts chosen by hand
    Custom,
}

impl PayoutSuggestion {
    /// Side favoured by the pattern, `None` for custom
    pub fn winner(self) -> Option<Side> {
        use PayoutSuggestion::*;
        match self {
            BuyerGetsTradeAmount
            | BuyerGetsTradeAmountPlusCompensation
            | BuyerGetsTradeAmountMinusPenalty
            | BuyerGetsAll => Some(Side::Buyer),
            SellerGetsTradeAmount
            | SellerGetsTradeAmountPlusCompensation
            | SellerGetsTradeAmountMinusPenalty
            | SellerGetsAll => Some(Side::Seller),
            Custom => None,
        }
    }

    /// `(buyer_payout, seller_payout)` for this pattern
    ///
    /// `adjustment_percent` is a share of the trade amount used by the
    /// compensation and penalty patterns, capped by the deposit it is taken
    /// from. `min_refund` is what the loser keeps under the "gets all"
    /// patterns. Every split sums to `amounts.total()`. Returns `None` for
    /// [`PayoutSuggestion::Custom`].
    pub fn split(
        self,
        amounts: &EscrowAmounts,
        adjustment_percent: u8,
        min_refund: u64,
    ) -> Option<(u64, u64)> {
        use PayoutSuggestion::*;
        let total = amounts.total();
        let adjustment = amounts.trade_amount.saturating_mul(u64::from(adjustment_percent)) / 100;
        let buyer_base = amounts.trade_amount.saturating_add(amounts.buyer_deposit);

        let buyer = match self {
            BuyerGetsTradeAmount => buyer_base,
            BuyerGetsTradeAmountPlusCompensation => {
                buyer_base + adjustment.min(amounts.seller_deposit)
            }
            BuyerGetsTradeAmountMinusPenalty => buyer_base - adjustment.min(amounts.buyer_deposit),
            BuyerGetsAll => total - min_refund.min(total),
            SellerGetsTradeAmount => amounts.buyer_deposit,
            SellerGetsTradeAmountPlusCompensation => {
                amounts.buyer_deposit - adjustment.min(amounts.buyer_deposit)
            }
            SellerGetsTradeAmountMinusPenalty => {
                amounts.buyer_deposit + adjustment.min(amounts.seller_deposit)
            }
            SellerGetsAll => min_refund.min(total),
            Custom => return None,
        };
        Some((buyer, total - buyer))
    }
}

/// The decision itself; this is what the agent signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    /// Trade the outcome applies to
    pub trade_id: TradeId,
    /// Winning side, if any
    pub winner: Option<Side>,
    /// Decision reason
    pub reason: Reason,
    /// Amount paid to the buyer
    pub buyer_payout: u64,
    /// Amount paid to the seller
    pub seller_payout: u64,
    /// Pattern the payout follows
    pub payout_suggestion: PayoutSuggestion,
    /// Adjustment used by compensation or penalty patterns
    pub payout_adjustment_percent: Option<u8>,
    /// The loser broadcasts the payout instead of the winner
    pub is_loser_publisher: bool,
    /// Milliseconds since the unix epoch
    pub close_time: u64,
    /// Optional free-text summary kept with the outcome
    pub summary_notes: Option<String>,
}

impl ResolutionOutcome {
    /// Build an outcome from a canonical suggestion
    pub fn from_suggestion(
        trade_id: TradeId,
        suggestion: PayoutSuggestion,
        reason: Reason,
        amounts: &EscrowAmounts,
        adjustment_percent: u8,
        close_time: u64,
    ) -> Result<Self> {
        let (buyer_payout, seller_payout) = suggestion
            .split(amounts, adjustment_percent, 0)
            .ok_or_else(|| ArbiterError::invalid("custom payouts need explicit amounts"))?;
        Ok(Self {
            trade_id,
            winner: suggestion.winner(),
            reason,
            buyer_payout,
            seller_payout,
            payout_suggestion: suggestion,
            payout_adjustment_percent: (adjustment_percent > 0).then_some(adjustment_percent),
            is_loser_publisher: false,
            close_time,
            summary_notes: None,
        })
    }

    /// Sum of both payouts
    pub fn total_payout(&self) -> Option<u64> {
        self.buyer_payout.checked_add(self.seller_payout)
    }

    /// Fail unless the payouts distribute exactly `total_escrowed`
    pub fn check_conservation(&self, total_escrowed: u64) -> Result<()> {
        match self.total_payout() {
            Some(sum) if sum == total_escrowed => Ok(()),
            sum => Err(ArbiterError::invalid(format!(
                "payouts {} + {} = {sum:?} do not match escrowed total {total_escrowed}",
                self.buyer_payout, self.seller_payout
            ))),
        }
    }

    /// Side expected to broadcast the payout transaction
    ///
    /// The winner publishes, or the loser when `is_loser_publisher` is set.
    /// Without a winner the buyer publishes.
    pub fn publisher(&self) -> Side {
        let winner = self.winner.unwrap_or(Side::Buyer);
        if self.is_loser_publisher && self.winner.is_some() {
            winner.opposite()
        } else {
            winner
        }
    }

    /// Bytes covered by the agent signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Signed outcome plus the rationale message it was delivered with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Signed decision
    pub outcome: ResolutionOutcome,
    /// Agent's ed25519 signature over [`ResolutionOutcome::signing_bytes`]
    pub agent_signature: Vec<u8>,
    /// Human-readable rationale appended to the chat thread
    pub chat_message: Option<ChatMessage>,
}

impl Resolution {
    /// Sign an outcome with the agent key
    pub fn sign(outcome: ResolutionOutcome, key: &SigningKey) -> Result<Self> {
        let signature = key.sign(&outcome.signing_bytes()?);
        Ok(Self {
            outcome,
            agent_signature: signature.to_bytes().to_vec(),
            chat_message: None,
        })
    }

    /// Attach the rationale message
    pub fn with_chat_message(mut self, message: ChatMessage) -> Self {
        self.chat_message = Some(message);
        self
    }

    /// Verify the signature against the agent credential
    pub fn verify(&self, agent: &Credential) -> Result<()> {
        let signature = Signature::from_slice(&self.agent_signature)?;
        agent
            .verifying_key()?
            .verify(&self.outcome.signing_bytes()?, &signature)
            .map_err(|e| ArbiterError::crypto(format!("resolution signature invalid: {e}")))
    }

    /// Same signed decision, ignoring the attached message
    pub fn same_decision(&self, other: &Resolution) -> bool {
        self.outcome == other.outcome && self.agent_signature == other.agent_signature
    }
}
