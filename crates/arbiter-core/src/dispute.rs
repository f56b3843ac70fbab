//! Dispute entity
//!
//! One [`Dispute`] exists per `(trade_id, trader_identity)`. The agent
//! holds two records per trade (one per trader); each trader holds one.
//!
//! # Lifecycle
//!
//! ```text
//! New ──seen──▶ Open ──resolve──▶ Closed ──reopen──▶ Reopened ──resolve──▶ Closed
//! ```
//!
//! Records are never deleted by the protocol. `is_closed` only moves from
//! false to true except through an explicit reopen.

use crate::chat::ChatMessage;
use crate::contract::{ContractSnapshot, Party, Side};
use crate::errors::{ArbiterError, Result};
use crate::identifiers::{Credential, DisputeId, MessageUid, NetworkAddress, TradeId};
use crate::resolution::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of agent handling the dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportKind {
    /// Mediator proposes a payout both traders must accept
    Mediation,
    /// Arbitrator decides and signs the payout
    Arbitration,
    /// Refund agent pays out of the donation address after mediation failed
    Refund,
}

impl fmt::Display for SupportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupportKind::Mediation => write!(f, "mediation"),
            SupportKind::Arbitration => write!(f, "arbitration"),
            SupportKind::Refund => write!(f, "refund"),
        }
    }
}

/// Coarse dispute lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisputeState {
    /// Created, not yet looked at
    #[default]
    New,
    /// Seen by the local user
    Open,
    /// Reopened after having been closed
    Reopened,
    /// Resolution applied
    Closed,
}

/// Role flags of the trader a record belongs to
///
/// On the opener's record these describe the opener. The mirror swaps
/// both flags, so on every record they describe that record's trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleFlags {
    /// Record's trader is the buyer
    pub is_opener_buyer: bool,
    /// Record's trader is the offer maker
    pub is_opener_maker: bool,
}

impl RoleFlags {
    /// Flags for the trader on `side` of `contract`
    pub fn for_side(contract: &ContractSnapshot, side: Side) -> Self {
        Self {
            is_opener_buyer: side == Side::Buyer,
            is_opener_maker: contract.is_maker(side),
        }
    }

    /// Flags as seen from the counterparty
    pub fn swapped(self) -> Self {
        Self {
            is_opener_buyer: !self.is_opener_buyer,
            is_opener_maker: !self.is_opener_maker,
        }
    }

    /// Side these flags describe
    pub fn side(self) -> Side {
        if self.is_opener_buyer {
            Side::Buyer
        } else {
            Side::Seller
        }
    }
}

/// Inputs for constructing a dispute record
#[derive(Debug, Clone)]
pub struct DisputeParams {
    /// Trade under dispute
    pub trade_id: TradeId,
    /// Trader the record belongs to
    pub trader_identity: Credential,
    /// Role flags of that trader
    pub role_flags: RoleFlags,
    /// Agent identity
    pub agent_identity: Credential,
    /// Agent address
    pub agent_address: NetworkAddress,
    /// Contract snapshot
    pub contract: ContractSnapshot,
    /// Support kind
    pub support_kind: SupportKind,
    /// Milliseconds since the unix epoch
    pub opening_time: u64,
    /// When the trade was taken
    pub trade_date: u64,
    /// End of the trade period
    pub trade_period_end: u64,
    /// Deposit transaction reference
    pub deposit_tx_ref: Option<String>,
    /// Delayed payout transaction reference
    pub payout_tx_ref: Option<String>,
    /// Summary carried over from a prior mediation
    pub prior_mediator_summary: Option<String>,
}

/// Per-trader dispute record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// `"{trade_id}_{trader_hash}"`
    pub id: DisputeId,
    /// Trade under dispute
    pub trade_id: TradeId,
    /// Trader the record belongs to
    pub trader_identity: Credential,
    /// Role flags of that trader
    pub role_flags: RoleFlags,
    /// Side of that trader, computed once from the role flags
    pub trader_side: Side,
    /// Agent adjudicating the dispute
    pub agent_identity: Credential,
    /// Agent address at open time
    pub agent_address: NetworkAddress,
    /// Immutable contract copy
    pub contract: ContractSnapshot,
    /// Deposit transaction reference
    pub deposit_tx_ref: Option<String>,
    /// Delayed payout transaction reference
    pub payout_tx_ref: Option<String>,
    /// Payout transaction published after resolution
    pub dispute_payout_tx_ref: Option<String>,
    /// Milliseconds since the unix epoch
    pub opening_time: u64,
    /// When the trade was taken
    pub trade_date: u64,
    /// End of the trade period
    pub trade_period_end: u64,
    /// Lifecycle state
    pub state: DisputeState,
    /// Outcome, once resolved
    pub resolution: Option<Resolution>,
    /// Ordered, append-only chat thread
    pub chat_thread: Vec<ChatMessage>,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Summary carried over from a prior mediation
    pub prior_mediator_summary: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub extra_data: BTreeMap<String, String>,
}

impl Dispute {
    /// Build a record from its parameters
    pub fn new(params: DisputeParams) -> Self {
        Self {
            id: DisputeId::derive(&params.trade_id, &params.trader_identity),
            trade_id: params.trade_id,
            trader_identity: params.trader_identity,
            role_flags: params.role_flags,
            trader_side: params.role_flags.side(),
            agent_identity: params.agent_identity,
            agent_address: params.agent_address,
            contract: params.contract,
            deposit_tx_ref: params.deposit_tx_ref,
            payout_tx_ref: params.payout_tx_ref,
            dispute_payout_tx_ref: None,
            opening_time: params.opening_time,
            trade_date: params.trade_date,
            trade_period_end: params.trade_period_end,
            state: DisputeState::New,
            resolution: None,
            chat_thread: Vec::new(),
            support_kind: params.support_kind,
            prior_mediator_summary: params.prior_mediator_summary,
            extra_data: BTreeMap::new(),
        }
    }

    /// Record for the counterparty of this record's trader
    ///
    /// Shares the contract snapshot and agent fields, swaps the role flags
    /// and starts with an empty thread and no resolution.
    pub fn mirror(&self) -> Result<Self> {
        let peer_side = self.trader_side.opposite();
        let peer = self.contract.party(peer_side).credential;
        if peer == self.trader_identity {
            return Err(ArbiterError::invalid("contract names the same party twice"));
        }
        let mut mirror = Self::new(DisputeParams {
            trade_id: self.trade_id.clone(),
            trader_identity: peer,
            role_flags: self.role_flags.swapped(),
            agent_identity: self.agent_identity,
            agent_address: self.agent_address.clone(),
            contract: self.contract.clone(),
            support_kind: self.support_kind,
            opening_time: self.opening_time,
            trade_date: self.trade_date,
            trade_period_end: self.trade_period_end,
            deposit_tx_ref: self.deposit_tx_ref.clone(),
            payout_tx_ref: self.payout_tx_ref.clone(),
            prior_mediator_summary: None,
        });
        mirror.state = match self.state {
            DisputeState::Reopened => DisputeState::Reopened,
            _ => DisputeState::New,
        };
        Ok(mirror)
    }

    /// Copy suitable for sending: local delivery and display state reset
    pub fn for_wire(&self) -> Self {
        let mut wire = self.clone();
        wire.chat_thread = self.chat_thread.iter().map(ChatMessage::for_wire).collect();
        if let Some(resolution) = wire.resolution.as_mut() {
            resolution.chat_message = resolution.chat_message.as_ref().map(ChatMessage::for_wire);
        }
        wire
    }

    /// Whether a resolution has been applied
    pub fn is_closed(&self) -> bool {
        self.state == DisputeState::Closed
    }

    /// `New → Open`
    pub fn mark_seen(&mut self) {
        if self.state == DisputeState::New {
            self.state = DisputeState::Open;
        }
    }

    /// Close the record
    pub fn close(&mut self) {
        self.state = DisputeState::Closed;
    }

    /// Reopen a record; the previous resolution stays for reference
    pub fn reopen(&mut self) {
        self.state = DisputeState::Reopened;
    }

    /// Append a chat message unless its uid is already in the thread
    ///
    /// Returns `false` for a duplicate.
    pub fn add_chat_message(&mut self, message: ChatMessage) -> bool {
        if self.has_chat_message(&message.uid) {
            return false;
        }
        self.chat_thread.push(message);
        true
    }

    /// Whether the thread contains `uid`
    pub fn has_chat_message(&self, uid: &MessageUid) -> bool {
        self.chat_thread.iter().any(|m| m.uid == *uid)
    }

    /// Look up a chat message
    pub fn chat_message(&self, uid: &MessageUid) -> Option<&ChatMessage> {
        self.chat_thread.iter().find(|m| m.uid == *uid)
    }

    /// Look up a chat message for mutation
    pub fn chat_message_mut(&mut self, uid: &MessageUid) -> Option<&mut ChatMessage> {
        self.chat_thread.iter_mut().find(|m| m.uid == *uid)
    }

    /// First message of the thread; the opening system message
    pub fn first_chat_message(&self) -> Option<&ChatMessage> {
        self.chat_thread.first()
    }

    /// Uid of the system message announcing the current opening
    ///
    /// The first message for a fresh dispute, the latest system message
    /// once it has been reopened.
    pub fn opening_message_uid(&self) -> Option<MessageUid> {
        match self.state {
            DisputeState::Reopened => self
                .chat_thread
                .iter()
                .rev()
                .find(|m| m.is_system_message && !m.agent_only)
                .map(|m| m.uid),
            _ => self.first_chat_message().map(|m| m.uid),
        }
    }

    /// Messages the local user has not displayed yet
    pub fn unread_count(&self) -> usize {
        self.chat_thread.iter().filter(|m| !m.was_displayed).count()
    }

    /// Mark every message as displayed
    pub fn mark_messages_seen(&mut self) {
        for message in &mut self.chat_thread {
            message.was_displayed = true;
        }
    }

    /// The record's trader as recorded in the contract
    pub fn trader_party(&self) -> &Party {
        self.contract.party(self.trader_side)
    }

    /// The other trader
    pub fn counterparty(&self) -> &Party {
        self.contract.party(self.trader_side.opposite())
    }

    /// Total escrowed amount a resolution must conserve
    pub fn total_escrowed(&self) -> u64 {
        self.contract.total_escrowed()
    }
}
