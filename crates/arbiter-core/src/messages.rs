//! Protocol envelopes
//!
//! Envelopes are transient DTOs: consumed once by the receiving engine and
//! discarded. Each carries its own `uid`, independent of any chat message
//! uid it logically corresponds to.
//!
//! The wire encoding is bincode via [`Envelope::to_bytes`] and
//! [`Envelope::from_bytes`].

use crate::capability::Capability;
use crate::chat::ChatMessage;
use crate::dispute::{Dispute, SupportKind};
use crate::errors::Result;
use crate::identifiers::{MessageUid, NetworkAddress, TradeId};
use crate::resolution::Resolution;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trader asks the agent to open a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDispute {
    /// Opener's record, including the opening system message
    pub dispute: Dispute,
    /// Opener's address
    pub sender_addr: NetworkAddress,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Envelope uid
    pub uid: MessageUid,
}

/// Agent hands the counterparty its mirrored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMirroredDispute {
    /// Counterparty's record
    pub dispute: Dispute,
    /// Agent's address
    pub sender_addr: NetworkAddress,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Envelope uid
    pub uid: MessageUid,
}

/// Agent delivers a signed resolution to one trader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionDelivered {
    /// Signed resolution with rationale message
    pub resolution: Resolution,
    /// Agent's address
    pub sender_addr: NetworkAddress,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Envelope uid
    pub uid: MessageUid,
}

/// Chat message relayed between a trader and the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRelay {
    /// The message
    pub message: ChatMessage,
    /// Sender's address
    pub sender_addr: NetworkAddress,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Envelope uid
    pub uid: MessageUid,
}

/// Publishing trader tells the other trader the payout went out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPublished {
    /// Trade the payout settles
    pub trade_id: TradeId,
    /// Broadcast payout transaction
    pub payout_tx_ref: String,
    /// Publisher's address
    pub sender_addr: NetworkAddress,
    /// Agent kind
    pub support_kind: SupportKind,
    /// Envelope uid
    pub uid: MessageUid,
}

/// Kind of envelope an ack refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// [`OpenDispute`]
    OpenDispute,
    /// [`PeerMirroredDispute`]
    PeerMirroredDispute,
    /// [`ResolutionDelivered`]
    ResolutionDelivered,
    /// [`ChatRelay`]
    ChatRelay,
    /// [`PayoutPublished`]
    PayoutPublished,
}

impl SourceKind {
    /// Stable name used in logs
    pub fn name(self) -> &'static str {
        match self {
            SourceKind::OpenDispute => "OpenDispute",
            SourceKind::PeerMirroredDispute => "PeerMirroredDispute",
            SourceKind::ResolutionDelivered => "ResolutionDelivered",
            SourceKind::ChatRelay => "ChatRelay",
            SourceKind::PayoutPublished => "PayoutPublished",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Acknowledgment of a processed envelope
///
/// Acks are never acknowledged themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericAck {
    /// Ack's own uid
    pub uid: MessageUid,
    /// Acknowledging node's address
    pub sender_addr: NetworkAddress,
    /// Kind of envelope being acknowledged
    pub source_kind: SourceKind,
    /// Uid of the logical message acknowledged (the chat message uid where one exists)
    pub source_uid: Option<MessageUid>,
    /// Trade id of the acknowledged envelope
    pub source_id: TradeId,
    /// Whether the receiver applied the envelope
    pub success: bool,
    /// Receiver's error text when `success` is false
    pub error_message: Option<String>,
}

/// Every message the dispute protocol puts on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Trader → agent
    OpenDispute(OpenDispute),
    /// Agent → counterparty
    PeerMirroredDispute(PeerMirroredDispute),
    /// Agent → trader
    ResolutionDelivered(ResolutionDelivered),
    /// Trader ↔ agent
    ChatRelay(ChatRelay),
    /// Trader → trader
    PayoutPublished(PayoutPublished),
    /// Any → any
    GenericAck(GenericAck),
}

impl Envelope {
    /// Envelope uid
    pub fn uid(&self) -> MessageUid {
        match self {
            Envelope::OpenDispute(m) => m.uid,
            Envelope::PeerMirroredDispute(m) => m.uid,
            Envelope::ResolutionDelivered(m) => m.uid,
            Envelope::ChatRelay(m) => m.uid,
            Envelope::PayoutPublished(m) => m.uid,
            Envelope::GenericAck(m) => m.uid,
        }
    }

    /// Sender's self-reported address
    pub fn sender_addr(&self) -> &NetworkAddress {
        match self {
            Envelope::OpenDispute(m) => &m.sender_addr,
            Envelope::PeerMirroredDispute(m) => &m.sender_addr,
            Envelope::ResolutionDelivered(m) => &m.sender_addr,
            Envelope::ChatRelay(m) => &m.sender_addr,
            Envelope::PayoutPublished(m) => &m.sender_addr,
            Envelope::GenericAck(m) => &m.sender_addr,
        }
    }

    /// Trade the envelope concerns
    pub fn trade_id(&self) -> &TradeId {
        match self {
            Envelope::OpenDispute(m) => &m.dispute.trade_id,
            Envelope::PeerMirroredDispute(m) => &m.dispute.trade_id,
            Envelope::ResolutionDelivered(m) => &m.resolution.outcome.trade_id,
            Envelope::ChatRelay(m) => &m.message.trade_id,
            Envelope::PayoutPublished(m) => &m.trade_id,
            Envelope::GenericAck(m) => &m.source_id,
        }
    }

    /// Kind used in acks, `None` for acks themselves
    pub fn source_kind(&self) -> Option<SourceKind> {
        match self {
            Envelope::OpenDispute(_) => Some(SourceKind::OpenDispute),
            Envelope::PeerMirroredDispute(_) => Some(SourceKind::PeerMirroredDispute),
            Envelope::ResolutionDelivered(_) => Some(SourceKind::ResolutionDelivered),
            Envelope::ChatRelay(_) => Some(SourceKind::ChatRelay),
            Envelope::PayoutPublished(_) => Some(SourceKind::PayoutPublished),
            Envelope::GenericAck(_) => None,
        }
    }

    /// Capability the receiver must advertise
    pub fn required_capability(&self) -> Capability {
        match self {
            Envelope::OpenDispute(m) => m.support_kind.into(),
            Envelope::PeerMirroredDispute(m) => m.support_kind.into(),
            Envelope::ResolutionDelivered(m) => m.support_kind.into(),
            Envelope::ChatRelay(m) => m.support_kind.into(),
            Envelope::PayoutPublished(m) => m.support_kind.into(),
            Envelope::GenericAck(_) => Capability::AckMessage,
        }
    }

    /// Short name for logs
    pub fn kind_name(&self) -> &'static str {
        self.source_kind().map_or("GenericAck", SourceKind::name)
    }

    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
