//! Dispute chat messages

use crate::delivery::DeliveryStatus;
use crate::identifiers::{Credential, MessageUid, TradeId};
use serde::{Deserialize, Serialize};

/// One element of a dispute's chat thread
///
/// `uid` is unique within a thread; receiving a message whose uid is
/// already present is a no-op. Delivery status is tracked on the message
/// itself and is never part of its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Globally unique message id
    pub uid: MessageUid,
    /// Trade the thread belongs to
    pub trade_id: TradeId,
    /// Trader whose dispute record holds this thread
    pub trader_identity: Credential,
    /// Author of the message
    pub sender_identity: Credential,
    /// Whether the author is the trader (false for the agent)
    pub sender_is_trader: bool,
    /// Message body
    pub text: String,
    /// Generated by the engine rather than typed by a person
    pub is_system_message: bool,
    /// Shown only in the agent's view
    #[serde(default)]
    pub agent_only: bool,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    /// Delivery of the envelope that carried this message
    #[serde(default)]
    pub delivery: DeliveryStatus,
    /// Whether the local user has seen the message
    #[serde(default)]
    pub was_displayed: bool,
}

impl ChatMessage {
    /// Build a message typed by a participant
    pub fn new(
        uid: MessageUid,
        trade_id: TradeId,
        trader_identity: Credential,
        sender_identity: Credential,
        sender_is_trader: bool,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            uid,
            trade_id,
            trader_identity,
            sender_identity,
            sender_is_trader,
            text: text.into(),
            is_system_message: false,
            agent_only: false,
            timestamp,
            delivery: DeliveryStatus::default(),
            was_displayed: false,
        }
    }

    /// Build an engine-generated system message
    pub fn system(
        uid: MessageUid,
        trade_id: TradeId,
        trader_identity: Credential,
        sender_identity: Credential,
        sender_is_trader: bool,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            is_system_message: true,
            ..Self::new(
                uid,
                trade_id,
                trader_identity,
                sender_identity,
                sender_is_trader,
                text,
                timestamp,
            )
        }
    }

    /// Restrict visibility to the agent
    pub fn agent_only(mut self) -> Self {
        self.agent_only = true;
        self
    }

    /// Copy suitable for sending: local delivery and display flags reset
    pub fn for_wire(&self) -> Self {
        Self {
            delivery: DeliveryStatus::default(),
            was_displayed: false,
            ..self.clone()
        }
    }
}
