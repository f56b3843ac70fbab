//! Delivery and acknowledgment state
//!
//! Every outbound envelope and every locally appended chat message carries
//! a [`DeliveryStatus`]. It combines two independent signals:
//!
//! - the transport's report ([`DeliveryState`]): `Created → Sent →
//!   {Arrived, StoredOffline, Failed}`
//! - the remote engine's `GenericAck` ([`AckState`])
//!
//! Transport states are strict: once terminal, further transport reports
//! are rejected. The only way out of `Failed` is an explicit retry, which
//! starts over at `Created`. An ack can land at any time and takes
//! precedence when computing the effective state.

use serde::{Deserialize, Serialize};

/// Transport-level delivery state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Built locally, not yet handed to the transport
    #[default]
    Created,
    /// Handed to the transport, outcome unknown
    Sent,
    /// Remote process received the envelope
    Arrived,
    /// Peer unreachable; transport holds the envelope for later delivery
    StoredOffline,
    /// Transport gave up
    Failed {
        /// Transport-provided reason
        reason: String,
    },
}

impl DeliveryState {
    /// Whether no further transport report may change this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Arrived | DeliveryState::StoredOffline | DeliveryState::Failed { .. }
        )
    }
}

/// Error for an illegal delivery transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal delivery transition from {from:?} to {to:?}")]
pub struct DeliveryTransitionError {
    /// State before the attempted transition
    pub from: DeliveryState,
    /// Requested state
    pub to: DeliveryState,
}

/// Remote acknowledgment state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckState {
    /// No ack received
    #[default]
    Pending,
    /// Remote engine processed the message
    Acked,
    /// Remote engine rejected the message
    Nacked {
        /// Error message carried by the ack
        reason: String,
    },
}

/// Combined delivery status stored on chat messages
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Transport report
    pub state: DeliveryState,
    /// Remote ack
    pub ack: AckState,
}

impl DeliveryStatus {
    /// `Created → Sent`
    pub fn mark_sent(&mut self) -> Result<(), DeliveryTransitionError> {
        self.transition(DeliveryState::Sent)
    }

    /// `Sent → Arrived`
    pub fn mark_arrived(&mut self) -> Result<(), DeliveryTransitionError> {
        self.transition(DeliveryState::Arrived)
    }

    /// `Sent → StoredOffline`
    pub fn mark_stored_offline(&mut self) -> Result<(), DeliveryTransitionError> {
        self.transition(DeliveryState::StoredOffline)
    }

    /// `Created | Sent → Failed`
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<(), DeliveryTransitionError> {
        self.transition(DeliveryState::Failed {
            reason: reason.into(),
        })
    }

    /// `Failed → Created`, clearing any stale ack
    pub fn retry(&mut self) -> Result<(), DeliveryTransitionError> {
        match self.state {
            DeliveryState::Failed { .. } => {
                self.state = DeliveryState::Created;
                self.ack = AckState::Pending;
                Ok(())
            }
            _ => Err(DeliveryTransitionError {
                from: self.state.clone(),
                to: DeliveryState::Created,
            }),
        }
    }

    /// Record a `GenericAck`
    pub fn apply_ack(&mut self, success: bool, error_message: Option<String>) {
        self.ack = if success {
            AckState::Acked
        } else {
            AckState::Nacked {
                reason: error_message.unwrap_or_else(|| "rejected by peer".to_string()),
            }
        };
    }

    /// State as seen by callers: a nack maps to failed, an ack to arrived
    pub fn effective(&self) -> DeliveryState {
        match &self.ack {
            AckState::Acked => DeliveryState::Arrived,
            AckState::Nacked { reason } => DeliveryState::Failed {
                reason: reason.clone(),
            },
            AckState::Pending => self.state.clone(),
        }
    }

    /// Whether the message can still change state without a retry
    pub fn is_settled(&self) -> bool {
        self.ack != AckState::Pending || self.state.is_terminal()
    }

    fn transition(&mut self, to: DeliveryState) -> Result<(), DeliveryTransitionError> {
        let allowed = match (&self.state, &to) {
            (DeliveryState::Created, DeliveryState::Sent) => true,
            (DeliveryState::Created, DeliveryState::Failed { .. }) => true,
            (DeliveryState::Sent, next) => next.is_terminal(),
            _ => false,
        };
        if allowed {
            self.state = to;
            Ok(())
        } else {
            Err(DeliveryTransitionError {
                from: self.state.clone(),
                to,
            })
        }
    }
}
