//! Dispute error taxonomy
//!
//! Caller-facing failures are [`DisputeError`]. Problems with an inbound
//! envelope are [`ValidationError`]s: they never reach a caller, they are
//! logged and answered with a negative ack. Inbound handling reports a
//! [`ReceiveOutcome`] rather than an error; a duplicate is not a failure.

use arbiter_core::{ArbiterError, DisputeId, NetworkAddress, TradeId};
use std::fmt;

/// Reasons an inbound envelope is dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Envelope's sender address does not match the expected party
    #[error("sender address {actual} does not match expected {expected}")]
    SenderAddressMismatch {
        /// Address from the contract or dispute
        expected: NetworkAddress,
        /// Address in the envelope
        actual: NetworkAddress,
    },
    /// Contract text does not hash to the stored hash
    #[error("contract hash mismatch: {message}")]
    ContractHashMismatch {
        /// Detail
        message: String,
    },
    /// Contract hash already used by another trade
    #[error("contract hash replayed from trade {other_trade}")]
    ReplayedContract {
        /// Trade that first used the hash
        other_trade: TradeId,
    },
    /// Too many disputes already share this trade or transaction
    #[error("dispute replayed: {message}")]
    ReplayedDispute {
        /// Which reference is over-used
        message: String,
    },
    /// Dispute addressed to a different agent
    #[error("dispute is addressed to a different agent")]
    AgentMismatch,
    /// Record's trader is not a contract party or its role flags disagree
    #[error("trader identity does not match the contract: {message}")]
    TraderMismatch {
        /// Detail
        message: String,
    },
    /// Resolution signature does not verify
    #[error("invalid resolution signature: {message}")]
    InvalidSignature {
        /// Detail
        message: String,
    },
    /// Payouts do not sum to the escrowed total
    #[error("payout conservation violated: {message}")]
    PayoutMismatch {
        /// Detail
        message: String,
    },
    /// Envelope kind is not accepted by this node's role
    #[error("{kind} is not accepted by a {role} node")]
    WrongRole {
        /// Envelope kind
        kind: &'static str,
        /// Local role
        role: &'static str,
    },
    /// Envelope refers to a dispute this node does not hold
    #[error("no dispute for trade {trade_id}")]
    UnknownDispute {
        /// Trade id
        trade_id: TradeId,
    },
    /// No room left to park a resolution for an unknown dispute
    #[error("deferred resolution for trade {trade_id} dropped: {message}")]
    DeferredLimit {
        /// Trade the resolution names
        trade_id: TradeId,
        /// Which limit was hit
        message: String,
    },
    /// Frame could not be decoded
    #[error("undecodable frame: {message}")]
    Malformed {
        /// Decoder message
        message: String,
    },
}

/// Persistence failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Read or write failed
    #[error("store I/O failed: {message}")]
    Io {
        /// Detail
        message: String,
    },
    /// Stored data could not be (de)serialized
    #[error("store data invalid: {message}")]
    Serialization {
        /// Detail
        message: String,
    },
}

/// Errors surfaced to callers of the dispute service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DisputeError {
    /// A dispute for this trade and trader already exists
    #[error("dispute already open for trade {trade_id}")]
    AlreadyOpen {
        /// Trade id
        trade_id: TradeId,
    },
    /// The dispute is closed
    #[error("dispute {dispute_id} is closed")]
    Closed {
        /// Dispute id
        dispute_id: DisputeId,
    },
    /// Peer does not advertise the capability the envelope needs
    #[error("peer {peer} does not support {capability}")]
    CapabilityUnsupported {
        /// Peer address
        peer: NetworkAddress,
        /// Capability name
        capability: String,
    },
    /// Transport could not start the send
    #[error("delivery failed: {reason}")]
    DeliveryFailed {
        /// Transport reason
        reason: String,
    },
    /// Operation requires the agent role
    #[error("operation requires the agent role")]
    NotAgent,
    /// Operation requires the trader role
    #[error("operation requires the trader role")]
    NotTrader,
    /// Input failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No such dispute
    #[error("dispute not found: {what}")]
    NotFound {
        /// What was looked up
        what: String,
    },
    /// A different resolution has already been signed for this dispute
    #[error("dispute {dispute_id} already carries a different resolution")]
    AlreadyResolved {
        /// Dispute id
        dispute_id: DisputeId,
    },
    /// Resolution is not acceptable
    #[error("invalid resolution: {message}")]
    InvalidResolution {
        /// Detail
        message: String,
    },
    /// No retryable message with that uid
    #[error("message cannot be retried: {message}")]
    NotRetryable {
        /// Detail
        message: String,
    },
    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Core operation failed
    #[error(transparent)]
    Core(#[from] ArbiterError),
    /// The service loop is gone
    #[error("dispute service stopped")]
    ServiceStopped,
}

impl DisputeError {
    /// Lookup failure helper
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound {
            what: what.to_string(),
        }
    }
}

/// Result of processing one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// State changed
    Applied,
    /// Already seen; nothing changed
    Duplicate,
    /// Dropped with a negative ack
    Rejected(ValidationError),
    /// Parked until the dispute it refers to exists
    Deferred,
    /// Nothing to apply, such as an ack for a message no longer tracked
    Ignored,
}

/// Dispute service result alias
pub type DisputeResult<T> = std::result::Result<T, DisputeError>;
