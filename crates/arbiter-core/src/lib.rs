//! # Arbiter Core
//!
//! Domain types for a three-party dispute protocol between two trade
//! counterparties and an arbitration agent.
//!
//! # Architecture
//!
//! - `identifiers`: credentials, addresses, trade/dispute/message ids
//! - `contract`: the immutable escrow contract snapshot
//! - `dispute` / `chat`: the per-trader record and its chat thread
//! - `resolution`: signed outcomes and canonical payout splits
//! - `delivery`: per-message delivery and ack state machine
//! - `messages`: protocol envelopes and their wire encoding
//! - `capability`: peer feature flags
//! - `effects`: time and randomness traits
//!
//! Nothing here performs I/O. The transport lives in `arbiter-transport`
//! and the protocol engine in `arbiter-dispute`.

#![forbid(unsafe_code)]

pub mod capability;
pub mod chat;
pub mod contract;
pub mod delivery;
pub mod dispute;
pub mod effects;
pub mod errors;
pub mod identifiers;
pub mod messages;
pub mod resolution;

pub use capability::{Capability, CapabilitySet};
pub use chat::ChatMessage;
pub use contract::{contract_hash, ContractSnapshot, EscrowAmounts, EscrowContractRef, Party, Side};
pub use delivery::{AckState, DeliveryState, DeliveryStatus, DeliveryTransitionError};
pub use dispute::{Dispute, DisputeParams, DisputeState, RoleFlags, SupportKind};
pub use effects::{PhysicalTimeEffects, RandomEffects, SystemRandomHandler, SystemTimeHandler};
pub use errors::{ArbiterError, Result};
pub use identifiers::{Credential, DisputeId, MessageUid, NetworkAddress, TradeId};
pub use messages::{
    ChatRelay, Envelope, GenericAck, OpenDispute, PayoutPublished, PeerMirroredDispute,
    ResolutionDelivered, SourceKind,
};
pub use resolution::{PayoutSuggestion, Reason, Resolution, ResolutionOutcome};
