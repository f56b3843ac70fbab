//! # Arbiter Dispute
//!
//! The protocol engine of a three-party dispute: a trader opens a dispute
//! with an agent, the agent mirrors it to the counterparty, any party may
//! chat, and the agent closes it with a signed resolution delivered to
//! each trader.
//!
//! # Architecture
//!
//! - [`DisputeServiceBuilder`] / [`DisputeService`] / [`DisputeHandle`]:
//!   the single-writer loop and the handle callers and transports use
//! - `engine`: the protocol state machine, owned by the loop
//! - [`DisputeList`]: observable, persisted records keyed by trade and trader
//! - [`store`]: persistence (in-memory, coalescing JSON file)
//! - [`validation`]: inbound envelope checks
//! - [`collaborators`]: wallet and trade lifecycle interfaces
//!
//! Every inbound operation is idempotent. Opens and mirrors insert at most
//! one record per `(trade_id, trader_identity)`, chat messages are
//! de-duplicated by uid and a redelivered resolution is a no-op.

#![forbid(unsafe_code)]

pub mod collaborators;
pub mod config;
mod engine;
pub mod errors;
pub mod list;
pub mod runtime;
pub mod store;
pub mod validation;

pub use collaborators::{EscrowWallet, TradeError, TradeLifecycle, WalletError};
pub use config::{ConfigError, DisputeConfig, PersistenceConfig, SystemTexts};
pub use engine::{
    wait_settled, ChatMessageRef, DisputeRef, NodeIdentity, NodeRole, OpenRequest,
    MAX_DEFERRED_PER_TRADE, MAX_DEFERRED_TRADES,
};
pub use errors::{DisputeError, DisputeResult, ReceiveOutcome, StoreError, ValidationError};
pub use list::{AddOutcome, DisputeKey, DisputeList, DisputeListener};
pub use runtime::{DisputeHandle, DisputeService, DisputeServiceBuilder};
pub use store::{DisputeStore, JsonFileStore, MemoryStore};
