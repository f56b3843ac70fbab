//! # Arbiter Transport
//!
//! The transport collaborator of the dispute engine: a best-effort
//! envelope transport with a store-and-forward mailbox fallback and
//! per-send delivery reporting.
//!
//! # Architecture
//!
//! - [`MessageTransport`]: the interface the engine consumes
//! - [`DeliveryHandle`] / [`DeliveryReporter`]: one terminal outcome per send
//! - [`Inbound`]: what a node receives, single frames or mailbox batches
//! - [`MemoryNetwork`] / [`MemoryTransport`]: in-process implementation used
//!   by tests and the simulator
//!
//! Connection setup, routing, encryption and mailbox TTL expiry belong to a
//! concrete network implementation and are not modelled here.

#![forbid(unsafe_code)]

pub mod delivery;
pub mod error;
pub mod memory;
pub mod traits;

pub use delivery::{DeliveryHandle, DeliveryOutcome, DeliveryReporter};
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use traits::{DeliveryPath, Inbound, InboundFrame, MessageTransport};
