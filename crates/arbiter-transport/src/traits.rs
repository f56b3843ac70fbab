//! Transport interface consumed by the dispute engine

use crate::delivery::DeliveryHandle;
use crate::error::TransportResult;
use arbiter_core::{CapabilitySet, Credential, Envelope, NetworkAddress};
use async_trait::async_trait;

/// How an inbound frame reached this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// Sent directly while both peers were online
    Direct,
    /// Pulled from the store-and-forward mailbox
    Mailbox,
}

/// Encoded envelope as received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// bincode-encoded [`Envelope`]
    pub bytes: Vec<u8>,
    /// Transport-level sender address
    pub sender: NetworkAddress,
    /// Delivery path
    pub path: DeliveryPath,
}

/// Unit of inbound work handed to a node
///
/// Mailbox flushes after a period offline arrive as one batch so the
/// receiver can decode them together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One frame
    Single(InboundFrame),
    /// Several frames flushed at once
    Batch(Vec<InboundFrame>),
}

/// Best-effort peer-to-peer envelope transport
///
/// Implementations must never block on delivery: both send methods return
/// as soon as the send is initiated and report the outcome through the
/// returned [`DeliveryHandle`]. An `Err` means the send was never started.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// This node's address
    fn local_address(&self) -> &NetworkAddress;

    /// Send while the peer is online; no queueing if it is not
    async fn send_direct(
        &self,
        peer: &NetworkAddress,
        credential: &Credential,
        envelope: &Envelope,
    ) -> TransportResult<DeliveryHandle>;

    /// Send directly, falling back to store-and-forward if the peer is offline
    async fn send_with_mailbox_fallback(
        &self,
        peer: &NetworkAddress,
        credential: &Credential,
        envelope: &Envelope,
    ) -> TransportResult<DeliveryHandle>;

    /// Capabilities the peer advertised, `None` if unknown
    async fn peer_capabilities(&self, peer: &NetworkAddress) -> Option<CapabilitySet>;
}
