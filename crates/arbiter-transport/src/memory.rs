//! In-memory transport with mailbox simulation
//!
//! All nodes share one [`MemoryNetwork`]. A node registered on the network
//! gets a [`MemoryTransport`] for sending and an inbound channel for
//! receiving. Nodes can be taken offline; mailbox sends to an offline node
//! are stored and flushed as a single [`Inbound::Batch`] when it comes
//! back online.
//!
//! The mailbox rejects a second envelope with a uid it has already stored
//! for the same recipient, mirroring a storage layer that refuses
//! duplicate payloads.

use crate::delivery::{DeliveryHandle, DeliveryOutcome};
use crate::error::TransportResult;
use crate::traits::{DeliveryPath, Inbound, InboundFrame, MessageTransport};
use arbiter_core::{CapabilitySet, Credential, Envelope, MessageUid, NetworkAddress};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

struct NodeSlot {
    credential: Credential,
    inbox: mpsc::UnboundedSender<Inbound>,
    online: bool,
    capabilities: Option<CapabilitySet>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<NetworkAddress, NodeSlot>,
    mailboxes: HashMap<NetworkAddress, Vec<InboundFrame>>,
    stored_uids: HashSet<(NetworkAddress, MessageUid)>,
}

impl NetworkState {
    fn flush_mailbox(&mut self, address: &NetworkAddress) -> usize {
        let Some(slot) = self.nodes.get(address) else {
            return 0;
        };
        if !slot.online {
            return 0;
        }
        let mut frames = match self.mailboxes.remove(address) {
            Some(frames) if !frames.is_empty() => frames,
            _ => return 0,
        };
        let count = frames.len();
        let inbound = if count == 1 {
            Inbound::Single(frames.remove(0))
        } else {
            Inbound::Batch(frames)
        };
        if let Err(mpsc::error::SendError(returned)) = slot.inbox.send(inbound) {
            let frames = match returned {
                Inbound::Single(frame) => vec![frame],
                Inbound::Batch(frames) => frames,
            };
            self.mailboxes.insert(address.clone(), frames);
            return 0;
        }
        self.stored_uids.retain(|(to, _)| to != address);
        tracing::debug!(peer = %address, count, "flushed mailbox");
        count
    }
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an online node
    ///
    /// Anything already waiting in the node's mailbox is flushed to the
    /// returned receiver immediately.
    pub fn register(
        &self,
        address: NetworkAddress,
        credential: Credential,
        capabilities: Option<CapabilitySet>,
    ) -> (MemoryTransport, mpsc::UnboundedReceiver<Inbound>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.nodes.insert(
                address.clone(),
                NodeSlot {
                    credential,
                    inbox,
                    online: true,
                    capabilities,
                },
            );
            state.flush_mailbox(&address);
        }
        let transport = MemoryTransport {
            address,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Take a node offline or bring it back
    ///
    /// Returns the number of mailbox frames flushed on the way back online.
    pub fn set_online(&self, address: &NetworkAddress, online: bool) -> usize {
        let mut state = self.state.lock();
        match state.nodes.get_mut(address) {
            Some(slot) => slot.online = online,
            None => return 0,
        }
        tracing::info!(peer = %address, online, "node connectivity changed");
        if online {
            state.flush_mailbox(address)
        } else {
            0
        }
    }

    /// Replace the capabilities a node advertises
    pub fn set_capabilities(&self, address: &NetworkAddress, capabilities: Option<CapabilitySet>) {
        if let Some(slot) = self.state.lock().nodes.get_mut(address) {
            slot.capabilities = capabilities;
        }
    }

    /// Frames waiting in a node's mailbox
    pub fn mailbox_len(&self, address: &NetworkAddress) -> usize {
        self.state
            .lock()
            .mailboxes
            .get(address)
            .map_or(0, Vec::len)
    }

    /// Whether a node is registered and online
    pub fn is_online(&self, address: &NetworkAddress) -> bool {
        self.state
            .lock()
            .nodes
            .get(address)
            .is_some_and(|slot| slot.online)
    }

    fn capabilities(&self, address: &NetworkAddress) -> Option<CapabilitySet> {
        self.state
            .lock()
            .nodes
            .get(address)
            .and_then(|slot| slot.capabilities.clone())
    }

    fn deliver(
        &self,
        from: &NetworkAddress,
        to: &NetworkAddress,
        credential: &Credential,
        envelope: &Envelope,
        allow_mailbox: bool,
    ) -> TransportResult<DeliveryOutcome> {
        let bytes = envelope.to_bytes()?;
        let mut state = self.state.lock();

        if let Some(slot) = state.nodes.get(to) {
            if slot.credential != *credential {
                return Ok(DeliveryOutcome::Failed(format!(
                    "credential mismatch for {to}"
                )));
            }
            if let Some(caps) = &slot.capabilities {
                let required = envelope.required_capability();
                if !caps.supports(required) {
                    return Ok(DeliveryOutcome::Failed(format!(
                        "peer {to} does not support {required:?}"
                    )));
                }
            }
            if slot.online {
                let frame = InboundFrame {
                    bytes,
                    sender: from.clone(),
                    path: DeliveryPath::Direct,
                };
                return Ok(match slot.inbox.send(Inbound::Single(frame)) {
                    Ok(()) => DeliveryOutcome::Arrived,
                    Err(_) => DeliveryOutcome::Failed(format!("peer {to} stopped receiving")),
                });
            }
        }

        if !allow_mailbox {
            return Ok(DeliveryOutcome::Failed(format!("peer {to} is offline")));
        }

        let key = (to.clone(), envelope.uid());
        if !state.stored_uids.insert(key) {
            return Ok(DeliveryOutcome::Failed(
                "payload already exists in mailbox".to_string(),
            ));
        }
        state
            .mailboxes
            .entry(to.clone())
            .or_default()
            .push(InboundFrame {
                bytes,
                sender: from.clone(),
                path: DeliveryPath::Mailbox,
            });
        Ok(DeliveryOutcome::StoredOffline)
    }
}

/// One node's view of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    address: NetworkAddress,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Network this transport sends on
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    fn local_address(&self) -> &NetworkAddress {
        &self.address
    }

    async fn send_direct(
        &self,
        peer: &NetworkAddress,
        credential: &Credential,
        envelope: &Envelope,
    ) -> TransportResult<DeliveryHandle> {
        let outcome = self
            .network
            .deliver(&self.address, peer, credential, envelope, false)?;
        tracing::debug!(peer = %peer, kind = envelope.kind_name(), ?outcome, "direct send");
        Ok(DeliveryHandle::ready(outcome))
    }

    async fn send_with_mailbox_fallback(
        &self,
        peer: &NetworkAddress,
        credential: &Credential,
        envelope: &Envelope,
    ) -> TransportResult<DeliveryHandle> {
        let outcome = self
            .network
            .deliver(&self.address, peer, credential, envelope, true)?;
        tracing::debug!(peer = %peer, kind = envelope.kind_name(), ?outcome, "mailbox send");
        Ok(DeliveryHandle::ready(outcome))
    }

    async fn peer_capabilities(&self, peer: &NetworkAddress) -> Option<CapabilitySet> {
        self.network.capabilities(peer)
    }
}
