//! # Dispute Protocol Engine
//!
//! Drives every cross-party effect of opening, mirroring, chatting on and
//! resolving disputes. The engine is the only component that mutates its
//! [`DisputeList`], and it is driven exclusively by the single-consumer
//! loop in [`crate::runtime`]; nothing here takes a lock.
//!
//! # Architecture
//!
//! - `open`: trader-side open and reopen
//! - `receive`: inbound envelope dispatch, agent open handling, mirroring
//! - `chat`: chat append and relay
//! - `resolve`: agent resolution, trader application, payout publication
//! - `delivery`: transport reports, acks and manual retry
//!
//! Sends never block on delivery. Each send spawns a small task that waits
//! on the transport's [`DeliveryHandle`](arbiter_transport::DeliveryHandle)
//! and posts the outcome back onto the command queue, so every state
//! change still happens inside the loop.

mod chat;
mod delivery;
mod open;
mod receive;
mod resolve;

pub use open::OpenRequest;
pub(crate) use receive::OpenerReply;
pub use resolve::{MAX_DEFERRED_PER_TRADE, MAX_DEFERRED_TRADES};

use crate::collaborators::{EscrowWallet, TradeLifecycle};
use crate::config::DisputeConfig;
use crate::errors::{DisputeError, DisputeResult};
use crate::list::{DisputeKey, DisputeList};
use crate::runtime::Command;
use arbiter_core::{
    Capability, ChatMessage, Credential, DeliveryState, DeliveryStatus, Dispute, DisputeId,
    Envelope, GenericAck, MessageUid, NetworkAddress, PhysicalTimeEffects, RandomEffects,
    ResolutionDelivered, SourceKind, TradeId,
};
use arbiter_transport::{DeliveryOutcome, MessageTransport};
use ed25519_dalek::SigningKey;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Protocol role of the local node
#[derive(Clone)]
pub enum NodeRole {
    /// Arbitration agent; signs resolutions
    Agent {
        /// Resolution signing key
        signing_key: SigningKey,
    },
    /// Trade counterparty
    Trader,
}

impl fmt::Debug for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Agent { .. } => f.write_str("Agent"),
            NodeRole::Trader => f.write_str("Trader"),
        }
    }
}

/// Who the local node is
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Public identity
    pub credential: Credential,
    /// Transport address
    pub address: NetworkAddress,
    /// Protocol role
    pub role: NodeRole,
}

impl NodeIdentity {
    /// Agent identity derived from its signing key
    pub fn agent(signing_key: SigningKey, address: NetworkAddress) -> Self {
        Self {
            credential: Credential::from(signing_key.verifying_key()),
            address,
            role: NodeRole::Agent { signing_key },
        }
    }

    /// Trader identity
    pub fn trader(credential: Credential, address: NetworkAddress) -> Self {
        Self {
            credential,
            address,
            role: NodeRole::Trader,
        }
    }

    /// Whether the node is the agent
    pub fn is_agent(&self) -> bool {
        matches!(self.role, NodeRole::Agent { .. })
    }

    /// Role name for logs and errors
    pub fn role_name(&self) -> &'static str {
        if self.is_agent() {
            "agent"
        } else {
            "trader"
        }
    }
}

/// Handle on a dispute returned by open and resolve
#[derive(Debug, Clone)]
pub struct DisputeRef {
    /// External dispute id
    pub id: DisputeId,
    /// Trade id
    pub trade_id: TradeId,
    /// Trader the record belongs to
    pub trader: Credential,
    /// Delivery of the message that carried the operation
    pub delivery: watch::Receiver<DeliveryStatus>,
}

/// Handle on an appended chat message
#[derive(Debug, Clone)]
pub struct ChatMessageRef {
    /// Message uid
    pub uid: MessageUid,
    /// Dispute the message belongs to
    pub dispute_id: DisputeId,
    /// Delivery of the message
    pub delivery: watch::Receiver<DeliveryStatus>,
}

/// Wait until a delivery watch reports a settled status
pub async fn wait_settled(delivery: &mut watch::Receiver<DeliveryStatus>) -> DeliveryStatus {
    let settled = delivery
        .wait_for(DeliveryStatus::is_settled)
        .await
        .map(|status| status.clone());
    match settled {
        Ok(status) => status,
        // Sender dropped: the last value is final.
        Err(_) => delivery.borrow().clone(),
    }
}

impl DisputeRef {
    /// Wait for the transport outcome or an ack
    pub async fn settled(&mut self) -> DeliveryStatus {
        wait_settled(&mut self.delivery).await
    }

    /// Current effective delivery state
    pub fn delivery_state(&self) -> DeliveryState {
        self.delivery.borrow().effective()
    }
}

impl ChatMessageRef {
    /// Wait for the transport outcome or an ack
    pub async fn settled(&mut self) -> DeliveryStatus {
        wait_settled(&mut self.delivery).await
    }

    /// Current effective delivery state
    pub fn delivery_state(&self) -> DeliveryState {
        self.delivery.borrow().effective()
    }
}

/// Outbound envelope awaiting its transport report
struct InFlight {
    kind: SourceKind,
    trade_id: TradeId,
    chat_uid: Option<MessageUid>,
    peer: NetworkAddress,
}

/// Collaborators and effects the engine is built from
pub(crate) struct EngineParts {
    /// Local identity
    pub identity: NodeIdentity,
    /// Configuration
    pub config: DisputeConfig,
    /// Loaded dispute list
    pub list: DisputeList,
    /// Transport
    pub transport: Arc<dyn MessageTransport>,
    /// Wallet, traders only
    pub wallet: Option<Arc<dyn EscrowWallet>>,
    /// Trade lifecycle, traders only
    pub trades: Option<Arc<dyn TradeLifecycle>>,
    /// Clock
    pub time: Arc<dyn PhysicalTimeEffects>,
    /// Uid source
    pub random: Arc<dyn RandomEffects>,
    /// Queue used to post transport reports back to the loop
    pub commands: mpsc::WeakSender<Command>,
}

/// The dispute protocol state machine
pub(crate) struct DisputeEngine {
    identity: NodeIdentity,
    config: DisputeConfig,
    list: DisputeList,
    transport: Arc<dyn MessageTransport>,
    wallet: Option<Arc<dyn EscrowWallet>>,
    trades: Option<Arc<dyn TradeLifecycle>>,
    time: Arc<dyn PhysicalTimeEffects>,
    random: Arc<dyn RandomEffects>,
    commands: mpsc::WeakSender<Command>,
    in_flight: HashMap<MessageUid, InFlight>,
    watchers: HashMap<MessageUid, watch::Sender<DeliveryStatus>>,
    deferred: HashMap<TradeId, Vec<ResolutionDelivered>>,
    publishing: HashSet<DisputeKey>,
}

impl DisputeEngine {
    /// Assemble an engine
    pub fn new(parts: EngineParts) -> Self {
        Self {
            identity: parts.identity,
            config: parts.config,
            list: parts.list,
            transport: parts.transport,
            wallet: parts.wallet,
            trades: parts.trades,
            time: parts.time,
            random: parts.random,
            commands: parts.commands,
            in_flight: HashMap::new(),
            watchers: HashMap::new(),
            deferred: HashMap::new(),
            publishing: HashSet::new(),
        }
    }

    /// Local identity
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Read access to the list
    pub fn list(&self) -> &DisputeList {
        &self.list
    }

    /// Whether any envelope still awaits a transport report
    pub fn has_pending_messages(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// First record for a trade
    pub fn find_dispute(&self, trade_id: &TradeId) -> Option<Dispute> {
        self.list.find_by_trade(trade_id).cloned()
    }

    /// Record for a trade and trader
    pub fn find_dispute_for_trader(
        &self,
        trade_id: &TradeId,
        trader: &Credential,
    ) -> Option<Dispute> {
        self.list.find_by_trade_and_trader(trade_id, trader).cloned()
    }

    /// Mark a record and its messages as seen by the local user
    pub fn mark_seen(&mut self, id: &DisputeId) -> DisputeResult<()> {
        let key = self.key_for_id(id)?;
        self.list.update(&key, |d| {
            d.mark_seen();
            d.mark_messages_seen();
        });
        Ok(())
    }

    /// Flush the store
    pub async fn flush(&self) -> DisputeResult<()> {
        self.list.store().flush().await.map_err(DisputeError::from)
    }

    fn key_for_id(&self, id: &DisputeId) -> DisputeResult<DisputeKey> {
        self.list
            .find_by_id(id)
            .map(DisputeKey::of)
            .ok_or_else(|| DisputeError::not_found(id))
    }

    fn my_key(&self, trade_id: &TradeId) -> DisputeKey {
        DisputeKey::new(trade_id.clone(), self.identity.credential)
    }

    async fn now(&self) -> u64 {
        self.time.now_ms().await
    }

    async fn new_uid(&self) -> MessageUid {
        self.random.new_message_uid().await
    }

    /// System message authored by this node on `dispute`'s thread
    async fn system_message(&self, dispute: &Dispute, text: &str) -> ChatMessage {
        ChatMessage::system(
            self.new_uid().await,
            dispute.trade_id.clone(),
            dispute.trader_identity,
            self.identity.credential,
            !self.identity.is_agent(),
            text,
            self.now().await,
        )
    }

    /// Register a watch for a chat message's delivery status
    fn watch_delivery(
        &mut self,
        key: &DisputeKey,
        chat_uid: MessageUid,
    ) -> watch::Receiver<DeliveryStatus> {
        let current = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .and_then(|d| d.chat_message(&chat_uid))
            .map(|m| m.delivery.clone())
            .unwrap_or_default();
        let sender = self
            .watchers
            .entry(chat_uid)
            .or_insert_with(|| watch::channel(current.clone()).0);
        sender.send_replace(current);
        sender.subscribe()
    }

    fn dispute_ref(&mut self, key: &DisputeKey, chat_uid: MessageUid) -> DisputeResult<DisputeRef> {
        let id = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .map(|d| d.id.clone())
            .ok_or_else(|| DisputeError::not_found(&key.trade_id))?;
        Ok(DisputeRef {
            id,
            trade_id: key.trade_id.clone(),
            trader: key.trader,
            delivery: self.watch_delivery(key, chat_uid),
        })
    }

    /// Fail if the peer is known not to support `capability`
    async fn check_capability(
        &self,
        peer: &NetworkAddress,
        capability: Capability,
    ) -> DisputeResult<()> {
        match self.transport.peer_capabilities(peer).await {
            Some(caps) if !caps.supports(capability) => Err(DisputeError::CapabilityUnsupported {
                peer: peer.clone(),
                capability: format!("{capability:?}"),
            }),
            _ => Ok(()),
        }
    }

    /// Send a protocol envelope, tracking the delivery of `chat_uid`
    ///
    /// Returns once the send is initiated. A capability refusal or a send
    /// that cannot start marks the tracked message failed and is returned
    /// as an error.
    async fn dispatch(
        &mut self,
        envelope: Envelope,
        peer: &NetworkAddress,
        credential: &Credential,
        chat_uid: Option<MessageUid>,
    ) -> DisputeResult<()> {
        let kind = envelope.source_kind();
        let trade_id = envelope.trade_id().clone();

        if let Err(err) = self.check_capability(peer, envelope.required_capability()).await {
            if let Some(uid) = chat_uid {
                self.apply_delivery(&trade_id, uid, |s| s.mark_failed(err.to_string()));
            }
            tracing::warn!(peer = %peer, kind = envelope.kind_name(), error = %err, "send refused");
            return Err(err);
        }

        if let Some(uid) = chat_uid {
            self.apply_delivery(&trade_id, uid, DeliveryStatus::mark_sent);
        }

        match self
            .transport
            .send_with_mailbox_fallback(peer, credential, &envelope)
            .await
        {
            Ok(handle) => {
                let envelope_uid = envelope.uid();
                if let Some(kind) = kind {
                    self.in_flight.insert(
                        envelope_uid,
                        InFlight {
                            kind,
                            trade_id,
                            chat_uid,
                            peer: peer.clone(),
                        },
                    );
                }
                tracing::info!(
                    peer = %peer,
                    kind = envelope.kind_name(),
                    uid = %envelope_uid,
                    "envelope sent"
                );
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let outcome = handle.outcome().await;
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx
                            .send(Command::DeliveryReport {
                                envelope_uid,
                                outcome,
                            })
                            .await;
                    }
                });
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    peer = %peer,
                    kind = envelope.kind_name(),
                    error = %err,
                    "send failed to start"
                );
                if let Some(uid) = chat_uid {
                    self.apply_delivery(&trade_id, uid, |s| s.mark_failed(err.to_string()));
                }
                Err(DisputeError::DeliveryFailed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Answer an inbound envelope; acks themselves are never tracked or acked
    async fn send_ack(
        &self,
        to: &NetworkAddress,
        credential: &Credential,
        source_kind: SourceKind,
        source_uid: Option<MessageUid>,
        trade_id: &TradeId,
        result: Result<(), String>,
    ) {
        let (success, error_message) = match result {
            Ok(()) => (true, None),
            Err(message) => (false, Some(message)),
        };
        let ack = Envelope::GenericAck(GenericAck {
            uid: self.new_uid().await,
            sender_addr: self.identity.address.clone(),
            source_kind,
            source_uid,
            source_id: trade_id.clone(),
            success,
            error_message,
        });
        match self.transport.send_with_mailbox_fallback(to, credential, &ack).await {
            Ok(handle) => {
                tracing::debug!(peer = %to, source = %source_kind, success, "ack sent");
                let peer = to.clone();
                tokio::spawn(async move {
                    if let DeliveryOutcome::Failed(reason) = handle.outcome().await {
                        tracing::warn!(%peer, %reason, "ack delivery failed");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(peer = %to, error = %err, "ack send failed to start");
            }
        }
    }

    /// Post a command back onto the loop after `delay`
    fn post_later(&self, delay: std::time::Duration, command: Command) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(command).await;
            }
        });
    }
}
