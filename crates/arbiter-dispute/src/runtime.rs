//! # Single-Writer Dispute Service
//!
//! Every entry point (caller operations, inbound frames, transport reports,
//! the delayed mirror and wallet results) is marshalled onto one command
//! queue consumed by [`DisputeService::run`]. The engine and its list are
//! owned by that loop and never shared, so no state here needs a lock.
//!
//! Mailbox batches are decoded on the blocking pool and re-posted to the
//! queue as one [`Command::Decoded`], so their mutations are applied by
//! the loop like everything else.

use crate::collaborators::{EscrowWallet, TradeLifecycle, WalletError};
use crate::config::DisputeConfig;
use crate::engine::{
    ChatMessageRef, DisputeEngine, DisputeRef, EngineParts, NodeIdentity, OpenRequest,
    OpenerReply,
};
use crate::errors::{DisputeError, DisputeResult, ReceiveOutcome};
use crate::list::{DisputeKey, DisputeList, DisputeListener};
use crate::store::{DisputeStore, JsonFileStore, MemoryStore};
use arbiter_core::{
    ArbiterError, ChatMessage, Credential, Dispute, DisputeId, Envelope, MessageUid,
    NetworkAddress, PhysicalTimeEffects, RandomEffects, ResolutionOutcome, SystemRandomHandler,
    SystemTimeHandler, TradeId,
};
use arbiter_transport::{DeliveryOutcome, Inbound, InboundFrame, MessageTransport};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

type Reply<T> = oneshot::Sender<T>;

/// Work items for the service loop
pub(crate) enum Command {
    OpenDispute {
        request: OpenRequest,
        reply: Reply<DisputeResult<DisputeRef>>,
    },
    AppendChat {
        id: DisputeId,
        text: String,
        reply: Reply<DisputeResult<ChatMessageRef>>,
    },
    SubmitChat {
        id: DisputeId,
        message: ChatMessage,
        reply: Reply<DisputeResult<Option<ChatMessageRef>>>,
    },
    Resolve {
        id: DisputeId,
        outcome: ResolutionOutcome,
        rationale: String,
        reply: Reply<DisputeResult<DisputeRef>>,
    },
    ResolveTrade {
        trade_id: TradeId,
        outcome: ResolutionOutcome,
        rationale: String,
        reply: Reply<DisputeResult<Vec<DisputeRef>>>,
    },
    RetryMessage {
        id: DisputeId,
        uid: MessageUid,
        reply: Reply<DisputeResult<ChatMessageRef>>,
    },
    FindByTrade {
        trade_id: TradeId,
        reply: Reply<Option<Dispute>>,
    },
    FindByTradeAndTrader {
        trade_id: TradeId,
        trader: Credential,
        reply: Reply<Option<Dispute>>,
    },
    List {
        reply: Reply<Vec<Dispute>>,
    },
    MarkSeen {
        id: DisputeId,
        reply: Reply<DisputeResult<()>>,
    },
    Receive {
        envelope: Envelope,
        from: NetworkAddress,
        reply: Reply<ReceiveOutcome>,
    },
    HasPending {
        reply: Reply<bool>,
    },
    Flush {
        reply: Reply<DisputeResult<()>>,
    },
    Shutdown,

    // Posted by tasks the engine spawned
    DeliveryReport {
        envelope_uid: MessageUid,
        outcome: DeliveryOutcome,
    },
    SendMirror {
        key: DisputeKey,
        reply: OpenerReply,
    },
    PayoutResult {
        key: DisputeKey,
        result: Result<String, WalletError>,
    },
    Decoded {
        frames: Vec<(arbiter_core::Result<Envelope>, NetworkAddress)>,
    },
}

/// The service loop; owns the engine
pub struct DisputeService {
    engine: DisputeEngine,
    commands: mpsc::Receiver<Command>,
    requeue: mpsc::WeakSender<Command>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
}

impl DisputeService {
    /// Run until shutdown or until every [`DisputeHandle`] is dropped
    pub async fn run(mut self) {
        tracing::info!(
            role = self.engine.identity().role_name(),
            address = %self.engine.identity().address,
            disputes = self.engine.list().len(),
            "dispute service started"
        );
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                inbound = next_inbound(&mut self.inbound) => match inbound {
                    Some(inbound) => self.handle_inbound(inbound).await,
                    None => {
                        tracing::info!("inbound stream closed");
                        self.inbound = None;
                    }
                },
            }
        }

        if self.engine.has_pending_messages() {
            tracing::warn!("dispute service stopping with undelivered messages");
        }
        if let Err(err) = self.engine.flush().await {
            tracing::error!(error = %err, "final dispute store flush failed");
        }
        tracing::info!("dispute service stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::OpenDispute { request, reply } => {
                let _ = reply.send(self.engine.open_dispute(request).await);
            }
            Command::AppendChat { id, text, reply } => {
                let _ = reply.send(self.engine.append_chat_message(&id, text).await);
            }
            Command::SubmitChat { id, message, reply } => {
                let _ = reply.send(self.engine.submit_chat_message(&id, message).await);
            }
            Command::Resolve {
                id,
                outcome,
                rationale,
                reply,
            } => {
                let _ = reply.send(self.engine.resolve(&id, outcome, rationale).await);
            }
            Command::ResolveTrade {
                trade_id,
                outcome,
                rationale,
                reply,
            } => {
                let _ = reply.send(self.engine.resolve_trade(&trade_id, outcome, rationale).await);
            }
            Command::RetryMessage { id, uid, reply } => {
                let _ = reply.send(self.engine.retry_message(&id, uid).await);
            }
            Command::FindByTrade { trade_id, reply } => {
                let _ = reply.send(self.engine.find_dispute(&trade_id));
            }
            Command::FindByTradeAndTrader {
                trade_id,
                trader,
                reply,
            } => {
                let _ = reply.send(self.engine.find_dispute_for_trader(&trade_id, &trader));
            }
            Command::List { reply } => {
                let _ = reply.send(self.engine.list().snapshot());
            }
            Command::MarkSeen { id, reply } => {
                let _ = reply.send(self.engine.mark_seen(&id));
            }
            Command::Receive {
                envelope,
                from,
                reply,
            } => {
                let _ = reply.send(self.engine.receive(envelope, &from).await);
            }
            Command::HasPending { reply } => {
                let _ = reply.send(self.engine.has_pending_messages());
            }
            Command::Flush { reply } => {
                let _ = reply.send(self.engine.flush().await);
            }
            Command::Shutdown => {}
            Command::DeliveryReport {
                envelope_uid,
                outcome,
            } => self.engine.handle_delivery_report(envelope_uid, outcome),
            Command::SendMirror { key, reply } => {
                self.engine.mirror_and_ack(key, reply).await;
            }
            Command::PayoutResult { key, result } => {
                self.engine.handle_payout_result(key, result).await;
            }
            Command::Decoded { frames } => {
                for (decoded, from) in frames {
                    self.apply_frame(decoded, from).await;
                }
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Single(frame) => {
                let decoded = Envelope::from_bytes(&frame.bytes);
                self.apply_frame(decoded, frame.sender).await;
            }
            Inbound::Batch(frames) => {
                tracing::debug!(count = frames.len(), "decoding mailbox batch");
                let requeue = self.requeue.clone();
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(move || decode_batch(frames)).await {
                        Ok(frames) => {
                            if let Some(tx) = requeue.upgrade() {
                                let _ = tx.send(Command::Decoded { frames }).await;
                            }
                        }
                        Err(err) => tracing::error!(error = %err, "mailbox batch decode panicked"),
                    }
                });
            }
        }
    }

    async fn apply_frame(&mut self, decoded: arbiter_core::Result<Envelope>, from: NetworkAddress) {
        match decoded {
            Ok(envelope) => {
                let kind = envelope.kind_name();
                let outcome = self.engine.receive(envelope, &from).await;
                tracing::debug!(peer = %from, kind, ?outcome, "inbound envelope processed");
            }
            Err(err) => {
                tracing::warn!(peer = %from, error = %err, "malformed frame dropped");
            }
        }
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<Inbound>>) -> Option<Inbound> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => futures::future::pending().await,
    }
}

fn decode_batch(
    frames: Vec<InboundFrame>,
) -> Vec<(arbiter_core::Result<Envelope>, NetworkAddress)> {
    frames
        .into_iter()
        .map(|frame| (Envelope::from_bytes(&frame.bytes), frame.sender))
        .collect()
}

/// Cloneable handle for talking to a running [`DisputeService`]
#[derive(Clone)]
pub struct DisputeHandle {
    commands: mpsc::Sender<Command>,
    open_count: watch::Receiver<usize>,
    credential: Credential,
    address: NetworkAddress,
}

impl DisputeHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> DisputeResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| DisputeError::ServiceStopped)?;
        response.await.map_err(|_| DisputeError::ServiceStopped)
    }

    /// Local identity
    pub fn credential(&self) -> Credential {
        self.credential
    }

    /// Local address
    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    /// Open or reopen a dispute (traders)
    pub async fn open_dispute(&self, request: OpenRequest) -> DisputeResult<DisputeRef> {
        self.request(|reply| Command::OpenDispute { request, reply })
            .await?
    }

    /// Append and relay a chat message
    pub async fn append_chat_message(
        &self,
        id: &DisputeId,
        text: impl Into<String>,
    ) -> DisputeResult<ChatMessageRef> {
        let id = id.clone();
        let text = text.into();
        self.request(|reply| Command::AppendChat { id, text, reply })
            .await?
    }

    /// Append and relay a prepared chat message; `None` for a duplicate uid
    pub async fn submit_chat_message(
        &self,
        id: &DisputeId,
        message: ChatMessage,
    ) -> DisputeResult<Option<ChatMessageRef>> {
        let id = id.clone();
        self.request(|reply| Command::SubmitChat { id, message, reply })
            .await?
    }

    /// Resolve one dispute record (agent)
    pub async fn resolve(
        &self,
        id: &DisputeId,
        outcome: ResolutionOutcome,
        rationale: impl Into<String>,
    ) -> DisputeResult<DisputeRef> {
        let id = id.clone();
        let rationale = rationale.into();
        self.request(|reply| Command::Resolve {
            id,
            outcome,
            rationale,
            reply,
        })
        .await?
    }

    /// Resolve both records of a trade (agent)
    pub async fn resolve_trade(
        &self,
        trade_id: &TradeId,
        outcome: ResolutionOutcome,
        rationale: impl Into<String>,
    ) -> DisputeResult<Vec<DisputeRef>> {
        let trade_id = trade_id.clone();
        let rationale = rationale.into();
        self.request(|reply| Command::ResolveTrade {
            trade_id,
            outcome,
            rationale,
            reply,
        })
        .await?
    }

    /// Re-send a failed message
    pub async fn retry_message(
        &self,
        id: &DisputeId,
        uid: MessageUid,
    ) -> DisputeResult<ChatMessageRef> {
        let id = id.clone();
        self.request(|reply| Command::RetryMessage { id, uid, reply })
            .await?
    }

    /// First record for a trade
    pub async fn find_dispute(&self, trade_id: &TradeId) -> DisputeResult<Option<Dispute>> {
        let trade_id = trade_id.clone();
        self.request(|reply| Command::FindByTrade { trade_id, reply })
            .await
    }

    /// Record for a trade and trader
    pub async fn find_dispute_for_trader(
        &self,
        trade_id: &TradeId,
        trader: &Credential,
    ) -> DisputeResult<Option<Dispute>> {
        let trade_id = trade_id.clone();
        let trader = *trader;
        self.request(|reply| Command::FindByTradeAndTrader {
            trade_id,
            trader,
            reply,
        })
        .await
    }

    /// Snapshot of every record
    pub async fn disputes(&self) -> DisputeResult<Vec<Dispute>> {
        self.request(|reply| Command::List { reply }).await
    }

    /// Mark a dispute and its messages as seen
    pub async fn mark_seen(&self, id: &DisputeId) -> DisputeResult<()> {
        let id = id.clone();
        self.request(|reply| Command::MarkSeen { id, reply }).await?
    }

    /// Feed an envelope directly, bypassing the transport
    pub async fn receive(
        &self,
        envelope: Envelope,
        from: &NetworkAddress,
    ) -> DisputeResult<ReceiveOutcome> {
        let from = from.clone();
        self.request(|reply| Command::Receive {
            envelope,
            from,
            reply,
        })
        .await
    }

    /// Whether any envelope still awaits its transport report
    pub async fn has_pending_messages(&self) -> DisputeResult<bool> {
        self.request(|reply| Command::HasPending { reply }).await
    }

    /// Write any pending snapshot now
    pub async fn flush(&self) -> DisputeResult<()> {
        self.request(|reply| Command::Flush { reply }).await?
    }

    /// Stop the service loop after the commands queued before this one
    pub async fn shutdown(&self) -> DisputeResult<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| DisputeError::ServiceStopped)
    }

    /// Number of disputes that are not closed
    pub fn open_dispute_count(&self) -> watch::Receiver<usize> {
        self.open_count.clone()
    }
}

/// Assembles a [`DisputeService`] and its [`DisputeHandle`]
pub struct DisputeServiceBuilder {
    identity: NodeIdentity,
    transport: Arc<dyn MessageTransport>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    config: DisputeConfig,
    store: Option<Arc<dyn DisputeStore>>,
    wallet: Option<Arc<dyn EscrowWallet>>,
    trades: Option<Arc<dyn TradeLifecycle>>,
    time: Arc<dyn PhysicalTimeEffects>,
    random: Arc<dyn RandomEffects>,
    listeners: Vec<Arc<dyn DisputeListener>>,
}

impl DisputeServiceBuilder {
    /// Builder with default config, system effects and an in-memory store
    pub fn new(identity: NodeIdentity, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            identity,
            transport,
            inbound: None,
            config: DisputeConfig::default(),
            store: None,
            wallet: None,
            trades: None,
            time: Arc::new(SystemTimeHandler::new()),
            random: Arc::new(SystemRandomHandler::new()),
            listeners: Vec::new(),
        }
    }

    /// Frames delivered by the transport
    pub fn inbound(mut self, inbound: mpsc::UnboundedReceiver<Inbound>) -> Self {
        self.inbound = Some(inbound);
        self
    }

    /// Service configuration
    pub fn config(mut self, config: DisputeConfig) -> Self {
        self.config = config;
        self
    }

    /// Explicit store; otherwise derived from the config
    pub fn store(mut self, store: Arc<dyn DisputeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wallet used to publish payouts
    pub fn wallet(mut self, wallet: Arc<dyn EscrowWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Trade lifecycle notified of dispute state changes
    pub fn trade_lifecycle(mut self, trades: Arc<dyn TradeLifecycle>) -> Self {
        self.trades = Some(trades);
        self
    }

    /// Clock
    pub fn time(mut self, time: Arc<dyn PhysicalTimeEffects>) -> Self {
        self.time = time;
        self
    }

    /// Uid source
    pub fn random(mut self, random: Arc<dyn RandomEffects>) -> Self {
        self.random = random;
        self
    }

    /// List listener
    pub fn listener(mut self, listener: Arc<dyn DisputeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Load the list and wire the service
    pub async fn build(self) -> DisputeResult<(DisputeService, DisputeHandle)> {
        self.config
            .validate()
            .map_err(|e| DisputeError::Core(ArbiterError::invalid(e.to_string())))?;

        let store: Arc<dyn DisputeStore> = match self.store {
            Some(store) => store,
            None => match &self.config.persistence.path {
                Some(path) => Arc::new(JsonFileStore::open(
                    path.clone(),
                    self.config.persistence.debounce(),
                )),
                None => Arc::new(MemoryStore::new()),
            },
        };
        let mut list = DisputeList::new(store);
        for listener in self.listeners {
            list.add_listener(listener);
        }
        let loaded = list.load().await?;
        tracing::debug!(loaded, "dispute list loaded");
        let open_count = list.subscribe_open_count();

        let (tx, rx) = mpsc::channel(self.config.command_buffer);
        let credential = self.identity.credential;
        let address = self.identity.address.clone();
        let engine = DisputeEngine::new(EngineParts {
            identity: self.identity,
            config: self.config,
            list,
            transport: self.transport,
            wallet: self.wallet,
            trades: self.trades,
            time: self.time,
            random: self.random,
            commands: tx.downgrade(),
        });
        let service = DisputeService {
            engine,
            commands: rx,
            requeue: tx.downgrade(),
            inbound: self.inbound,
        };
        let handle = DisputeHandle {
            commands: tx,
            open_count,
            credential,
            address,
        };
        Ok((service, handle))
    }

    /// Build and spawn the service loop
    pub async fn spawn(self) -> DisputeResult<DisputeHandle> {
        let (service, handle) = self.build().await?;
        tokio::spawn(service.run());
        Ok(handle)
    }
}
