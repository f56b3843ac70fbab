//! Three-node dispute network on the in-memory transport
//!
//! [`TestNetwork`] starts an agent and both traders of one trade, each
//! running its own dispute service with deterministic effects and
//! recording collaborators.

use crate::collaborators::{RecordingTrades, RecordingWallet};
use crate::effects::{FixedTimeHandler, SequentialRandom};
use crate::fixtures;
use arbiter_core::{
    CapabilitySet, ContractSnapshot, Credential, Dispute, NetworkAddress, PayoutSuggestion,
    Reason, ResolutionOutcome, RoleFlags, Side, TradeId,
};
use arbiter_dispute::{
    DisputeConfig, DisputeHandle, DisputeServiceBuilder, MemoryStore, NodeIdentity, OpenRequest,
};
use arbiter_transport::MemoryNetwork;
use ed25519_dalek::SigningKey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Start of the fixed test clock
pub const START_MS: u64 = 1_700_000_000_000;

/// One running dispute service and its collaborators
pub struct TestNode {
    /// Service handle
    pub handle: DisputeHandle,
    /// Node identity
    pub credential: Credential,
    /// Node address
    pub address: NetworkAddress,
    /// Persisted snapshots
    pub store: Arc<MemoryStore>,
    /// Payout wallet
    pub wallet: Arc<RecordingWallet>,
    /// Trade lifecycle notifications
    pub trades: Arc<RecordingTrades>,
    /// Node clock
    pub clock: Arc<FixedTimeHandler>,
}

impl TestNode {
    /// Register `identity` on `network` and spawn its service
    ///
    /// `seed` keeps the node's uids disjoint from every other node's.
    pub async fn spawn(
        network: &MemoryNetwork,
        identity: NodeIdentity,
        config: DisputeConfig,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let credential = identity.credential;
        let address = identity.address.clone();
        let (transport, inbound) =
            network.register(address.clone(), credential, Some(CapabilitySet::all()));
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(RecordingWallet::new());
        let trades = Arc::new(RecordingTrades::new());
        let clock = Arc::new(FixedTimeHandler::new(START_MS));

        let handle = DisputeServiceBuilder::new(identity, Arc::new(transport))
            .inbound(inbound)
            .config(config)
            .store(store.clone())
            .wallet(wallet.clone())
            .trade_lifecycle(trades.clone())
            .time(clock.clone())
            .random(Arc::new(SequentialRandom::new(seed)))
            .spawn()
            .await?;

        Ok(Self {
            handle,
            credential,
            address,
            store,
            wallet,
            trades,
            clock,
        })
    }

    /// Record of `trader` for `trade_id`
    pub async fn dispute_of(
        &self,
        trade_id: &TradeId,
        trader: &Credential,
    ) -> anyhow::Result<Option<Dispute>> {
        Ok(self.handle.find_dispute_for_trader(trade_id, trader).await?)
    }

    /// This node's own record for `trade_id`
    pub async fn own_dispute(&self, trade_id: &TradeId) -> anyhow::Result<Option<Dispute>> {
        self.dispute_of(trade_id, &self.credential).await
    }

    /// Every record the node holds
    pub async fn disputes(&self) -> anyhow::Result<Vec<Dispute>> {
        Ok(self.handle.disputes().await?)
    }
}

/// Agent plus both traders of trade `T1`
pub struct TestNetwork {
    /// Shared transport
    pub network: MemoryNetwork,
    /// Agent node
    pub agent: TestNode,
    /// Buyer node
    pub buyer: TestNode,
    /// Seller node
    pub seller: TestNode,
    /// Agent signing key
    pub agent_key: SigningKey,
    /// Disputed trade
    pub trade_id: TradeId,
    /// Contract of the disputed trade; the seller is the maker
    pub contract: ContractSnapshot,
}

impl TestNetwork {
    /// Network with zero delays
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_config(DisputeConfig::immediate()).await
    }

    /// Network whose nodes share `config`
    pub async fn with_config(config: DisputeConfig) -> anyhow::Result<Self> {
        let network = MemoryNetwork::new();
        let agent_key = fixtures::signing_key("agent");
        let agent_party = fixtures::party("agent");
        let buyer_party = fixtures::party("buyer");
        let seller_party = fixtures::party("seller");

        let agent = TestNode::spawn(
            &network,
            NodeIdentity::agent(agent_key.clone(), agent_party.address),
            config.clone(),
            1,
        )
        .await?;
        let buyer = TestNode::spawn(
            &network,
            NodeIdentity::trader(buyer_party.credential, buyer_party.address),
            config.clone(),
            2,
        )
        .await?;
        let seller = TestNode::spawn(
            &network,
            NodeIdentity::trader(seller_party.credential, seller_party.address),
            config,
            3,
        )
        .await?;

        let trade_id = TradeId::new("T1");
        let contract = fixtures::contract(&trade_id, "buyer", "seller", Side::Seller);
        Ok(Self {
            network,
            agent,
            buyer,
            seller,
            agent_key,
            trade_id,
            contract,
        })
    }

    /// Trader node on `side`
    pub fn trader(&self, side: Side) -> &TestNode {
        match side {
            Side::Buyer => &self.buyer,
            Side::Seller => &self.seller,
        }
    }

    /// Open request for the trader on `side`
    pub fn open_request(&self, side: Side) -> OpenRequest {
        OpenRequest::new(
            self.trade_id.clone(),
            RoleFlags::for_side(&self.contract, side),
            self.contract.clone(),
            self.agent.credential,
            self.agent.address.clone(),
        )
    }

    /// Canonical outcome for the disputed trade
    pub fn outcome(
        &self,
        suggestion: PayoutSuggestion,
        reason: Reason,
    ) -> anyhow::Result<ResolutionOutcome> {
        Ok(fixtures::outcome(&self.trade_id, suggestion, reason)?)
    }

    /// Take a node off the network or bring it back
    pub fn set_online(&self, address: &NetworkAddress, online: bool) -> usize {
        self.network.set_online(address, online)
    }

    /// Stop every node
    pub async fn shutdown(&self) {
        for node in [&self.agent, &self.buyer, &self.seller] {
            let _ = node.handle.shutdown().await;
        }
    }
}

/// Poll `check` until it holds or about two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
