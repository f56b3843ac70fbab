//! Inbound envelopes fed straight into the agent, with a raw buyer endpoint
//! observing every acknowledgment

#![allow(clippy::unwrap_used, clippy::expect_used)]

use arbiter_core::{
    CapabilitySet, ChatMessage, Dispute, DisputeParams, Envelope, GenericAck, MessageUid,
    NetworkAddress, OpenDispute, Party, PayoutSuggestion, Reason, Resolution,
    ResolutionDelivered, RoleFlags, Side, SourceKind, SupportKind, TradeId,
};
use arbiter_dispute::{
    DisputeConfig, NodeIdentity, ReceiveOutcome, ValidationError, MAX_DEFERRED_PER_TRADE,
    MAX_DEFERRED_TRADES,
};
use arbiter_testkit::{eventually, fixtures, TestNode, START_MS};
use arbiter_transport::{Inbound, MemoryNetwork, MemoryTransport};
use assert_matches::assert_matches;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    network: MemoryNetwork,
    agent: TestNode,
    seller: TestNode,
    buyer: Party,
    _buyer_transport: MemoryTransport,
    buyer_inbox: UnboundedReceiver<Inbound>,
}

impl Harness {
    async fn start() -> Self {
        let network = MemoryNetwork::new();
        let agent_party = fixtures::party("agent");
        let seller_party = fixtures::party("seller");
        let agent = TestNode::spawn(
            &network,
            NodeIdentity::agent(fixtures::signing_key("agent"), agent_party.address),
            DisputeConfig::immediate(),
            1,
        )
        .await
        .unwrap();
        let seller = TestNode::spawn(
            &network,
            NodeIdentity::trader(seller_party.credential, seller_party.address),
            DisputeConfig::immediate(),
            3,
        )
        .await
        .unwrap();
        let buyer = fixtures::party("buyer");
        let (buyer_transport, buyer_inbox) = network.register(
            buyer.address.clone(),
            buyer.credential,
            Some(CapabilitySet::all()),
        );
        Self {
            network,
            agent,
            seller,
            buyer,
            _buyer_transport: buyer_transport,
            buyer_inbox,
        }
    }

    /// Buyer's record for `trade`, built against `contract_trade`'s contract
    fn buyer_dispute(&self, trade: &str, contract_trade: &str) -> Dispute {
        let trade_id = TradeId::new(trade);
        let contract = fixtures::contract(
            &TradeId::new(contract_trade),
            "buyer",
            "seller",
            Side::Seller,
        );
        let mut dispute = Dispute::new(DisputeParams {
            trade_id: trade_id.clone(),
            trader_identity: self.buyer.credential,
            role_flags: RoleFlags::for_side(&contract, Side::Buyer),
            agent_identity: self.agent.credential,
            agent_address: self.agent.address.clone(),
            contract,
            support_kind: SupportKind::Arbitration,
            opening_time: START_MS,
            trade_date: START_MS - 3_600_000,
            trade_period_end: START_MS - 60_000,
            deposit_tx_ref: Some("deposit-tx".to_string()),
            payout_tx_ref: None,
            prior_mediator_summary: None,
        });
        dispute.mark_seen();
        dispute.add_chat_message(ChatMessage::system(
            uid(0xB0),
            trade_id,
            self.buyer.credential,
            self.buyer.credential,
            true,
            "Dispute opened.",
            START_MS,
        ));
        dispute
    }

    fn open_envelope(&self, dispute: Dispute, envelope_uid: u128) -> Envelope {
        Envelope::OpenDispute(OpenDispute {
            dispute,
            sender_addr: self.buyer.address.clone(),
            support_kind: SupportKind::Arbitration,
            uid: uid(envelope_uid),
        })
    }

    async fn next_ack(&mut self) -> Option<GenericAck> {
        let inbound = tokio::time::timeout(Duration::from_millis(500), self.buyer_inbox.recv())
            .await
            .ok()??;
        let frame = match inbound {
            Inbound::Single(frame) => frame,
            Inbound::Batch(mut frames) => frames.remove(0),
        };
        match Envelope::from_bytes(&frame.bytes).unwrap() {
            Envelope::GenericAck(ack) => Some(ack),
            other => panic!("unexpected {}", other.kind_name()),
        }
    }
}

fn uid(n: u128) -> MessageUid {
    MessageUid::from_uuid(Uuid::from_u128(n))
}

/// Resolution for `trade` signed by a key no dispute names
fn unverifiable_resolution(trade: &str, signer: &str) -> Envelope {
    let outcome = fixtures::outcome(
        &TradeId::new(trade),
        PayoutSuggestion::BuyerGetsAll,
        Reason::SellerNotResponding,
    )
    .unwrap();
    Envelope::ResolutionDelivered(ResolutionDelivered {
        resolution: Resolution::sign(outcome, &fixtures::signing_key(signer)).unwrap(),
        sender_addr: NetworkAddress::new("stranger.onion:1"),
        support_kind: SupportKind::Arbitration,
        uid: uid(0xF0),
    })
}

#[tokio::test]
async fn redelivered_open_is_applied_once_and_acked_each_time() {
    let mut h = Harness::start().await;
    let envelope = h.open_envelope(h.buyer_dispute("T1", "T1"), 0xE0);
    let buyer_addr = h.buyer.address.clone();

    let first = h.agent.handle.receive(envelope.clone(), &buyer_addr).await.unwrap();
    assert_eq!(first, ReceiveOutcome::Applied);
    let second = h.agent.handle.receive(envelope, &buyer_addr).await.unwrap();
    assert_eq!(second, ReceiveOutcome::Duplicate);

    for _ in 0..2 {
        let ack = h.next_ack().await.expect("ack for every receipt");
        assert!(ack.success);
        assert_eq!(ack.source_uid, Some(uid(0xB0)));
        assert_eq!(ack.source_id, TradeId::new("T1"));
    }
    assert!(h.next_ack().await.is_none());

    assert_eq!(h.agent.disputes().await.unwrap().len(), 2);
    let seller = &h.seller;
    assert!(eventually(move || async move { seller.disputes().await.unwrap().len() == 1 }).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.seller.trades.started_by_peer().len(), 1);
}

#[tokio::test]
async fn tampered_contract_is_nacked_and_not_stored() {
    let mut h = Harness::start().await;
    let mut dispute = h.buyer_dispute("T1", "T1");
    dispute.contract.contract_json.push(' ');
    let envelope = h.open_envelope(dispute, 0xE1);
    let buyer_addr = h.buyer.address.clone();

    let outcome = h.agent.handle.receive(envelope, &buyer_addr).await.unwrap();
    assert_matches!(
        outcome,
        ReceiveOutcome::Rejected(ValidationError::ContractHashMismatch { .. })
    );
    let ack = h.next_ack().await.expect("negative ack");
    assert!(!ack.success);
    assert!(ack.error_message.is_some());
    assert!(h.agent.disputes().await.unwrap().is_empty());
}

#[tokio::test]
async fn contract_reused_for_another_trade_is_rejected() {
    let mut h = Harness::start().await;
    let buyer_addr = h.buyer.address.clone();
    let original = h.open_envelope(h.buyer_dispute("T1", "T1"), 0xE2);
    assert_eq!(
        h.agent.handle.receive(original, &buyer_addr).await.unwrap(),
        ReceiveOutcome::Applied
    );
    assert!(h.next_ack().await.unwrap().success);

    let replay = h.open_envelope(h.buyer_dispute("T2", "T1"), 0xE3);
    let outcome = h.agent.handle.receive(replay, &buyer_addr).await.unwrap();
    assert_matches!(
        outcome,
        ReceiveOutcome::Rejected(
            ValidationError::ReplayedContract { other_trade }
        ) if other_trade == TradeId::new("T1")
    );
    assert!(!h.next_ack().await.unwrap().success);
    assert!(h
        .agent
        .handle
        .find_dispute(&TradeId::new("T2"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn envelope_claiming_another_sender_is_dropped_without_ack() {
    let mut h = Harness::start().await;
    let envelope = h.open_envelope(h.buyer_dispute("T1", "T1"), 0xE4);
    let seller_addr = h.seller.address.clone();

    let outcome = h.agent.handle.receive(envelope, &seller_addr).await.unwrap();
    assert_matches!(
        outcome,
        ReceiveOutcome::Rejected(ValidationError::SenderAddressMismatch { .. })
    );
    assert!(h.next_ack().await.is_none());
    assert!(h.agent.disputes().await.unwrap().is_empty());
}

#[tokio::test]
async fn ack_for_an_unknown_message_is_ignored() {
    let h = Harness::start().await;
    let ack = Envelope::GenericAck(GenericAck {
        uid: uid(0xA0),
        sender_addr: h.buyer.address.clone(),
        source_kind: SourceKind::ChatRelay,
        source_uid: Some(uid(0xDEAD)),
        source_id: TradeId::new("T1"),
        success: true,
        error_message: None,
    });
    let outcome = h.agent.handle.receive(ack, &h.buyer.address).await.unwrap();
    assert_eq!(outcome, ReceiveOutcome::Ignored);
}

#[tokio::test]
async fn mailbox_flush_is_applied_in_order() {
    let mut h = Harness::start().await;
    h.network.set_online(&h.seller.address, false);
    let buyer_addr = h.buyer.address.clone();
    let envelope = h.open_envelope(h.buyer_dispute("T1", "T1"), 0xE5);
    h.agent.handle.receive(envelope, &buyer_addr).await.unwrap();
    assert!(h.next_ack().await.unwrap().success);

    let outcome = fixtures::outcome(
        &TradeId::new("T1"),
        PayoutSuggestion::BuyerGetsAll,
        Reason::SellerNotResponding,
    )
    .unwrap();
    h.agent
        .handle
        .resolve_trade(&TradeId::new("T1"), outcome, "Seller never answered.")
        .await
        .unwrap();
    assert_eq!(h.network.mailbox_len(&h.seller.address), 2);

    assert_eq!(h.network.set_online(&h.seller.address, true), 2);
    let seller = &h.seller;
    assert!(
        eventually(move || async move {
            matches!(seller.own_dispute(&TradeId::new("T1")).await, Ok(Some(d)) if d.is_closed())
        })
        .await
    );
    assert_eq!(h.seller.trades.closed(), vec![TradeId::new("T1")]);
}

#[tokio::test]
async fn resolutions_for_unknown_trades_are_parked_within_limits() {
    let h = Harness::start().await;
    let stranger = NetworkAddress::new("stranger.onion:1");
    let seller = &h.seller.handle;

    // The same signed resolution is parked once, however often it arrives.
    let first = unverifiable_resolution("X0", "stranger-0");
    for _ in 0..3 {
        assert_eq!(
            seller.receive(first.clone(), &stranger).await.unwrap(),
            ReceiveOutcome::Deferred
        );
    }
    for n in 1..MAX_DEFERRED_PER_TRADE {
        let other = unverifiable_resolution("X0", &format!("stranger-{n}"));
        assert_eq!(
            seller.receive(other, &stranger).await.unwrap(),
            ReceiveOutcome::Deferred
        );
    }
    let over = unverifiable_resolution("X0", "stranger-over");
    assert_matches!(
        seller.receive(over, &stranger).await.unwrap(),
        ReceiveOutcome::Rejected(
            ValidationError::DeferredLimit { trade_id, .. }
        ) if trade_id == TradeId::new("X0")
    );

    for n in 1..MAX_DEFERRED_TRADES {
        let parked = unverifiable_resolution(&format!("X{n}"), "stranger-0");
        assert_eq!(
            seller.receive(parked, &stranger).await.unwrap(),
            ReceiveOutcome::Deferred
        );
    }
    let flood = unverifiable_resolution("X-flood", "stranger-0");
    assert_matches!(
        seller.receive(flood, &stranger).await.unwrap(),
        ReceiveOutcome::Rejected(ValidationError::DeferredLimit { .. })
    );

    let mut truncated = unverifiable_resolution("Y0", "stranger-0");
    if let Envelope::ResolutionDelivered(delivered) = &mut truncated {
        delivered.resolution.agent_signature.truncate(10);
    }
    assert_matches!(
        seller.receive(truncated, &stranger).await.unwrap(),
        ReceiveOutcome::Rejected(ValidationError::InvalidSignature { .. })
    );
    assert!(h.seller.disputes().await.unwrap().is_empty());
}

#[tokio::test]
async fn deposit_reused_by_another_trade_is_rejected() {
    let mut h = Harness::start().await;
    let buyer_addr = h.buyer.address.clone();
    let original = h.open_envelope(h.buyer_dispute("T1", "T1"), 0xE6);
    assert_eq!(
        h.agent.handle.receive(original, &buyer_addr).await.unwrap(),
        ReceiveOutcome::Applied
    );
    assert!(h.next_ack().await.unwrap().success);
    // The opener's record and its mirror both carry the deposit.
    assert_eq!(h.agent.disputes().await.unwrap().len(), 2);

    let reused = h.open_envelope(h.buyer_dispute("T2", "T2"), 0xE7);
    let outcome = h.agent.handle.receive(reused, &buyer_addr).await.unwrap();
    assert_matches!(
        outcome,
        ReceiveOutcome::Rejected(
            ValidationError::ReplayedDispute { message }
        ) if message.contains("deposit-tx")
    );
    let ack = h.next_ack().await.unwrap();
    assert!(!ack.success);
    assert_eq!(ack.source_id, TradeId::new("T2"));

    let mut fresh = h.buyer_dispute("T3", "T3");
    fresh.deposit_tx_ref = Some("deposit-tx-3".to_string());
    let fresh = h.open_envelope(fresh, 0xE8);
    assert_eq!(
        h.agent.handle.receive(fresh, &buyer_addr).await.unwrap(),
        ReceiveOutcome::Applied
    );
    assert!(h.next_ack().await.unwrap().success);
}
