//! Opening, mirroring and reopening disputes across three nodes

#![allow(clippy::unwrap_used, clippy::expect_used)]

use arbiter_core::{
    AckState, Capability, CapabilitySet, DisputeState, PayoutSuggestion, Reason, Side,
};
use arbiter_dispute::{DisputeConfig, DisputeError};
use arbiter_testkit::{eventually, init_tracing, TestNetwork, TestNode};
use assert_matches::assert_matches;
use std::time::Duration;

async fn record_count(node: &TestNode) -> usize {
    node.disputes().await.unwrap().len()
}

#[tokio::test]
async fn open_is_mirrored_to_the_counterparty_and_acked() {
    init_tracing();
    let net = &TestNetwork::start().await.unwrap();
    let opened = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    assert_eq!(opened.trader, net.buyer.credential);

    assert!(eventually(move || async move { record_count(&net.seller).await == 1 }).await);
    let mirror = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert_eq!(mirror.state, DisputeState::New);
    assert_eq!(mirror.trader_side, Side::Seller);
    assert!(!mirror.role_flags.is_opener_buyer);
    assert!(mirror.role_flags.is_opener_maker);
    assert!(mirror.chat_thread[0].is_system_message);
    assert_eq!(net.seller.trades.started_by_peer(), vec![net.trade_id.clone()]);

    assert_eq!(record_count(&net.agent).await, 2);
    let agent_copy = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent_copy.state, DisputeState::New);

    // The agent acks the opening message, the seller acks the mirror's.
    assert!(
        eventually(move || async move {
            let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
            own.chat_thread[0].delivery.ack == AckState::Acked
        })
        .await
    );
    assert!(
        eventually(move || async move {
            let peer = net
                .agent
                .dispute_of(&net.trade_id, &net.seller.credential)
                .await
                .unwrap()
                .unwrap();
            peer.chat_thread[0].delivery.ack == AckState::Acked
        })
        .await
    );
    assert!(
        eventually(move || async move { !net.agent.handle.has_pending_messages().await.unwrap() })
            .await
    );
    net.shutdown().await;
}

#[tokio::test]
async fn second_open_for_the_same_trade_is_refused() {
    let net = &TestNetwork::start().await.unwrap();
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();

    let again = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await;
    assert_matches!(again, Err(DisputeError::AlreadyOpen { trade_id }) if trade_id == net.trade_id);
    assert_eq!(record_count(&net.buyer).await, 1);

    let reopen = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer).reopen())
        .await;
    assert_matches!(reopen, Err(DisputeError::AlreadyOpen { .. }));
    net.shutdown().await;
}

#[tokio::test]
async fn open_is_refused_when_the_agent_lacks_the_capability() {
    let net = &TestNetwork::start().await.unwrap();
    let ack_only: CapabilitySet = [Capability::AckMessage].into_iter().collect();
    net.network
        .set_capabilities(&net.agent.address, Some(ack_only));

    let result = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await;
    assert_matches!(
        result,
        Err(DisputeError::CapabilityUnsupported { capability, .. }) if capability == "Arbitration"
    );
    assert_eq!(record_count(&net.buyer).await, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(record_count(&net.agent).await, 0);
    net.shutdown().await;
}

#[tokio::test]
async fn delayed_mirror_result_reaches_the_opener() {
    let config = DisputeConfig {
        mirror_delay_ms: 50,
        ..DisputeConfig::immediate()
    };
    let net = &TestNetwork::with_config(config).await.unwrap();
    let ack_only: CapabilitySet = [Capability::AckMessage].into_iter().collect();
    net.network
        .set_capabilities(&net.seller.address, Some(ack_only));

    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    assert!(
        eventually(move || async move {
            let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
            matches!(
                &own.chat_thread[0].delivery.ack,
                AckState::Nacked { reason } if reason.contains("Arbitration")
            )
        })
        .await
    );
    assert_eq!(record_count(&net.seller).await, 0);
    net.shutdown().await;
}

#[tokio::test]
async fn both_traders_opening_yields_one_record_each() {
    let config = DisputeConfig {
        mirror_delay_ms: 50,
        ..DisputeConfig::immediate()
    };
    let net = &TestNetwork::with_config(config).await.unwrap();
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    net.seller
        .handle
        .open_dispute(net.open_request(Side::Seller))
        .await
        .unwrap();

    assert!(eventually(move || async move { record_count(&net.agent).await == 2 }).await);
    // Let both delayed mirrors run; each finds the counterparty record already there.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(record_count(&net.agent).await, 2);
    assert_eq!(record_count(&net.buyer).await, 1);
    assert_eq!(record_count(&net.seller).await, 1);
    assert!(net.buyer.trades.started_by_peer().is_empty());
    assert!(net.seller.trades.started_by_peer().is_empty());
    net.shutdown().await;
}

#[tokio::test]
async fn prior_mediator_summary_stays_with_the_agent() {
    let net = &TestNetwork::start().await.unwrap();
    net.buyer
        .handle
        .open_dispute(
            net.open_request(Side::Buyer)
                .with_prior_mediator_summary("Mediator suggested a 50/50 split."),
        )
        .await
        .unwrap();

    assert!(eventually(move || async move { record_count(&net.seller).await == 1 }).await);
    let agent_copy = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();
    let note = agent_copy
        .chat_thread
        .iter()
        .find(|m| m.agent_only)
        .expect("agent-only note");
    assert!(note.text.contains("50/50"));

    let mirror = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert!(mirror.chat_thread.iter().all(|m| !m.agent_only));
    assert_eq!(mirror.prior_mediator_summary, None);
    net.shutdown().await;
}

#[tokio::test]
async fn closed_dispute_can_be_reopened_by_a_trader() {
    let net = &TestNetwork::start().await.unwrap();
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    assert!(eventually(move || async move { record_count(&net.seller).await == 1 }).await);

    let outcome = net
        .outcome(PayoutSuggestion::SellerGetsTradeAmount, Reason::PeerWasLate)
        .unwrap();
    net.agent
        .handle
        .resolve_trade(&net.trade_id, outcome, "No payment proof provided.")
        .await
        .unwrap();
    for side in [Side::Buyer, Side::Seller] {
        assert!(
            eventually(move || async move {
                let node = net.trader(side);
                node.own_dispute(&net.trade_id).await.unwrap().unwrap().is_closed()
            })
            .await
        );
    }

    let reopened = net
        .buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer).reopen())
        .await
        .unwrap();
    assert_eq!(reopened.trade_id, net.trade_id);
    let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert_eq!(own.state, DisputeState::Reopened);

    for trader in [net.buyer.credential, net.seller.credential] {
        assert!(
            eventually(move || async move {
                let record = net.agent.dispute_of(&net.trade_id, &trader).await.unwrap().unwrap();
                record.state == DisputeState::Reopened
            })
            .await
        );
    }
    assert!(
        eventually(move || async move {
            let mirror = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
            mirror.state == DisputeState::Reopened
        })
        .await
    );
    assert_eq!(record_count(&net.agent).await, 2);
    net.shutdown().await;
}
