//! Chat relay, resolution delivery and payout publication

#![allow(clippy::unwrap_used, clippy::expect_used)]

use arbiter_core::{
    AckState, ChatMessage, ChatRelay, DisputeState, Envelope, MessageUid, PayoutSuggestion,
    Reason, ResolutionDelivered, ResolutionOutcome, Side, SupportKind,
};
use arbiter_dispute::{DisputeError, ReceiveOutcome, ValidationError};
use arbiter_testkit::{eventually, fixtures, TestNetwork, START_MS};
use assert_matches::assert_matches;
use std::time::Duration;
use uuid::Uuid;

fn uid(n: u128) -> MessageUid {
    MessageUid::from_uuid(Uuid::from_u128(n))
}

/// Buyer opens and the mirror reaches the seller
async fn opened(net: &TestNetwork) {
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    assert!(
        eventually(move || async move {
            net.seller.own_dispute(&net.trade_id).await.unwrap().is_some()
        })
        .await
    );
}

/// Agent resolves the trade and both traders close their records
async fn resolved(net: &TestNetwork, outcome: ResolutionOutcome) {
    net.agent
        .handle
        .resolve_trade(
            &net.trade_id,
            outcome,
            "Bank statement confirms the payment.",
        )
        .await
        .unwrap();
    for side in [Side::Buyer, Side::Seller] {
        assert!(
            eventually(move || async move {
                let record = net.trader(side).own_dispute(&net.trade_id).await.unwrap().unwrap();
                record.is_closed()
            })
            .await
        );
    }
}

#[tokio::test]
async fn chat_reaches_the_agent_once() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();

    let message = ChatMessage::new(
        uid(0xC1),
        net.trade_id.clone(),
        net.buyer.credential,
        net.buyer.credential,
        true,
        "Here is my payment receipt.",
        START_MS,
    );
    let first = net
        .buyer
        .handle
        .submit_chat_message(&own.id, message.clone())
        .await
        .unwrap();
    let mut sent = first.expect("new message is relayed");
    assert_eq!(sent.uid, uid(0xC1));
    sent.settled().await;
    let second = net
        .buyer
        .handle
        .submit_chat_message(&own.id, message.clone())
        .await
        .unwrap();
    assert!(second.is_none());

    let has_message = move || async move {
        let record = net
            .agent
            .dispute_of(&net.trade_id, &net.buyer.credential)
            .await
            .unwrap()
            .unwrap();
        record.chat_thread.iter().filter(|m| m.uid == uid(0xC1)).count()
    };
    assert!(eventually(move || async move { has_message().await == 1 }).await);

    // A redelivered relay is acknowledged but not stored again.
    let relay = Envelope::ChatRelay(ChatRelay {
        message,
        sender_addr: net.buyer.address.clone(),
        support_kind: SupportKind::Arbitration,
        uid: uid(0xE1),
    });
    let outcome = net.agent.handle.receive(relay, &net.buyer.address).await.unwrap();
    assert_eq!(outcome, ReceiveOutcome::Duplicate);
    assert_eq!(has_message().await, 1);

    assert!(
        eventually(move || async move {
            let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
            own.chat_message(&uid(0xC1)).unwrap().delivery.ack == AckState::Acked
        })
        .await
    );
    net.shutdown().await;
}

#[tokio::test]
async fn agent_chat_reaches_the_counterparty() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let seller_record = net
        .agent
        .dispute_of(&net.trade_id, &net.seller.credential)
        .await
        .unwrap()
        .unwrap();

    let sent = net
        .agent
        .handle
        .append_chat_message(&seller_record.id, "Please upload your account statement.")
        .await
        .unwrap();
    let sent_uid = sent.uid;
    assert!(
        eventually(move || async move {
            let own = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
            own.has_chat_message(&sent_uid)
        })
        .await
    );
    let own = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
    let received = own.chat_message(&sent_uid).unwrap();
    assert!(!received.sender_is_trader);
    assert_eq!(received.sender_identity, net.agent.credential);
    assert_eq!(own.unread_count(), own.chat_thread.len());

    net.seller.handle.mark_seen(&own.id).await.unwrap();
    let own = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert_eq!(own.state, DisputeState::Open);
    net.shutdown().await;
}

#[tokio::test]
async fn message_for_another_trader_is_refused_before_storing() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let buyer_record = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();

    let misaddressed = ChatMessage::new(
        uid(0xC7),
        net.trade_id.clone(),
        net.seller.credential,
        net.agent.credential,
        false,
        "Meant for the seller's thread.",
        START_MS,
    );
    assert_matches!(
        net.agent
            .handle
            .submit_chat_message(&buyer_record.id, misaddressed)
            .await,
        Err(DisputeError::Core(_))
    );

    let after = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();
    assert!(!after.has_chat_message(&uid(0xC7)));
    assert_eq!(after.chat_thread.len(), buyer_record.chat_thread.len());
    net.shutdown().await;
}

#[tokio::test]
async fn role_restricted_operations_are_refused() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
    let outcome = net
        .outcome(
            PayoutSuggestion::BuyerGetsTradeAmount,
            Reason::SellerNotResponding,
        )
        .unwrap();

    assert_matches!(
        net.buyer.handle.resolve(&own.id, outcome.clone(), "mine").await,
        Err(DisputeError::NotAgent)
    );
    assert_matches!(
        net.buyer.handle.resolve_trade(&net.trade_id, outcome, "mine").await,
        Err(DisputeError::NotAgent)
    );
    assert_matches!(
        net.agent.handle.open_dispute(net.open_request(Side::Buyer)).await,
        Err(DisputeError::NotTrader)
    );
    net.shutdown().await;
}

#[tokio::test]
async fn resolution_closes_both_records_and_the_winner_publishes() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let mut open_count = net.buyer.handle.open_dispute_count();
    assert_eq!(*open_count.borrow_and_update(), 1);

    let outcome = net
        .outcome(
            PayoutSuggestion::BuyerGetsTradeAmount,
            Reason::SellerNotResponding,
        )
        .unwrap();
    resolved(net, outcome.clone()).await;

    for side in [Side::Buyer, Side::Seller] {
        let node = net.trader(side);
        let record = node.own_dispute(&net.trade_id).await.unwrap().unwrap();
        let resolution = record.resolution.expect("resolution stored");
        assert_eq!(resolution.outcome, outcome);
        assert!(resolution.verify(&net.agent.credential).is_ok());
        assert!(record
            .chat_thread
            .iter()
            .any(|m| m.text == "Bank statement confirms the payment."));
        assert_eq!(node.trades.closed(), vec![net.trade_id.clone()]);
    }
    assert_eq!(*open_count.borrow_and_update(), 0);

    // The buyer is the winner and publishes; the seller is told the tx ref.
    assert!(eventually(move || async move { !net.buyer.wallet.published().is_empty() }).await);
    assert_eq!(
        net.buyer.wallet.published(),
        vec![(net.trade_id.clone(), outcome.buyer_payout, outcome.seller_payout)]
    );
    assert!(net.seller.wallet.published().is_empty());
    let expected_ref = format!("payout-{}", net.trade_id);
    let expected_ref = expected_ref.as_str();
    assert!(
        eventually(move || async move {
            let record = net.seller.own_dispute(&net.trade_id).await.unwrap().unwrap();
            record.dispute_payout_tx_ref.as_deref() == Some(expected_ref)
        })
        .await
    );
    net.shutdown().await;
}

#[tokio::test]
async fn redelivered_resolution_is_a_no_op() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let outcome = net
        .outcome(PayoutSuggestion::SellerGetsAll, Reason::WrongSenderAccount)
        .unwrap();
    resolved(net, outcome.clone()).await;
    assert!(eventually(move || async move { !net.seller.wallet.published().is_empty() }).await);

    let agent_copy = net
        .agent
        .dispute_of(&net.trade_id, &net.seller.credential)
        .await
        .unwrap()
        .unwrap();
    let resolution = agent_copy.resolution.clone().unwrap();
    let redelivered = Envelope::ResolutionDelivered(ResolutionDelivered {
        resolution,
        sender_addr: net.agent.address.clone(),
        support_kind: SupportKind::Arbitration,
        uid: uid(0xE2),
    });
    let outcome_again = net
        .seller
        .handle
        .receive(redelivered, &net.agent.address)
        .await
        .unwrap();
    assert_eq!(outcome_again, ReceiveOutcome::Duplicate);

    // Re-issuing the identical outcome re-sends it; a different one is refused.
    net.agent
        .handle
        .resolve(&agent_copy.id, outcome, "again")
        .await
        .unwrap();
    let other = net
        .outcome(PayoutSuggestion::BuyerGetsAll, Reason::WrongSenderAccount)
        .unwrap();
    assert_matches!(
        net.agent.handle.resolve(&agent_copy.id, other, "changed my mind").await,
        Err(DisputeError::AlreadyResolved { .. })
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.seller.wallet.published().len(), 1);
    assert_eq!(net.seller.trades.closed().len(), 1);
    net.shutdown().await;
}

#[tokio::test]
async fn tampered_resolution_is_rejected() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let outcome = net
        .outcome(PayoutSuggestion::BuyerGetsTradeAmount, Reason::BankProblems)
        .unwrap();
    let resolution = arbiter_core::Resolution::sign(outcome, &net.agent_key).unwrap();
    let mut tampered = resolution.clone();
    tampered.outcome.buyer_payout += 1;
    tampered.outcome.seller_payout -= 1;

    let envelope = Envelope::ResolutionDelivered(ResolutionDelivered {
        resolution: tampered,
        sender_addr: net.agent.address.clone(),
        support_kind: SupportKind::Arbitration,
        uid: uid(0xE3),
    });
    let outcome = net.buyer.handle.receive(envelope, &net.agent.address).await.unwrap();
    assert_matches!(outcome, ReceiveOutcome::Rejected(ValidationError::InvalidSignature { .. }));
    let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert!(!own.is_closed());
    assert!(own.resolution.is_none());
    net.shutdown().await;
}

#[tokio::test]
async fn invalid_outcomes_are_refused_before_signing() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let record = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();

    let legacy =
        fixtures::outcome(&net.trade_id, PayoutSuggestion::SellerGetsAll, Reason::Scam).unwrap();
    assert_matches!(
        net.agent.handle.resolve(&record.id, legacy, "scam").await,
        Err(DisputeError::InvalidResolution { .. })
    );

    let unbalanced = ResolutionOutcome {
        trade_id: net.trade_id.clone(),
        winner: None,
        reason: Reason::Other,
        buyer_payout: 1,
        seller_payout: 1,
        payout_suggestion: PayoutSuggestion::Custom,
        payout_adjustment_percent: None,
        is_loser_publisher: false,
        close_time: START_MS,
        summary_notes: None,
    };
    assert_matches!(
        net.agent.handle.resolve(&record.id, unbalanced, "split").await,
        Err(DisputeError::InvalidResolution { message }) if message.contains("escrowed total")
    );

    let record = net
        .agent
        .dispute_of(&net.trade_id, &net.buyer.credential)
        .await
        .unwrap()
        .unwrap();
    assert!(record.resolution.is_none());
    assert!(!record.is_closed());
    net.shutdown().await;
}

#[tokio::test]
async fn closed_dispute_refuses_new_chat() {
    let net = &TestNetwork::start().await.unwrap();
    opened(net).await;
    let outcome = net
        .outcome(
            PayoutSuggestion::BuyerGetsTradeAmount,
            Reason::SellerNotResponding,
        )
        .unwrap();
    resolved(net, outcome).await;

    let own = net.buyer.own_dispute(&net.trade_id).await.unwrap().unwrap();
    assert_matches!(
        net.buyer.handle.append_chat_message(&own.id, "One more thing").await,
        Err(DisputeError::Closed { dispute_id }) if dispute_id == own.id
    );
    net.shutdown().await;
}

#[tokio::test]
async fn resolution_arriving_before_the_mirror_is_deferred() {
    let net = &TestNetwork::start().await.unwrap();
    net.set_online(&net.seller.address, false);
    net.buyer
        .handle
        .open_dispute(net.open_request(Side::Buyer))
        .await
        .unwrap();
    assert!(
        eventually(move || async move { net.network.mailbox_len(&net.seller.address) == 1 }).await
    );

    let outcome = net
        .outcome(
            PayoutSuggestion::BuyerGetsTradeAmount,
            Reason::SellerNotResponding,
        )
        .unwrap();
    net.agent
        .handle
        .resolve_trade(
            &net.trade_id,
            outcome,
            "Resolved while the seller was away.",
        )
        .await
        .unwrap();
    let resolution = net
        .agent
        .dispute_of(&net.trade_id, &net.seller.credential)
        .await
        .unwrap()
        .unwrap()
        .resolution
        .unwrap();

    let early = Envelope::ResolutionDelivered(ResolutionDelivered {
        resolution,
        sender_addr: net.agent.address.clone(),
        support_kind: SupportKind::Arbitration,
        uid: uid(0xE4),
    });
    let outcome = net.seller.handle.receive(early, &net.agent.address).await.unwrap();
    assert_eq!(outcome, ReceiveOutcome::Deferred);
    assert!(net.seller.own_dispute(&net.trade_id).await.unwrap().is_none());

    net.set_online(&net.seller.address, true);
    assert!(
        eventually(move || async move {
            matches!(net.seller.own_dispute(&net.trade_id).await, Ok(Some(d)) if d.is_closed())
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(net.seller.trades.closed().len(), 1);
    net.shutdown().await;
}
