//! Inbound envelope handling: open, mirror, chat relay and payout notices

use super::DisputeEngine;
use crate::errors::{DisputeError, DisputeResult, ReceiveOutcome, ValidationError};
use crate::list::DisputeKey;
use crate::runtime::Command;
use crate::validation;
use arbiter_core::{
    ChatMessage, ChatRelay, Credential, Dispute, DisputeState, Envelope, MessageUid,
    NetworkAddress, OpenDispute, PayoutPublished, PeerMirroredDispute, SourceKind, TradeId,
};

impl DisputeEngine {
    /// Apply one inbound envelope
    ///
    /// Never fails: problems are logged, answered with a negative ack where
    /// there is something to answer, and reported in the outcome.
    pub async fn receive(&mut self, envelope: Envelope, from: &NetworkAddress) -> ReceiveOutcome {
        if envelope.sender_addr() != from {
            let err = ValidationError::SenderAddressMismatch {
                expected: from.clone(),
                actual: envelope.sender_addr().clone(),
            };
            tracing::warn!(kind = envelope.kind_name(), error = %err, "envelope dropped");
            return ReceiveOutcome::Rejected(err);
        }
        tracing::debug!(
            kind = envelope.kind_name(),
            uid = %envelope.uid(),
            peer = %from,
            "envelope received"
        );

        match envelope {
            Envelope::OpenDispute(open) => self.receive_open(open).await,
            Envelope::PeerMirroredDispute(mirror) => self.receive_mirror(mirror).await,
            Envelope::ResolutionDelivered(delivered) => self.receive_resolution(delivered).await,
            Envelope::ChatRelay(relay) => self.receive_chat(relay).await,
            Envelope::PayoutPublished(published) => self.receive_payout_published(published).await,
            Envelope::GenericAck(ack) => self.receive_ack(ack),
        }
    }

    /// Nack, log and report a validation failure
    pub(super) async fn reject(
        &self,
        to: &NetworkAddress,
        credential: &Credential,
        kind: SourceKind,
        source_uid: Option<arbiter_core::MessageUid>,
        trade_id: &arbiter_core::TradeId,
        err: ValidationError,
    ) -> ReceiveOutcome {
        tracing::warn!(
            peer = %to,
            kind = %kind,
            trade_id = %trade_id,
            error = %err,
            "envelope rejected"
        );
        self.send_ack(
            to,
            credential,
            kind,
            source_uid,
            trade_id,
            Err(err.to_string()),
        )
        .await;
        ReceiveOutcome::Rejected(err)
    }

    async fn receive_open(&mut self, open: OpenDispute) -> ReceiveOutcome {
        let OpenDispute {
            dispute: incoming,
            sender_addr,
            ..
        } = open;
        let source_uid = incoming.opening_message_uid();
        let trader = incoming.trader_identity;

        if !self.identity.is_agent() {
            let err = ValidationError::WrongRole {
                kind: "OpenDispute",
                role: self.identity.role_name(),
            };
            return self
                .reject(
                    &sender_addr,
                    &trader,
                    SourceKind::OpenDispute,
                    source_uid,
                    &incoming.trade_id,
                    err,
                )
                .await;
        }
        if let Err(err) = validation::validate_open(
            &incoming,
            &sender_addr,
            &self.identity.credential,
            &self.list,
        ) {
            return self
                .reject(
                    &sender_addr,
                    &trader,
                    SourceKind::OpenDispute,
                    source_uid,
                    &incoming.trade_id,
                    err,
                )
                .await;
        }

        let key = DisputeKey::of(&incoming);
        let trade_id = incoming.trade_id.clone();
        let existing = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned();

        let reply = OpenerReply {
            to: sender_addr,
            credential: trader,
            source_uid,
            trade_id,
        };
        match existing {
            Some(local) if local.is_closed() && incoming.state == DisputeState::Reopened => {
                self.list.update(&key, |d| {
                    d.reopen();
                    merge_messages(d, &incoming.chat_thread);
                });
                tracing::info!(dispute_id = %local.id, "dispute reopened by trader");
                self.schedule_mirror(key, reply).await;
                ReceiveOutcome::Applied
            }
            Some(local) => {
                tracing::debug!(dispute_id = %local.id, "duplicate OpenDispute ignored");
                self.send_opener_ack(reply, Ok(())).await;
                ReceiveOutcome::Duplicate
            }
            None => {
                let mut dispute = incoming;
                if dispute.state != DisputeState::Reopened {
                    dispute.state = DisputeState::New;
                }
                if let Some(summary) = dispute.prior_mediator_summary.clone() {
                    let text = format!("{}\n{summary}", self.config.texts.prior_mediator_summary);
                    let note = self.system_message(&dispute, &text).await.agent_only();
                    dispute.add_chat_message(note);
                }
                tracing::info!(
                    dispute_id = %dispute.id,
                    trader = %dispute.trader_identity,
                    "dispute stored"
                );
                self.list.add(dispute);
                self.schedule_mirror(key, reply).await;
                ReceiveOutcome::Applied
            }
        }
    }

    /// Mirror now, or after the configured delay through the command queue
    ///
    /// The opener is acked only once the mirror has been attempted, so the
    /// ack carries its result either way.
    async fn schedule_mirror(&mut self, opener: DisputeKey, reply: OpenerReply) {
        let delay = self.config.mirror_delay();
        if delay.is_zero() {
            self.mirror_and_ack(opener, reply).await;
        } else {
            self.post_later(delay, Command::SendMirror { key: opener, reply });
        }
    }

    /// Send the mirror for `opener` and answer the opener with the result
    pub(crate) async fn mirror_and_ack(&mut self, opener: DisputeKey, reply: OpenerReply) {
        let result = self.send_mirror(&opener).await.map_err(|e| {
            tracing::error!(trade_id = %opener.trade_id, error = %e, "mirroring failed");
            e.to_string()
        });
        self.send_opener_ack(reply, result).await;
    }

    async fn send_opener_ack(&self, reply: OpenerReply, result: Result<(), String>) {
        self.send_ack(
            &reply.to,
            &reply.credential,
            SourceKind::OpenDispute,
            reply.source_uid,
            &reply.trade_id,
            result,
        )
        .await;
    }

    /// Build or reopen the counterparty's record and send it
    async fn send_mirror(&mut self, opener: &DisputeKey) -> DisputeResult<()> {
        let source = self
            .list
            .find_by_trade_and_trader(&opener.trade_id, &opener.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(&opener.trade_id))?;
        let mirror = source.mirror()?;
        let key = DisputeKey::of(&mirror);
        let existing = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned();

        let chat_uid = match existing {
            Some(peer) if source.state == DisputeState::Reopened && peer.is_closed() => {
                let message = self.system_message(&peer, &self.config.texts.reopened).await;
                let uid = message.uid;
                self.list.update(&key, |d| {
                    d.reopen();
                    d.add_chat_message(message);
                });
                uid
            }
            Some(peer) => {
                tracing::debug!(
                    dispute_id = %peer.id,
                    "counterparty record exists; mirror skipped"
                );
                return Ok(());
            }
            None => {
                let mut mirror = mirror;
                let message = self.system_message(&mirror, &self.config.texts.peer_opened).await;
                let uid = message.uid;
                mirror.add_chat_message(message);
                tracing::info!(
                    dispute_id = %mirror.id,
                    trader = %mirror.trader_identity,
                    "mirror stored"
                );
                self.list.add(mirror);
                uid
            }
        };

        let peer_record = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(&key.trade_id))?;
        let party = peer_record.trader_party().clone();
        let envelope = Envelope::PeerMirroredDispute(PeerMirroredDispute {
            dispute: peer_record.for_wire(),
            sender_addr: self.identity.address.clone(),
            support_kind: peer_record.support_kind,
            uid: self.new_uid().await,
        });
        self.dispatch(envelope, &party.address, &party.credential, Some(chat_uid))
            .await
    }

    async fn receive_mirror(&mut self, mirror: PeerMirroredDispute) -> ReceiveOutcome {
        let PeerMirroredDispute {
            dispute: incoming,
            sender_addr,
            ..
        } = mirror;
        let source_uid = incoming.opening_message_uid();
        let agent = incoming.agent_identity;
        let trade_id = incoming.trade_id.clone();

        if self.identity.is_agent() {
            let err = ValidationError::WrongRole {
                kind: "PeerMirroredDispute",
                role: self.identity.role_name(),
            };
            return self
                .reject(
                    &sender_addr,
                    &agent,
                    SourceKind::PeerMirroredDispute,
                    source_uid,
                    &trade_id,
                    err,
                )
                .await;
        }
        if let Err(err) =
            validation::validate_mirror(&incoming, &sender_addr, &self.identity.credential)
        {
            return self
                .reject(
                    &sender_addr,
                    &agent,
                    SourceKind::PeerMirroredDispute,
                    source_uid,
                    &trade_id,
                    err,
                )
                .await;
        }

        let key = DisputeKey::of(&incoming);
        let existing = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned();
        let outcome = match existing {
            Some(local) if local.is_closed() && incoming.state == DisputeState::Reopened => {
                self.list.update(&key, |d| {
                    d.reopen();
                    merge_messages(d, &incoming.chat_thread);
                });
                tracing::info!(dispute_id = %local.id, "dispute reopened by peer");
                ReceiveOutcome::Applied
            }
            Some(local) => {
                tracing::debug!(dispute_id = %local.id, "duplicate PeerMirroredDispute ignored");
                ReceiveOutcome::Duplicate
            }
            None => {
                tracing::info!(dispute_id = %incoming.id, "peer opened a dispute");
                self.list.add(incoming);
                if let Some(trades) = &self.trades {
                    if let Err(err) = trades.dispute_started_by_peer(&trade_id).await {
                        tracing::error!(
                            trade_id = %trade_id,
                            error = %err,
                            "trade lifecycle update failed"
                        );
                    }
                }
                ReceiveOutcome::Applied
            }
        };

        self.send_ack(
            &sender_addr,
            &agent,
            SourceKind::PeerMirroredDispute,
            source_uid,
            &trade_id,
            Ok(()),
        )
        .await;
        if outcome == ReceiveOutcome::Applied {
            self.apply_deferred(&trade_id).await;
        }
        outcome
    }

    async fn receive_chat(&mut self, relay: ChatRelay) -> ReceiveOutcome {
        let ChatRelay {
            message,
            sender_addr,
            ..
        } = relay;
        let trade_id = message.trade_id.clone();
        let uid = message.uid;
        let trader = if self.identity.is_agent() {
            message.trader_identity
        } else {
            self.identity.credential
        };
        let key = DisputeKey::new(trade_id.clone(), trader);

        let Some(dispute) = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
        else {
            let err = ValidationError::UnknownDispute {
                trade_id: trade_id.clone(),
            };
            return self
                .reject(
                    &sender_addr,
                    &message.sender_identity,
                    SourceKind::ChatRelay,
                    Some(uid),
                    &trade_id,
                    err,
                )
                .await;
        };

        let (expected_addr, expected_sender) = if self.identity.is_agent() {
            (dispute.trader_party().address.clone(), dispute.trader_identity)
        } else {
            (dispute.agent_address.clone(), dispute.agent_identity)
        };
        let checked = validation::check_sender_address(&expected_addr, &sender_addr).and_then(|()| {
            if message.sender_identity == expected_sender
                && message.trader_identity == dispute.trader_identity
            {
                Ok(())
            } else {
                Err(ValidationError::TraderMismatch {
                    message: "chat message author is not a participant of this dispute".to_string(),
                })
            }
        });
        if let Err(err) = checked {
            return self
                .reject(
                    &sender_addr,
                    &expected_sender,
                    SourceKind::ChatRelay,
                    Some(uid),
                    &trade_id,
                    err,
                )
                .await;
        }

        let added = self
            .list
            .update(&key, |d| d.add_chat_message(incoming_message(message)))
            .unwrap_or(false);
        if added {
            tracing::info!(dispute_id = %dispute.id, uid = %uid, "chat message received");
        } else {
            tracing::debug!(dispute_id = %dispute.id, uid = %uid, "duplicate chat message ignored");
        }
        self.send_ack(
            &sender_addr,
            &expected_sender,
            SourceKind::ChatRelay,
            Some(uid),
            &trade_id,
            Ok(()),
        )
        .await;
        if added {
            ReceiveOutcome::Applied
        } else {
            ReceiveOutcome::Duplicate
        }
    }

    async fn receive_payout_published(&mut self, published: PayoutPublished) -> ReceiveOutcome {
        let PayoutPublished {
            trade_id,
            payout_tx_ref,
            sender_addr,
            uid,
            ..
        } = published;
        let key = self.my_key(&trade_id);
        let dispute = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned();

        let dispute = match dispute {
            Some(d) if !self.identity.is_agent() => d,
            _ => {
                let err = if self.identity.is_agent() {
                    ValidationError::WrongRole {
                        kind: "PayoutPublished",
                        role: self.identity.role_name(),
                    }
                } else {
                    ValidationError::UnknownDispute {
                        trade_id: trade_id.clone(),
                    }
                };
                tracing::warn!(
                    peer = %sender_addr,
                    trade_id = %trade_id,
                    error = %err,
                    "PayoutPublished dropped"
                );
                return ReceiveOutcome::Rejected(err);
            }
        };

        let counterparty = dispute.counterparty().clone();
        if let Err(err) = validation::check_sender_address(&counterparty.address, &sender_addr) {
            return self
                .reject(
                    &sender_addr,
                    &counterparty.credential,
                    SourceKind::PayoutPublished,
                    Some(uid),
                    &trade_id,
                    err,
                )
                .await;
        }

        let outcome = if dispute.dispute_payout_tx_ref.as_deref() == Some(payout_tx_ref.as_str()) {
            tracing::debug!(dispute_id = %dispute.id, "duplicate PayoutPublished ignored");
            ReceiveOutcome::Duplicate
        } else {
            tracing::info!(
                dispute_id = %dispute.id,
                payout_tx = %payout_tx_ref,
                "peer published dispute payout"
            );
            self.list.update(&key, |d| d.dispute_payout_tx_ref = Some(payout_tx_ref));
            ReceiveOutcome::Applied
        };
        self.send_ack(
            &sender_addr,
            &counterparty.credential,
            SourceKind::PayoutPublished,
            Some(uid),
            &trade_id,
            Ok(()),
        )
        .await;
        outcome
    }
}

/// Ack owed to a trader whose `OpenDispute` is being mirrored
#[derive(Debug, Clone)]
pub(crate) struct OpenerReply {
    to: NetworkAddress,
    credential: Credential,
    source_uid: Option<MessageUid>,
    trade_id: TradeId,
}

/// Reset local-only state on a message received from a peer
fn incoming_message(message: ChatMessage) -> ChatMessage {
    message.for_wire()
}

/// Append every message of `thread` not yet in `dispute`
pub(super) fn merge_messages(dispute: &mut Dispute, thread: &[ChatMessage]) -> usize {
    thread
        .iter()
        .filter(|m| dispute.add_chat_message(incoming_message((*m).clone())))
        .count()
}
