//! Transport reports, inbound acks and manual retry

use super::{ChatMessageRef, DisputeEngine};
use crate::errors::{DisputeError, DisputeResult, ReceiveOutcome};
use crate::list::DisputeKey;
use arbiter_core::{
    AckState, ChatMessage, ChatRelay, DeliveryState, DeliveryStatus, DeliveryTransitionError,
    DisputeId, Envelope, GenericAck, MessageUid, OpenDispute, Party, PeerMirroredDispute,
    Resolution, ResolutionDelivered, TradeId,
};
use arbiter_transport::DeliveryOutcome;

impl DisputeEngine {
    /// Apply a delivery transition to the chat message `uid` of `trade_id`
    ///
    /// Illegal transitions are logged and ignored; a late transport report
    /// must never undo an ack.
    pub(super) fn apply_delivery(
        &mut self,
        trade_id: &TradeId,
        uid: MessageUid,
        f: impl FnOnce(&mut DeliveryStatus) -> Result<(), DeliveryTransitionError>,
    ) -> bool {
        let Some(key) = self
            .list
            .for_trade(trade_id)
            .find(|d| d.has_chat_message(&uid))
            .map(DisputeKey::of)
        else {
            tracing::debug!(
                trade_id = %trade_id,
                uid = %uid,
                "delivery update for unknown message"
            );
            return false;
        };

        let status = self.list.update(&key, |d| {
            let message = d.chat_message_mut(&uid)?;
            if let Err(err) = f(&mut message.delivery) {
                tracing::debug!(uid = %uid, error = %err, "delivery transition ignored");
            }
            Some(message.delivery.clone())
        });

        match status.flatten() {
            Some(status) => {
                // A retry registers a fresh watch.
                let done = status.ack != AckState::Pending
                    || matches!(
                        status.state,
                        DeliveryState::StoredOffline | DeliveryState::Failed { .. }
                    );
                if let Some(watcher) = self.watchers.get(&uid) {
                    watcher.send_replace(status);
                    if done || watcher.receiver_count() == 0 {
                        self.watchers.remove(&uid);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Transport reported the outcome of a send
    pub(crate) fn handle_delivery_report(
        &mut self,
        envelope_uid: MessageUid,
        outcome: DeliveryOutcome,
    ) {
        let Some(sent) = self.in_flight.remove(&envelope_uid) else {
            return;
        };
        match &outcome {
            DeliveryOutcome::Arrived => {
                tracing::info!(
                    peer = %sent.peer,
                    kind = %sent.kind,
                    uid = %envelope_uid,
                    "envelope arrived"
                );
            }
            DeliveryOutcome::StoredOffline => {
                tracing::info!(
                    peer = %sent.peer,
                    kind = %sent.kind,
                    uid = %envelope_uid,
                    "peer offline; envelope stored in mailbox"
                );
            }
            DeliveryOutcome::Failed(reason) => {
                tracing::warn!(
                    peer = %sent.peer,
                    kind = %sent.kind,
                    uid = %envelope_uid,
                    %reason,
                    "envelope delivery failed"
                );
            }
        }
        let Some(chat_uid) = sent.chat_uid else {
            return;
        };
        self.apply_delivery(&sent.trade_id, chat_uid, |status| match outcome {
            DeliveryOutcome::Arrived => status.mark_arrived(),
            DeliveryOutcome::StoredOffline => status.mark_stored_offline(),
            DeliveryOutcome::Failed(reason) => status.mark_failed(reason),
        });
    }

    /// A remote engine acknowledged one of our envelopes
    pub(super) fn receive_ack(&mut self, ack: GenericAck) -> ReceiveOutcome {
        if !ack.success {
            tracing::warn!(
                peer = %ack.sender_addr,
                source = %ack.source_kind,
                trade_id = %ack.source_id,
                error = ack.error_message.as_deref().unwrap_or(""),
                "peer rejected envelope"
            );
        }
        let Some(uid) = ack.source_uid else {
            tracing::info!(
                source = %ack.source_kind,
                trade_id = %ack.source_id,
                "ack without source uid"
            );
            return ReceiveOutcome::Ignored;
        };
        let success = ack.success;
        let error_message = ack.error_message;
        let applied = self.apply_delivery(&ack.source_id, uid, |status| {
            status.apply_ack(success, error_message);
            Ok(())
        });
        if applied {
            tracing::debug!(uid = %uid, success, "ack applied");
            ReceiveOutcome::Applied
        } else {
            tracing::info!(uid = %uid, trade_id = %ack.source_id, "ack for unknown message");
            ReceiveOutcome::Ignored
        }
    }

    /// Re-send a message whose delivery failed
    ///
    /// The message keeps its uid; the carrying envelope gets a new one.
    pub async fn retry_message(
        &mut self,
        id: &DisputeId,
        uid: MessageUid,
    ) -> DisputeResult<ChatMessageRef> {
        let key = self.key_for_id(id)?;
        let dispute = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(id))?;
        let message = dispute
            .chat_message(&uid)
            .cloned()
            .ok_or_else(|| DisputeError::NotRetryable {
                message: format!("no message {uid} in dispute {id}"),
            })?;
        if message.sender_identity != self.identity.credential {
            return Err(DisputeError::NotRetryable {
                message: "only locally authored messages can be retried".to_string(),
            });
        }

        let mut retried = message.delivery.clone();
        retried.retry().map_err(|e| DisputeError::NotRetryable {
            message: e.to_string(),
        })?;
        self.list.update(&key, |d| {
            if let Some(m) = d.chat_message_mut(&uid) {
                m.delivery = retried.clone();
            }
        });
        let delivery = self.watch_delivery(&key, uid);

        let is_resolution_message = dispute
            .resolution
            .as_ref()
            .and_then(|r| r.chat_message.as_ref())
            .is_some_and(|m| m.uid == uid);
        let envelope_uid = self.new_uid().await;
        let support_kind = dispute.support_kind;
        let sender_addr = self.identity.address.clone();

        let (envelope, peer) = if self.identity.is_agent() {
            let peer = dispute.trader_party().clone();
            let envelope = if is_resolution_message {
                let resolution = dispute
                    .resolution
                    .clone()
                    .ok_or_else(|| DisputeError::not_found(&key.trade_id))?;
                Envelope::ResolutionDelivered(ResolutionDelivered {
                    resolution: Resolution {
                        chat_message: resolution.chat_message.as_ref().map(ChatMessage::for_wire),
                        ..resolution
                    },
                    sender_addr,
                    support_kind,
                    uid: envelope_uid,
                })
            } else if message.is_system_message {
                Envelope::PeerMirroredDispute(PeerMirroredDispute {
                    dispute: dispute.for_wire(),
                    sender_addr,
                    support_kind,
                    uid: envelope_uid,
                })
            } else {
                Envelope::ChatRelay(ChatRelay {
                    message: message.for_wire(),
                    sender_addr,
                    support_kind,
                    uid: envelope_uid,
                })
            };
            (envelope, peer)
        } else {
            let peer = Party {
                credential: dispute.agent_identity,
                address: dispute.agent_address.clone(),
            };
            let envelope = if message.is_system_message {
                Envelope::OpenDispute(OpenDispute {
                    dispute: dispute.for_wire(),
                    sender_addr,
                    support_kind,
                    uid: envelope_uid,
                })
            } else {
                Envelope::ChatRelay(ChatRelay {
                    message: message.for_wire(),
                    sender_addr,
                    support_kind,
                    uid: envelope_uid,
                })
            };
            (envelope, peer)
        };

        tracing::info!(
            dispute_id = %id,
            uid = %uid,
            kind = envelope.kind_name(),
            "retrying message"
        );
        self.dispatch(envelope, &peer.address, &peer.credential, Some(uid))
            .await?;
        Ok(ChatMessageRef {
            uid,
            dispute_id: dispute.id,
            delivery,
        })
    }
}
