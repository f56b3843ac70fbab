//! Resolution issuance, application and payout publication

use super::{DisputeEngine, DisputeRef, NodeRole};
use crate::collaborators::WalletError;
use crate::errors::{DisputeError, DisputeResult, ReceiveOutcome, ValidationError};
use crate::list::DisputeKey;
use crate::runtime::Command;
use crate::validation;
use arbiter_core::{
    ChatMessage, DisputeId, DisputeState, Envelope, PayoutPublished, Resolution,
    ResolutionDelivered, ResolutionOutcome, SourceKind, TradeId,
};
use ed25519_dalek::SIGNATURE_LENGTH;

/// Distinct resolutions parked for one trade
pub const MAX_DEFERRED_PER_TRADE: usize = 2;
/// Trades that may have parked resolutions at once
pub const MAX_DEFERRED_TRADES: usize = 32;

impl DisputeEngine {
    /// Sign `outcome`, close the record and deliver it to the record's trader
    ///
    /// A record that already carries the identical outcome is re-sent; a
    /// different outcome is refused unless the dispute was reopened.
    pub async fn resolve(
        &mut self,
        id: &DisputeId,
        outcome: ResolutionOutcome,
        rationale: impl Into<String>,
    ) -> DisputeResult<DisputeRef> {
        let signing_key = match &self.identity.role {
            NodeRole::Agent { signing_key } => signing_key.clone(),
            NodeRole::Trader => return Err(DisputeError::NotAgent),
        };
        let key = self.key_for_id(id)?;
        let dispute = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(id))?;

        if outcome.reason.is_legacy() {
            return Err(DisputeError::InvalidResolution {
                message: format!("reason {:?} is no longer issued", outcome.reason),
            });
        }
        if outcome.trade_id != dispute.trade_id {
            return Err(DisputeError::InvalidResolution {
                message: format!(
                    "outcome is for trade {}, dispute is for {}",
                    outcome.trade_id, dispute.trade_id
                ),
            });
        }
        outcome
            .check_conservation(dispute.total_escrowed())
            .map_err(|e| DisputeError::InvalidResolution {
                message: e.to_string(),
            })?;

        let existing = dispute
            .resolution
            .clone()
            .filter(|_| dispute.state != DisputeState::Reopened);
        let resolution = match existing {
            Some(previous) if previous.outcome == outcome => {
                tracing::info!(dispute_id = %id, "re-sending identical resolution");
                previous
            }
            Some(_) => {
                return Err(DisputeError::AlreadyResolved {
                    dispute_id: id.clone(),
                })
            }
            None => {
                let message = ChatMessage::new(
                    self.new_uid().await,
                    dispute.trade_id.clone(),
                    dispute.trader_identity,
                    self.identity.credential,
                    false,
                    rationale,
                    self.now().await,
                );
                let resolution =
                    Resolution::sign(outcome, &signing_key)?.with_chat_message(message.clone());
                let stored = resolution.clone();
                self.list.update(&key, |d| {
                    d.add_chat_message(message);
                    d.resolution = Some(stored);
                    d.close();
                });
                tracing::info!(
                    dispute_id = %id,
                    winner = ?resolution.outcome.winner,
                    buyer_payout = resolution.outcome.buyer_payout,
                    seller_payout = resolution.outcome.seller_payout,
                    "dispute resolved"
                );
                resolution
            }
        };

        let chat_uid = resolution
            .chat_message
            .as_ref()
            .map(|m| m.uid)
            .ok_or_else(|| DisputeError::InvalidResolution {
                message: "resolution has no rationale message".to_string(),
            })?;
        let dispute_ref = self.dispute_ref(&key, chat_uid)?;
        let trader = dispute.trader_party().clone();
        let envelope = Envelope::ResolutionDelivered(ResolutionDelivered {
            resolution: Resolution {
                chat_message: resolution.chat_message.as_ref().map(ChatMessage::for_wire),
                ..resolution
            },
            sender_addr: self.identity.address.clone(),
            support_kind: dispute.support_kind,
            uid: self.new_uid().await,
        });
        self.dispatch(
            envelope,
            &trader.address,
            &trader.credential,
            Some(chat_uid),
        )
        .await?;
        Ok(dispute_ref)
    }

    /// Resolve every record the agent holds for a trade with one outcome
    pub async fn resolve_trade(
        &mut self,
        trade_id: &TradeId,
        outcome: ResolutionOutcome,
        rationale: impl Into<String>,
    ) -> DisputeResult<Vec<DisputeRef>> {
        if !self.identity.is_agent() {
            return Err(DisputeError::NotAgent);
        }
        let ids: Vec<DisputeId> = self.list.for_trade(trade_id).map(|d| d.id.clone()).collect();
        if ids.is_empty() {
            return Err(DisputeError::not_found(trade_id));
        }
        let rationale = rationale.into();
        let mut refs = Vec::with_capacity(ids.len());
        for id in &ids {
            refs.push(self.resolve(id, outcome.clone(), rationale.clone()).await?);
        }
        Ok(refs)
    }

    pub(super) async fn receive_resolution(
        &mut self,
        delivered: ResolutionDelivered,
    ) -> ReceiveOutcome {
        let trade_id = delivered.resolution.outcome.trade_id.clone();
        if self.identity.is_agent() {
            let err = ValidationError::WrongRole {
                kind: "ResolutionDelivered",
                role: self.identity.role_name(),
            };
            tracing::warn!(
                peer = %delivered.sender_addr,
                trade_id = %trade_id,
                error = %err,
                "ResolutionDelivered dropped"
            );
            return ReceiveOutcome::Rejected(err);
        }

        let key = self.my_key(&trade_id);
        let Some(dispute) = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
        else {
            return self.defer_resolution(delivered);
        };

        let ResolutionDelivered {
            resolution,
            sender_addr,
            uid,
            ..
        } = delivered;
        let source_uid = Some(resolution.chat_message.as_ref().map_or(uid, |m| m.uid));
        if let Err(err) = validation::validate_resolution(&resolution, &dispute, &sender_addr) {
            return self
                .reject(
                    &sender_addr,
                    &dispute.agent_identity,
                    SourceKind::ResolutionDelivered,
                    source_uid,
                    &trade_id,
                    err,
                )
                .await;
        }

        let duplicate = dispute.is_closed()
            && dispute
                .resolution
                .as_ref()
                .is_some_and(|r| r.same_decision(&resolution));
        if duplicate {
            tracing::debug!(dispute_id = %dispute.id, "duplicate resolution ignored");
            self.send_ack(
                &sender_addr,
                &dispute.agent_identity,
                SourceKind::ResolutionDelivered,
                source_uid,
                &trade_id,
                Ok(()),
            )
            .await;
            return ReceiveOutcome::Duplicate;
        }
        if dispute.resolution.is_some() {
            tracing::warn!(dispute_id = %dispute.id, "overwriting previous resolution");
        }

        self.list.update(&key, |d| {
            if let Some(message) = &resolution.chat_message {
                d.add_chat_message(message.for_wire());
            }
            d.resolution = Some(resolution);
            d.close();
        });
        tracing::info!(dispute_id = %dispute.id, "resolution applied; dispute closed");
        self.send_ack(
            &sender_addr,
            &dispute.agent_identity,
            SourceKind::ResolutionDelivered,
            source_uid,
            &trade_id,
            Ok(()),
        )
        .await;

        if let Some(trades) = &self.trades {
            if let Err(err) = trades.dispute_closed(&trade_id).await {
                tracing::error!(
                    trade_id = %trade_id,
                    error = %err,
                    "trade lifecycle update failed"
                );
            }
        }
        self.maybe_publish_payout(&key);
        ReceiveOutcome::Applied
    }

    /// Park a resolution until the mirror it refers to arrives
    ///
    /// Nothing can be verified before the dispute exists, so parking is
    /// bounded per trade and across trades, and a resolution already parked
    /// under the same signature is not stored twice.
    fn defer_resolution(&mut self, delivered: ResolutionDelivered) -> ReceiveOutcome {
        let trade_id = delivered.resolution.outcome.trade_id.clone();
        let signature = &delivered.resolution.agent_signature;
        if signature.len() != SIGNATURE_LENGTH {
            let err = ValidationError::InvalidSignature {
                message: format!("{} signature bytes", signature.len()),
            };
            tracing::warn!(
                peer = %delivered.sender_addr,
                trade_id = %trade_id,
                error = %err,
                "resolution for unknown dispute dropped"
            );
            return ReceiveOutcome::Rejected(err);
        }

        let parked_trades = self.deferred.len();
        let limit = match self.deferred.get(&trade_id) {
            Some(parked) if parked.iter().any(|p| &p.resolution.agent_signature == signature) => {
                tracing::debug!(trade_id = %trade_id, "resolution already deferred");
                return ReceiveOutcome::Deferred;
            }
            Some(parked) if parked.len() >= MAX_DEFERRED_PER_TRADE => {
                Some(format!("{MAX_DEFERRED_PER_TRADE} already parked for this trade"))
            }
            None if parked_trades >= MAX_DEFERRED_TRADES => {
                Some(format!("{MAX_DEFERRED_TRADES} trades already have parked resolutions"))
            }
            _ => None,
        };
        if let Some(message) = limit {
            let err = ValidationError::DeferredLimit {
                trade_id: trade_id.clone(),
                message,
            };
            tracing::warn!(
                peer = %delivered.sender_addr,
                trade_id = %trade_id,
                error = %err,
                "resolution for unknown dispute dropped"
            );
            return ReceiveOutcome::Rejected(err);
        }

        tracing::info!(trade_id = %trade_id, "resolution for unknown dispute deferred");
        self.deferred.entry(trade_id).or_default().push(delivered);
        ReceiveOutcome::Deferred
    }

    /// Apply resolutions that arrived before their dispute
    pub(super) async fn apply_deferred(&mut self, trade_id: &TradeId) {
        let Some(pending) = self.deferred.remove(trade_id) else {
            return;
        };
        for delivered in pending {
            let outcome = self.receive_resolution(delivered).await;
            tracing::info!(trade_id = %trade_id, ?outcome, "deferred resolution applied");
        }
    }

    /// Ask the wallet to publish the payout if this trader is the publisher
    fn maybe_publish_payout(&mut self, key: &DisputeKey) {
        let Some(wallet) = self.wallet.clone() else {
            return;
        };
        let Some(dispute) = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
        else {
            return;
        };
        let Some(outcome) = dispute.resolution.as_ref().map(|r| r.outcome.clone()) else {
            return;
        };
        if dispute.trader_side != outcome.publisher() {
            tracing::debug!(
                dispute_id = %dispute.id,
                publisher = %outcome.publisher(),
                "peer publishes the payout"
            );
            return;
        }
        if dispute.dispute_payout_tx_ref.is_some() || !self.publishing.insert(key.clone()) {
            return;
        }

        let commands = self.commands.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = wallet.publish_dispute_payout(&dispute, &outcome).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::PayoutResult { key, result }).await;
            }
        });
    }

    /// Record a wallet result and announce it to the other trader
    pub(crate) async fn handle_payout_result(
        &mut self,
        key: DisputeKey,
        result: Result<String, WalletError>,
    ) {
        self.publishing.remove(&key);
        let payout_tx_ref = match result {
            Ok(tx) => tx,
            Err(err) => {
                tracing::error!(
                    trade_id = %key.trade_id,
                    error = %err,
                    "payout publication failed"
                );
                return;
            }
        };
        let Some(dispute) = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
        else {
            return;
        };
        tracing::info!(
            dispute_id = %dispute.id,
            payout_tx = %payout_tx_ref,
            "dispute payout published"
        );
        self.list.update(&key, |d| {
            d.dispute_payout_tx_ref = Some(payout_tx_ref.clone());
        });

        let peer = dispute.counterparty().clone();
        let envelope = Envelope::PayoutPublished(PayoutPublished {
            trade_id: key.trade_id.clone(),
            payout_tx_ref,
            sender_addr: self.identity.address.clone(),
            support_kind: dispute.support_kind,
            uid: self.new_uid().await,
        });
        if let Err(err) = self.dispatch(envelope, &peer.address, &peer.credential, None).await {
            tracing::warn!(trade_id = %key.trade_id, error = %err, "payout notice not sent");
        }
    }
}
