//! Trader-side open and reopen

use super::{DisputeEngine, DisputeRef};
use crate::errors::{DisputeError, DisputeResult};
use crate::list::DisputeKey;
use crate::validation;
use arbiter_core::{
    Capability, ContractSnapshot, Credential, Dispute, DisputeParams, Envelope, NetworkAddress,
    OpenDispute, RoleFlags, TradeId,
};

/// Everything a trader supplies to open a dispute
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Trade under dispute
    pub trade_id: TradeId,
    /// Opener's role flags
    pub role_flags: RoleFlags,
    /// Contract snapshot
    pub contract: ContractSnapshot,
    /// Agent the dispute is addressed to
    pub agent_identity: Credential,
    /// Agent address
    pub agent_address: NetworkAddress,
    /// Reopen a closed dispute instead of failing
    pub reopen: bool,
    /// When the trade was taken
    pub trade_date: u64,
    /// End of the trade period
    pub trade_period_end: u64,
    /// Deposit transaction reference
    pub deposit_tx_ref: Option<String>,
    /// Delayed payout transaction reference
    pub payout_tx_ref: Option<String>,
    /// Summary carried over from a prior mediation
    pub prior_mediator_summary: Option<String>,
}

impl OpenRequest {
    /// Request with no timing or transaction metadata
    pub fn new(
        trade_id: TradeId,
        role_flags: RoleFlags,
        contract: ContractSnapshot,
        agent_identity: Credential,
        agent_address: NetworkAddress,
    ) -> Self {
        Self {
            trade_id,
            role_flags,
            contract,
            agent_identity,
            agent_address,
            reopen: false,
            trade_date: 0,
            trade_period_end: 0,
            deposit_tx_ref: None,
            payout_tx_ref: None,
            prior_mediator_summary: None,
        }
    }

    /// Reopen the existing dispute for this trade
    pub fn reopen(mut self) -> Self {
        self.reopen = true;
        self
    }

    /// Attach the summary of a prior mediation
    pub fn with_prior_mediator_summary(mut self, summary: impl Into<String>) -> Self {
        self.prior_mediator_summary = Some(summary.into());
        self
    }

    /// Attach deposit and delayed payout references
    pub fn with_tx_refs(mut self, deposit: Option<String>, payout: Option<String>) -> Self {
        self.deposit_tx_ref = deposit;
        self.payout_tx_ref = payout;
        self
    }
}

impl DisputeEngine {
    /// Open, or with `reopen`, reopen a dispute and send it to the agent
    ///
    /// The record is stored before the send. Delivery is reported on the
    /// returned [`DisputeRef`]; a send that fails later leaves the record in
    /// place with its opening message marked failed so it can be retried.
    pub async fn open_dispute(&mut self, request: OpenRequest) -> DisputeResult<DisputeRef> {
        if self.identity.is_agent() {
            return Err(DisputeError::NotTrader);
        }
        let key = self.my_key(&request.trade_id);
        let existing = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned();
        if existing.is_some() && !request.reopen {
            return Err(DisputeError::AlreadyOpen {
                trade_id: request.trade_id,
            });
        }

        let support_kind = self.config.support_kind;
        self.check_capability(&request.agent_address, Capability::from(support_kind))
            .await?;

        let opening_uid = match existing {
            Some(dispute) if request.reopen => {
                if !dispute.is_closed() {
                    return Err(DisputeError::AlreadyOpen {
                        trade_id: request.trade_id,
                    });
                }
                let message = self.system_message(&dispute, &self.config.texts.reopened).await;
                let uid = message.uid;
                self.list.update(&key, |d| {
                    d.reopen();
                    d.add_chat_message(message);
                });
                tracing::info!(dispute_id = %dispute.id, "dispute reopened");
                uid
            }
            _ => {
                let mut dispute = Dispute::new(DisputeParams {
                    trade_id: request.trade_id.clone(),
                    trader_identity: self.identity.credential,
                    role_flags: request.role_flags,
                    agent_identity: request.agent_identity,
                    agent_address: request.agent_address.clone(),
                    contract: request.contract,
                    support_kind,
                    opening_time: self.now().await,
                    trade_date: request.trade_date,
                    trade_period_end: request.trade_period_end,
                    deposit_tx_ref: request.deposit_tx_ref,
                    payout_tx_ref: request.payout_tx_ref,
                    prior_mediator_summary: request.prior_mediator_summary,
                });
                validation::check_contract_hash(&dispute)?;
                validation::check_trader(&dispute)?;
                dispute.mark_seen();
                let message = self.system_message(&dispute, &self.config.texts.opened).await;
                let uid = message.uid;
                dispute.add_chat_message(message);
                tracing::info!(
                    dispute_id = %dispute.id,
                    agent = %dispute.agent_address,
                    "dispute opened"
                );
                self.list.add(dispute);
                uid
            }
        };

        let dispute_ref = self.dispute_ref(&key, opening_uid)?;
        self.send_open(&key).await?;
        self.apply_deferred(&key.trade_id).await;
        Ok(dispute_ref)
    }

    /// Send the local record to its agent
    async fn send_open(&mut self, key: &DisputeKey) -> DisputeResult<()> {
        let dispute = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(&key.trade_id))?;
        let envelope = Envelope::OpenDispute(OpenDispute {
            dispute: dispute.for_wire(),
            sender_addr: self.identity.address.clone(),
            support_kind: dispute.support_kind,
            uid: self.new_uid().await,
        });
        self.dispatch(
            envelope,
            &dispute.agent_address,
            &dispute.agent_identity,
            dispute.opening_message_uid(),
        )
        .await
    }
}
