//! Chat append and relay

use super::{ChatMessageRef, DisputeEngine};
use crate::errors::{DisputeError, DisputeResult};
use arbiter_core::{ArbiterError, ChatMessage, ChatRelay, DisputeId, Envelope, Party};

impl DisputeEngine {
    /// Append a typed message to a dispute and relay it to the peer
    pub async fn append_chat_message(
        &mut self,
        id: &DisputeId,
        text: impl Into<String>,
    ) -> DisputeResult<ChatMessageRef> {
        let key = self.key_for_id(id)?;
        let message = ChatMessage::new(
            self.new_uid().await,
            key.trade_id.clone(),
            key.trader,
            self.identity.credential,
            !self.identity.is_agent(),
            text,
            self.now().await,
        );
        let uid = message.uid;
        self.submit_chat_message(id, message)
            .await?
            .ok_or_else(|| {
                DisputeError::Core(ArbiterError::internal(format!("message uid {uid} collided")))
            })
    }

    /// Append a prepared message and relay it
    ///
    /// Stored before the send is initiated. Returns `None` when the uid is
    /// already in the thread; nothing is sent in that case.
    pub async fn submit_chat_message(
        &mut self,
        id: &DisputeId,
        message: ChatMessage,
    ) -> DisputeResult<Option<ChatMessageRef>> {
        let key = self.key_for_id(id)?;
        let dispute = self
            .list
            .find_by_trade_and_trader(&key.trade_id, &key.trader)
            .cloned()
            .ok_or_else(|| DisputeError::not_found(id))?;

        if dispute.is_closed() {
            return Err(DisputeError::Closed {
                dispute_id: dispute.id,
            });
        }
        if !self.identity.is_agent() && dispute.trader_identity != self.identity.credential {
            return Err(DisputeError::NotTrader);
        }
        let belongs = message.sender_identity == self.identity.credential
            && message.trade_id == dispute.trade_id
            && message.trader_identity == dispute.trader_identity;
        if !belongs {
            return Err(DisputeError::Core(ArbiterError::invalid(
                "chat message does not belong to this node and dispute",
            )));
        }

        let uid = message.uid;
        let wire = message.for_wire();
        let added = self
            .list
            .update(&key, |d| {
                let mut local = message;
                local.was_displayed = true;
                d.add_chat_message(local)
            })
            .unwrap_or(false);
        if !added {
            tracing::debug!(dispute_id = %dispute.id, uid = %uid, "duplicate chat append ignored");
            return Ok(None);
        }

        let delivery = self.watch_delivery(&key, uid);
        let peer = if self.identity.is_agent() {
            dispute.trader_party().clone()
        } else {
            Party {
                credential: dispute.agent_identity,
                address: dispute.agent_address.clone(),
            }
        };
        let envelope = Envelope::ChatRelay(ChatRelay {
            message: wire,
            sender_addr: self.identity.address.clone(),
            support_kind: dispute.support_kind,
            uid: self.new_uid().await,
        });
        self.dispatch(envelope, &peer.address, &peer.credential, Some(uid))
            .await?;
        Ok(Some(ChatMessageRef {
            uid,
            dispute_id: dispute.id,
            delivery,
        }))
    }
}
