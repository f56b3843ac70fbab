//! Observable, persisted dispute list
//!
//! One list per role-scoped store: the agent's list and a trader's list
//! are never shared. The engine is the only writer. After every committed
//! mutation the list requests persistence, notifies registered
//! [`DisputeListener`]s synchronously, and recomputes the open-dispute
//! count published on a `watch` channel.

use crate::errors::StoreError;
use crate::store::DisputeStore;
use arbiter_core::{Credential, Dispute, DisputeId, TradeId};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Uniqueness key of a dispute record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisputeKey {
    /// Trade id
    pub trade_id: TradeId,
    /// Trader the record belongs to
    pub trader: Credential,
}

impl DisputeKey {
    /// Key of a record
    pub fn of(dispute: &Dispute) -> Self {
        Self {
            trade_id: dispute.trade_id.clone(),
            trader: dispute.trader_identity,
        }
    }

    /// Key from parts
    pub fn new(trade_id: TradeId, trader: Credential) -> Self {
        Self { trade_id, trader }
    }
}

/// Change notifications emitted after committed mutations
pub trait DisputeListener: Send + Sync {
    /// A record was inserted
    fn on_dispute_added(&self, _dispute: &Dispute) {}

    /// A record was removed
    fn on_dispute_removed(&self, _dispute: &Dispute) {}

    /// A record transitioned to closed
    fn on_dispute_closed(&self, _dispute: &Dispute) {}
}

/// Result of [`DisputeList::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Inserted
    Added,
    /// A record with the same key already exists; nothing changed
    Duplicate,
}

/// Dispute collection owned by one engine
pub struct DisputeList {
    disputes: IndexMap<DisputeKey, Dispute>,
    store: Arc<dyn DisputeStore>,
    listeners: Vec<Arc<dyn DisputeListener>>,
    open_count: watch::Sender<usize>,
}

impl DisputeList {
    /// Empty list backed by `store`
    pub fn new(store: Arc<dyn DisputeStore>) -> Self {
        let (open_count, _) = watch::channel(0);
        Self {
            disputes: IndexMap::new(),
            store,
            listeners: Vec::new(),
            open_count,
        }
    }

    /// Load persisted records; duplicates in the file keep the first entry
    pub async fn load(&mut self) -> Result<usize, StoreError> {
        let stored = self.store.read_all().await?;
        for dispute in stored {
            let key = DisputeKey::of(&dispute);
            if self.disputes.contains_key(&key) {
                tracing::warn!(dispute_id = %dispute.id, "duplicate record in store ignored");
                continue;
            }
            self.disputes.insert(key, dispute);
        }
        self.publish_open_count();
        Ok(self.disputes.len())
    }

    /// Register a listener
    pub fn add_listener(&mut self, listener: Arc<dyn DisputeListener>) {
        self.listeners.push(listener);
    }

    /// Observe the number of disputes that are not closed
    pub fn subscribe_open_count(&self) -> watch::Receiver<usize> {
        self.open_count.subscribe()
    }

    /// Insert a record unless its `(trade_id, trader_identity)` exists
    pub fn add(&mut self, dispute: Dispute) -> AddOutcome {
        let key = DisputeKey::of(&dispute);
        if self.disputes.contains_key(&key) {
            return AddOutcome::Duplicate;
        }
        self.disputes.insert(key.clone(), dispute);
        self.commit();
        if let Some(added) = self.disputes.get(&key) {
            for listener in &self.listeners {
                listener.on_dispute_added(added);
            }
        }
        AddOutcome::Added
    }

    /// Remove a record
    pub fn remove(&mut self, key: &DisputeKey) -> Option<Dispute> {
        let removed = self.disputes.shift_remove(key)?;
        self.commit();
        for listener in &self.listeners {
            listener.on_dispute_removed(&removed);
        }
        Some(removed)
    }

    /// Mutate a record in place and commit
    ///
    /// Returns `None` if the record does not exist.
    pub fn update<R>(&mut self, key: &DisputeKey, f: impl FnOnce(&mut Dispute) -> R) -> Option<R> {
        let dispute = self.disputes.get_mut(key)?;
        let was_closed = dispute.is_closed();
        let result = f(dispute);
        let closed_now = !was_closed && dispute.is_closed();
        self.commit();
        if closed_now {
            if let Some(closed) = self.disputes.get(key) {
                for listener in &self.listeners {
                    listener.on_dispute_closed(closed);
                }
            }
        }
        Some(result)
    }

    /// Record for a trade and trader
    pub fn find_by_trade_and_trader(
        &self,
        trade_id: &TradeId,
        trader: &Credential,
    ) -> Option<&Dispute> {
        self.disputes
            .get(&DisputeKey::new(trade_id.clone(), *trader))
    }

    /// First record for a trade
    pub fn find_by_trade(&self, trade_id: &TradeId) -> Option<&Dispute> {
        self.disputes.values().find(|d| d.trade_id == *trade_id)
    }

    /// Record by its external id
    pub fn find_by_id(&self, id: &DisputeId) -> Option<&Dispute> {
        self.disputes.values().find(|d| d.id == *id)
    }

    /// Every record for a trade
    pub fn for_trade<'a>(
        &'a self,
        trade_id: &'a TradeId,
    ) -> impl Iterator<Item = &'a Dispute> + 'a {
        self.disputes.values().filter(move |d| d.trade_id == *trade_id)
    }

    /// Trade that already uses `contract_hash`, other than `trade_id`
    pub fn trade_using_contract_hash(
        &self,
        contract_hash: &str,
        trade_id: &TradeId,
    ) -> Option<TradeId> {
        self.disputes
            .values()
            .find(|d| d.contract.hash() == contract_hash && d.trade_id != *trade_id)
            .map(|d| d.trade_id.clone())
    }

    /// Whether a key is present
    pub fn contains(&self, key: &DisputeKey) -> bool {
        self.disputes.contains_key(key)
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Dispute> {
        self.disputes.values()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.disputes.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.disputes.is_empty()
    }

    /// Owned copy of every record
    pub fn snapshot(&self) -> Vec<Dispute> {
        self.disputes.values().cloned().collect()
    }

    /// Store backing this list
    pub fn store(&self) -> &Arc<dyn DisputeStore> {
        &self.store
    }

    fn commit(&self) {
        self.store.request_persistence(self.snapshot());
        self.publish_open_count();
    }

    fn publish_open_count(&self) {
        let open = self.disputes.values().filter(|d| !d.is_closed()).count();
        self.open_count.send_if_modified(|current| {
            if *current == open {
                false
            } else {
                *current = open;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use arbiter_core::{
        ContractSnapshot, DisputeParams, EscrowAmounts, NetworkAddress, Party, RoleFlags, Side,
        SupportKind,
    };
    use parking_lot::Mutex;

    fn dispute(trade: &str, trader: u8) -> Dispute {
        let contract = ContractSnapshot::new(
            trade,
            Party {
                credential: Credential::from_bytes([1; 32]),
                address: NetworkAddress::new("buyer"),
            },
            Party {
                credential: Credential::from_bytes([2; 32]),
                address: NetworkAddress::new("seller"),
            },
            EscrowAmounts {
                trade_amount: 1,
                buyer_deposit: 0,
                seller_deposit: 0,
            },
            true,
            Vec::new(),
            Vec::new(),
        );
        let side = if trader == 1 { Side::Buyer } else { Side::Seller };
        Dispute::new(DisputeParams {
            trade_id: TradeId::new(trade),
            trader_identity: Credential::from_bytes([trader; 32]),
            role_flags: RoleFlags::for_side(&contract, side),
            agent_identity: Credential::from_bytes([3; 32]),
            agent_address: NetworkAddress::new("agent"),
            contract,
            support_kind: SupportKind::Arbitration,
            opening_time: 0,
            trade_date: 0,
            trade_period_end: 0,
            deposit_tx_ref: None,
            payout_tx_ref: None,
            prior_mediator_summary: None,
        })
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DisputeListener for Recorder {
        fn on_dispute_added(&self, dispute: &Dispute) {
            self.0.lock().push(format!("added {}", dispute.trade_id));
        }
        fn on_dispute_removed(&self, dispute: &Dispute) {
            self.0.lock().push(format!("removed {}", dispute.trade_id));
        }
        fn on_dispute_closed(&self, dispute: &Dispute) {
            self.0.lock().push(format!("closed {}", dispute.trade_id));
        }
    }

    #[test]
    fn uniqueness_is_per_trade_and_trader() {
        let store = Arc::new(MemoryStore::new());
        let mut list = DisputeList::new(store.clone());
        assert_eq!(list.add(dispute("T1", 1)), AddOutcome::Added);
        assert_eq!(list.add(dispute("T1", 1)), AddOutcome::Duplicate);
        assert_eq!(list.add(dispute("T1", 2)), AddOutcome::Added);
        assert_eq!(list.len(), 2);
        assert_eq!(store.request_count(), 2);
        assert_eq!(store.saved().len(), 2);
        assert_eq!(
            list.find_by_trade(&TradeId::new("T1")).map(|d| d.trader_identity),
            Some(Credential::from_bytes([1; 32]))
        );
    }

    #[test]
    fn listeners_and_open_count_follow_mutations() {
        let recorder = Arc::new(Recorder::default());
        let mut list = DisputeList::new(Arc::new(MemoryStore::new()));
        list.add_listener(recorder.clone());
        let count = list.subscribe_open_count();

        list.add(dispute("T1", 1));
        list.add(dispute("T2", 1));
        assert_eq!(*count.borrow(), 2);

        let key = DisputeKey::new(TradeId::new("T1"), Credential::from_bytes([1; 32]));
        list.update(&key, Dispute::close);
        list.update(&key, Dispute::close);
        assert_eq!(*count.borrow(), 1);

        let removed = list.remove(&DisputeKey::new(
            TradeId::new("T2"),
            Credential::from_bytes([1; 32]),
        ));
        assert!(removed.is_some());
        assert_eq!(*count.borrow(), 0);

        assert_eq!(
            *recorder.0.lock(),
            vec!["added T1", "added T2", "closed T1", "removed T2"]
        );
    }

    #[tokio::test]
    async fn load_restores_persisted_records() {
        let store = Arc::new(MemoryStore::with_disputes(vec![dispute("T1", 1), dispute("T1", 1)]));
        let mut list = DisputeList::new(store);
        assert_eq!(list.load().await.unwrap(), 1);
        assert_eq!(*list.subscribe_open_count().borrow(), 1);
    }

    #[test]
    fn replayed_contract_hash_is_found() {
        let mut list = DisputeList::new(Arc::new(MemoryStore::new()));
        let mut other = dispute("T2", 1);
        other.contract = dispute("T1", 1).contract;
        list.add(other);
        let hash = dispute("T1", 1).contract.hash().to_string();
        assert_eq!(
            list.trade_using_contract_hash(&hash, &TradeId::new("T1")),
            Some(TradeId::new("T2"))
        );
        assert_eq!(list.trade_using_contract_hash(&hash, &TradeId::new("T2")), None);
    }
}
