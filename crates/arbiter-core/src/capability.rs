//! Peer capabilities
//!
//! A peer advertises the envelope families it can process. Senders consult
//! the advertised set before dispatching; an unknown set is treated as
//! permissive, a known set lacking the capability is a hard refusal.

use crate::dispute::SupportKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Feature flag a peer must support to receive certain envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Mediation disputes
    Mediation,
    /// Arbitration disputes
    Arbitration,
    /// Refund-agent disputes
    Refund,
    /// Generic acknowledgments
    AckMessage,
}

impl From<SupportKind> for Capability {
    fn from(kind: SupportKind) -> Self {
        match kind {
            SupportKind::Mediation => Capability::Mediation,
            SupportKind::Arbitration => Capability::Arbitration,
            SupportKind::Refund => Capability::Refund,
        }
    }
}

/// Set of capabilities advertised by a peer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability
    pub fn all() -> Self {
        [
            Capability::Mediation,
            Capability::Arbitration,
            Capability::Refund,
            Capability::AckMessage,
        ]
        .into_iter()
        .collect()
    }

    /// Whether `capability` is present
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Add a capability
    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
