//! Identity and addressing types
//!
//! Credentials are opaque public-key identities used to address and verify
//! peers. Network addresses are opaque transport endpoints. Neither carries
//! mutable state.

use crate::errors::{ArbiterError, Result};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Public-key identity of a trader or agent
///
/// Wraps the raw 32 bytes of an ed25519 verifying key. Equality is byte
/// equality, which is what every role check in the protocol relies on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Credential(pub [u8; 32]);

impl Credential {
    /// Create from raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from an ed25519 verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    /// Parse the credential back into a verifying key
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|e| ArbiterError::crypto(format!("invalid credential key: {e}")))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short stable hash used when deriving dispute ids
    pub fn short_hash(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..6]))
    }
}

impl From<VerifyingKey> for Credential {
    fn from(key: VerifyingKey) -> Self {
        Self::from_verifying_key(&key)
    }
}

/// Opaque transport address of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkAddress(String);

impl NetworkAddress {
    /// Create a new network address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque trade identifier supplied by the trade lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(String);

impl TradeId {
    /// Create a new trade id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TradeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable external reference of a dispute record
///
/// Always `"{trade_id}_{trader_hash}"`, so both sides of the protocol can
/// derive it without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisputeId(String);

impl DisputeId {
    /// Derive the id for a trade and the trader the record belongs to
    pub fn derive(trade_id: &TradeId, trader: &Credential) -> Self {
        Self(format!("{}_{}", trade_id, trader.short_hash()))
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisputeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique message identifier
///
/// Used both for chat messages (de-duplication within a dispute) and for
/// protocol envelopes. The two namespaces never share values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageUid(pub Uuid);

impl MessageUid {
    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageUid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    #[test]
    fn dispute_id_is_stable_per_trader() {
        let a = Credential::from(SigningKey::from_bytes(&[1u8; 32]).verifying_key());
        let b = Credential::from(SigningKey::from_bytes(&[2u8; 32]).verifying_key());
        let trade = TradeId::new("T1");

        assert_eq!(DisputeId::derive(&trade, &a), DisputeId::derive(&trade, &a));
        assert_ne!(DisputeId::derive(&trade, &a), DisputeId::derive(&trade, &b));
        assert!(DisputeId::derive(&trade, &a).as_str().starts_with("T1_"));
    }

    #[test]
    fn credential_round_trips_through_verifying_key() {
        let key = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        let credential = Credential::from(key);
        assert_eq!(credential.verifying_key().ok(), Some(key));
    }
}
