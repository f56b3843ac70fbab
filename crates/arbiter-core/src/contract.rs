//! Escrow contract snapshot
//!
//! A dispute carries an immutable copy of the trade contract as it stood
//! when the dispute was opened. The engine only reads it: to find party
//! addresses, to check who is buyer or seller, and to learn the escrowed
//! total a resolution must conserve. Transaction bytes never appear here.

use crate::errors::{ArbiterError, Result};
use crate::identifiers::{Credential, NetworkAddress};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Buyer or seller side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Party paying fiat and receiving the asset
    Buyer,
    /// Party delivering the asset
    Seller,
}

impl Side {
    /// The other side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buyer => Side::Seller,
            Side::Seller => Side::Buyer,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buyer => write!(f, "buyer"),
            Side::Seller => write!(f, "seller"),
        }
    }
}

/// One trade counterparty as recorded in the contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Public-key identity
    pub credential: Credential,
    /// Address the party was reachable at when the contract was signed
    pub address: NetworkAddress,
}

/// Amounts locked in the escrow, in the smallest currency unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAmounts {
    /// Traded amount
    pub trade_amount: u64,
    /// Security deposit posted by the buyer
    pub buyer_deposit: u64,
    /// Security deposit posted by the seller
    pub seller_deposit: u64,
}

impl EscrowAmounts {
    /// Total escrowed amount a payout must distribute
    pub fn total(&self) -> u64 {
        self.trade_amount
            .saturating_add(self.buyer_deposit)
            .saturating_add(self.seller_deposit)
    }
}

/// Opaque escrow reference supplied by the wallet layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowContractRef {
    /// Hex sha256 of the canonical contract text
    pub contract_hash: String,
    /// Buyer party
    pub buyer: Party,
    /// Seller party
    pub seller: Party,
    /// Escrowed amounts
    pub amounts: EscrowAmounts,
}

/// Immutable contract copy attached to a dispute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    /// Escrow reference (hash, parties, amounts)
    pub escrow: EscrowContractRef,
    /// Canonical contract text the hash was computed over
    pub contract_json: String,
    /// Maker's signature over the contract text
    pub maker_signature: Vec<u8>,
    /// Taker's signature over the contract text
    pub taker_signature: Vec<u8>,
    /// Whether the offer maker is the buyer
    pub maker_is_buyer: bool,
}

/// Hex sha256 of a contract text
pub fn contract_hash(contract_json: &str) -> String {
    hex::encode(Sha256::digest(contract_json.as_bytes()))
}

impl ContractSnapshot {
    /// Build a snapshot, computing the contract hash from the text
    pub fn new(
        contract_json: impl Into<String>,
        buyer: Party,
        seller: Party,
        amounts: EscrowAmounts,
        maker_is_buyer: bool,
        maker_signature: Vec<u8>,
        taker_signature: Vec<u8>,
    ) -> Self {
        let contract_json = contract_json.into();
        Self {
            escrow: EscrowContractRef {
                contract_hash: contract_hash(&contract_json),
                buyer,
                seller,
                amounts,
            },
            contract_json,
            maker_signature,
            taker_signature,
            maker_is_buyer,
        }
    }

    /// Contract hash carried by the escrow reference
    pub fn hash(&self) -> &str {
        &self.escrow.contract_hash
    }

    /// Check the stored hash against the contract text
    pub fn verify_hash(&self) -> Result<()> {
        let computed = contract_hash(&self.contract_json);
        if computed == self.escrow.contract_hash {
            Ok(())
        } else {
            Err(ArbiterError::invalid(format!(
                "contract hash mismatch: stored {}, computed {computed}",
                self.escrow.contract_hash
            )))
        }
    }

    /// Party on the given side
    pub fn party(&self, side: Side) -> &Party {
        match side {
            Side::Buyer => &self.escrow.buyer,
            Side::Seller => &self.escrow.seller,
        }
    }

    /// Which side a credential is on, if it is a party at all
    pub fn side_of(&self, credential: &Credential) -> Option<Side> {
        if self.escrow.buyer.credential == *credential {
            Some(Side::Buyer)
        } else if self.escrow.seller.credential == *credential {
            Some(Side::Seller)
        } else {
            None
        }
    }

    /// Whether the party on `side` is the offer maker
    pub fn is_maker(&self, side: Side) -> bool {
        (side == Side::Buyer) == self.maker_is_buyer
    }

    /// Total escrowed amount
    pub fn total_escrowed(&self) -> u64 {
        self.escrow.amounts.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(byte: u8, addr: &str) -> Party {
        Party {
            credential: Credential::from_bytes([byte; 32]),
            address: NetworkAddress::new(addr),
        }
    }

    fn snapshot() -> ContractSnapshot {
        ContractSnapshot::new(
            r#"{"trade":"T1"}"#,
            party(1, "buyer.onion"),
            party(2, "seller.onion"),
            EscrowAmounts {
                trade_amount: 100_000,
                buyer_deposit: 15_000,
                seller_deposit: 15_000,
            },
            true,
            vec![1],
            vec![2],
        )
    }

    #[test]
    fn hash_verifies_until_text_is_tampered() {
        let mut contract = snapshot();
        assert!(contract.verify_hash().is_ok());
        contract.contract_json.push(' ');
        assert!(contract.verify_hash().is_err());
    }

    #[test]
    fn sides_and_makers_resolve_from_credentials() {
        let contract = snapshot();
        assert_eq!(
            contract.side_of(&Credential::from_bytes([2; 32])),
            Some(Side::Seller)
        );
        assert_eq!(contract.side_of(&Credential::from_bytes([9; 32])), None);
        assert!(contract.is_maker(Side::Buyer));
        assert!(!contract.is_maker(Side::Seller));
        assert_eq!(contract.total_escrowed(), 130_000);
    }
}
