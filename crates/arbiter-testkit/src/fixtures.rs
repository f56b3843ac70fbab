//! Deterministic keys, parties and contracts

use crate::harness::START_MS;
use arbiter_core::{
    ContractSnapshot, Credential, EscrowAmounts, NetworkAddress, Party, PayoutSuggestion, Reason,
    ResolutionOutcome, Side, TradeId,
};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

/// Signing key derived from a seed string
pub fn signing_key(seed: &str) -> SigningKey {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    SigningKey::from_bytes(&digest)
}

/// Credential derived from a seed string
pub fn credential(seed: &str) -> Credential {
    Credential::from(signing_key(seed).verifying_key())
}

/// Party whose key and address both derive from `name`
pub fn party(name: &str) -> Party {
    Party {
        credential: credential(name),
        address: NetworkAddress::new(format!("{name}.onion:9999")),
    }
}

/// Escrow amounts used throughout the tests: 1 BTC trade, 15% deposits
pub fn amounts() -> EscrowAmounts {
    EscrowAmounts {
        trade_amount: 100_000_000,
        buyer_deposit: 15_000_000,
        seller_deposit: 15_000_000,
    }
}

/// Contract between `buyer` and `seller`, signed by both
///
/// The JSON embeds the trade id so each trade gets a distinct hash.
pub fn contract(trade_id: &TradeId, buyer: &str, seller: &str, maker: Side) -> ContractSnapshot {
    let buyer_party = party(buyer);
    let seller_party = party(seller);
    let amounts = amounts();
    let json = serde_json::json!({
        "trade_id": trade_id.as_str(),
        "buyer": buyer_party.credential.to_string(),
        "seller": seller_party.credential.to_string(),
        "trade_amount": amounts.trade_amount,
        "buyer_deposit": amounts.buyer_deposit,
        "seller_deposit": amounts.seller_deposit,
        "maker_is_buyer": maker == Side::Buyer,
    })
    .to_string();

    let (maker_name, taker_name) = match maker {
        Side::Buyer => (buyer, seller),
        Side::Seller => (seller, buyer),
    };
    let maker_signature = signing_key(maker_name).sign(json.as_bytes()).to_bytes().to_vec();
    let taker_signature = signing_key(taker_name).sign(json.as_bytes()).to_bytes().to_vec();

    ContractSnapshot::new(
        json,
        buyer_party,
        seller_party,
        amounts,
        maker == Side::Buyer,
        maker_signature,
        taker_signature,
    )
}

/// Canonical outcome over [`amounts`], closed at the start of the test clock
pub fn outcome(
    trade_id: &TradeId,
    suggestion: PayoutSuggestion,
    reason: Reason,
) -> arbiter_core::Result<ResolutionOutcome> {
    ResolutionOutcome::from_suggestion(
        trade_id.clone(),
        suggestion,
        reason,
        &amounts(),
        0,
        START_MS,
    )
}
