//! Inbound envelope validation
//!
//! Pure checks over an envelope's payload and the local list. A failing
//! check drops the envelope and is answered with a negative ack.

use crate::errors::ValidationError;
use crate::list::{DisputeKey, DisputeList};
use arbiter_core::{Credential, Dispute, NetworkAddress, Resolution};

/// Envelope sender must be the expected party
pub fn check_sender_address(
    expected: &NetworkAddress,
    actual: &NetworkAddress,
) -> Result<(), ValidationError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ValidationError::SenderAddressMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        })
    }
}

/// Contract text must hash to the stored hash
pub fn check_contract_hash(dispute: &Dispute) -> Result<(), ValidationError> {
    dispute
        .contract
        .verify_hash()
        .map_err(|e| ValidationError::ContractHashMismatch {
            message: e.to_string(),
        })
}

/// Record's trader must be a contract party on the side its flags claim
pub fn check_trader(dispute: &Dispute) -> Result<(), ValidationError> {
    let side = dispute
        .contract
        .side_of(&dispute.trader_identity)
        .ok_or_else(|| ValidationError::TraderMismatch {
            message: format!("{} is not a contract party", dispute.trader_identity),
        })?;
    if side != dispute.trader_side || side != dispute.role_flags.side() {
        return Err(ValidationError::TraderMismatch {
            message: format!("contract says {side}, record says {}", dispute.trader_side),
        });
    }
    if dispute.role_flags.is_opener_maker != dispute.contract.is_maker(side) {
        return Err(ValidationError::TraderMismatch {
            message: "maker flag disagrees with contract".to_string(),
        });
    }
    Ok(())
}

/// Dispute must be addressed to this agent
pub fn check_agent(dispute: &Dispute, me: &Credential) -> Result<(), ValidationError> {
    if dispute.agent_identity == *me {
        Ok(())
    } else {
        Err(ValidationError::AgentMismatch)
    }
}

/// Records that may share a trade, deposit or delayed payout transaction
pub const MAX_DISPUTES_PER_REFERENCE: usize = 2;

/// Dispute must not replay another one
///
/// The contract hash must not belong to another trade. Counting `dispute`
/// itself, at most [`MAX_DISPUTES_PER_REFERENCE`] records may share its
/// trade id, its deposit transaction or its delayed payout transaction.
pub fn check_not_replayed(dispute: &Dispute, list: &DisputeList) -> Result<(), ValidationError> {
    let contract_hash = dispute.contract.hash();
    if let Some(other_trade) = list.trade_using_contract_hash(contract_hash, &dispute.trade_id) {
        return Err(ValidationError::ReplayedContract { other_trade });
    }

    let key = DisputeKey::of(dispute);
    let sharing = |same: &dyn Fn(&Dispute) -> bool| {
        1 + list
            .iter()
            .filter(|d| DisputeKey::of(d) != key && same(*d))
            .count()
    };
    let over = |count: usize, what: String| {
        if count > MAX_DISPUTES_PER_REFERENCE {
            Err(ValidationError::ReplayedDispute {
                message: format!("{count} disputes share {what}"),
            })
        } else {
            Ok(())
        }
    };

    over(
        sharing(&|d| d.trade_id == dispute.trade_id),
        format!("trade {}", dispute.trade_id),
    )?;
    if let Some(deposit) = &dispute.deposit_tx_ref {
        over(
            sharing(&|d| d.deposit_tx_ref.as_ref() == Some(deposit)),
            format!("deposit transaction {deposit}"),
        )?;
    }
    if let Some(payout) = &dispute.payout_tx_ref {
        over(
            sharing(&|d| d.payout_tx_ref.as_ref() == Some(payout)),
            format!("delayed payout transaction {payout}"),
        )?;
    }
    Ok(())
}

/// Every check an agent runs on an `OpenDispute`
pub fn validate_open(
    dispute: &Dispute,
    sender_addr: &NetworkAddress,
    me: &Credential,
    list: &DisputeList,
) -> Result<(), ValidationError> {
    check_contract_hash(dispute)?;
    check_trader(dispute)?;
    check_sender_address(&dispute.trader_party().address, sender_addr)?;
    check_agent(dispute, me)?;
    check_not_replayed(dispute, list)
}

/// Every check a trader runs on a `PeerMirroredDispute`
pub fn validate_mirror(
    dispute: &Dispute,
    sender_addr: &NetworkAddress,
    me: &Credential,
) -> Result<(), ValidationError> {
    check_contract_hash(dispute)?;
    check_trader(dispute)?;
    if dispute.trader_identity != *me {
        return Err(ValidationError::TraderMismatch {
            message: "mirror addressed to another trader".to_string(),
        });
    }
    check_sender_address(&dispute.agent_address, sender_addr)
}

/// Signature and payout checks a trader runs on a `ResolutionDelivered`
pub fn validate_resolution(
    resolution: &Resolution,
    dispute: &Dispute,
    sender_addr: &NetworkAddress,
) -> Result<(), ValidationError> {
    check_sender_address(&dispute.agent_address, sender_addr)?;
    resolution
        .verify(&dispute.agent_identity)
        .map_err(|e| ValidationError::InvalidSignature {
            message: e.to_string(),
        })?;
    check_payout(resolution, dispute)
}

/// Payouts must distribute exactly the escrowed total
pub fn check_payout(resolution: &Resolution, dispute: &Dispute) -> Result<(), ValidationError> {
    resolution
        .outcome
        .check_conservation(dispute.total_escrowed())
        .map_err(|e| ValidationError::PayoutMismatch {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use arbiter_core::{
        ContractSnapshot, DisputeParams, EscrowAmounts, Party, PayoutSuggestion, Reason,
        ResolutionOutcome, RoleFlags, Side, SupportKind, TradeId,
    };
    use ed25519_dalek::SigningKey;
    use std::sync::Arc;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn party(seed: u8, name: &str) -> Party {
        Party {
            credential: Credential::from(key(seed).verifying_key()),
            address: NetworkAddress::new(format!("{name}.onion:9999")),
        }
    }

    fn amounts() -> EscrowAmounts {
        EscrowAmounts {
            trade_amount: 1_000,
            buyer_deposit: 150,
            seller_deposit: 150,
        }
    }

    fn dispute(trade: &str, side: Side) -> Dispute {
        let contract = ContractSnapshot::new(
            format!("{{\"trade\":\"{trade}\"}}"),
            party(2, "buyer"),
            party(3, "seller"),
            amounts(),
            false,
            Vec::new(),
            Vec::new(),
        );
        let trader = contract.party(side).credential;
        Dispute::new(DisputeParams {
            trade_id: TradeId::new(trade),
            trader_identity: trader,
            role_flags: RoleFlags::for_side(&contract, side),
            agent_identity: Credential::from(key(1).verifying_key()),
            agent_address: NetworkAddress::new("agent.onion:9999"),
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

    #[test]
    fn open_from_the_recorded_trader_passes() {
        let list = DisputeList::new(Arc::new(MemoryStore::new()));
        let d = dispute("T1", Side::Buyer);
        let agent = Credential::from(key(1).verifying_key());
        assert_eq!(validate_open(&d, &party(2, "buyer").address, &agent, &list), Ok(()));
    }

    #[test]
    fn open_from_another_address_fails() {
        let list = DisputeList::new(Arc::new(MemoryStore::new()));
        let d = dispute("T1", Side::Buyer);
        let agent = Credential::from(key(1).verifying_key());
        let result = validate_open(&d, &party(3, "seller").address, &agent, &list);
        assert!(matches!(result, Err(ValidationError::SenderAddressMismatch { .. })));
    }

    #[test]
    fn open_for_another_agent_fails() {
        let list = DisputeList::new(Arc::new(MemoryStore::new()));
        let d = dispute("T1", Side::Buyer);
        let stranger = Credential::from(key(9).verifying_key());
        let result = validate_open(&d, &party(2, "buyer").address, &stranger, &list);
        assert_eq!(result, Err(ValidationError::AgentMismatch));
    }

    #[test]
    fn flags_must_match_the_contract() {
        let mut d = dispute("T1", Side::Seller);
        d.role_flags.is_opener_maker = !d.role_flags.is_opener_maker;
        assert!(matches!(check_trader(&d), Err(ValidationError::TraderMismatch { .. })));

        let mut outsider = dispute("T1", Side::Buyer);
        outsider.trader_identity = Credential::from(key(7).verifying_key());
        assert!(matches!(check_trader(&outsider), Err(ValidationError::TraderMismatch { .. })));
    }

    #[test]
    fn mirror_must_be_addressed_to_me() {
        let d = dispute("T1", Side::Seller);
        let agent_addr = NetworkAddress::new("agent.onion:9999");
        let me = party(3, "seller").credential;
        assert_eq!(validate_mirror(&d, &agent_addr, &me), Ok(()));
        let other = party(2, "buyer").credential;
        assert!(matches!(
            validate_mirror(&d, &agent_addr, &other),
            Err(ValidationError::TraderMismatch { .. })
        ));
    }

    #[test]
    fn resolution_signature_and_payout_are_checked() {
        let d = dispute("T1", Side::Buyer);
        let agent_addr = NetworkAddress::new("agent.onion:9999");
        let outcome = ResolutionOutcome::from_suggestion(
            TradeId::new("T1"),
            PayoutSuggestion::SellerGetsTradeAmount,
            Reason::BankProblems,
            &amounts(),
            0,
            0,
        )
        .unwrap();
        let signed = Resolution::sign(outcome.clone(), &key(1)).unwrap();
        assert_eq!(validate_resolution(&signed, &d, &agent_addr), Ok(()));

        let forged = Resolution::sign(outcome, &key(8)).unwrap();
        assert!(matches!(
            validate_resolution(&forged, &d, &agent_addr),
            Err(ValidationError::InvalidSignature { .. })
        ));

        let mut unbalanced = signed;
        unbalanced.outcome.buyer_payout += 10;
        assert!(matches!(
            check_payout(&unbalanced, &d),
            Err(ValidationError::PayoutMismatch { .. })
        ));
    }

    #[test]
    fn third_record_for_a_trade_is_a_replay() {
        let mut list = DisputeList::new(Arc::new(MemoryStore::new()));
        list.add(dispute("T1", Side::Buyer));
        list.add(dispute("T1", Side::Seller));

        let mut third = dispute("T1", Side::Buyer);
        third.trader_identity = party(9, "stranger").credential;
        assert!(matches!(
            check_not_replayed(&third, &list),
            Err(ValidationError::ReplayedDispute { .. })
        ));
        // A record already in the list is not counted twice.
        assert_eq!(check_not_replayed(&dispute("T1", Side::Seller), &list), Ok(()));
    }

    #[test]
    fn shared_transactions_are_limited_to_one_trade() {
        let with_txs = |trade: &str, side: Side, deposit: &str, payout: Option<&str>| {
            let mut d = dispute(trade, side);
            d.deposit_tx_ref = Some(deposit.to_string());
            d.payout_tx_ref = payout.map(str::to_string);
            d
        };
        let mut list = DisputeList::new(Arc::new(MemoryStore::new()));
        list.add(with_txs("T1", Side::Buyer, "dep-1", Some("dpt-1")));
        assert_eq!(
            check_not_replayed(&with_txs("T2", Side::Buyer, "dep-1", None), &list),
            Ok(())
        );

        list.add(with_txs("T1", Side::Seller, "dep-1", Some("dpt-1")));
        assert!(matches!(
            check_not_replayed(&with_txs("T2", Side::Buyer, "dep-1", None), &list),
            Err(ValidationError::ReplayedDispute { message }) if message.contains("deposit")
        ));
        assert!(matches!(
            check_not_replayed(&with_txs("T2", Side::Buyer, "dep-2", Some("dpt-1")), &list),
            Err(ValidationError::ReplayedDispute { message }) if message.contains("delayed payout")
        ));
        assert_eq!(
            check_not_replayed(&with_txs("T2", Side::Buyer, "dep-2", Some("dpt-2")), &list),
            Ok(())
        );
    }
}
