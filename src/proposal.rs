//! Proposal selector: the "Proposal selector" component of `spec.md` §2
//! (~7% of the core) — intersects a remote proposal list with the local IKE
//! configuration under selection flags, returning a single chosen proposal
//! or none (`spec.md` §4.3).

use crate::payload::{Proposal, Transform, TransformType};

/// Transform IDs at or above this value are IANA "private use" — vendor or
/// experimental extensions rather than standardised algorithms. Mirrors the
/// `201..=255` / `241..=255` private-use bands the `ikebuster` parameter
/// enums reserve for each transform-id space; this task only needs a single
/// threshold since it treats private IDs uniformly regardless of transform
/// type.
pub const PRIVATE_USE_THRESHOLD: u16 = 16384;

/// Selection flags derived from settings and peer capabilities
/// (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionFlags {
    /// When set, proposals whose transform IDs fall in the private-use range
    /// are never selected.
    pub skip_private: bool,
    /// When set, prefer the order the remote peer supplied over our own
    /// configured preference order while picking among otherwise-equal
    /// candidates.
    pub prefer_supplied: bool,
}

/// The transform types every accepted IKE proposal must resolve for the
/// exchange to be usable: encryption, PRF, integrity and the primary key
/// exchange method. Additional key exchange transforms are optional and
/// handled separately by `Proposal::key_exchange_plan`.
const REQUIRED_TYPES: [TransformType; 4] = [
    TransformType::EncryptionAlgorithm,
    TransformType::PseudoRandomFunction,
    TransformType::IntegrityAlgorithm,
    TransformType::KeyExchangeMethod,
];

fn is_private(id: u16) -> bool {
    id >= PRIVATE_USE_THRESHOLD
}

/// Attempts to build an accepted proposal out of `offer` (the order-defining
/// side) matched against `candidates` (the other side). Returns the
/// intersection proposal — `offer`'s identity (`proposal_num`, `protocol_id`,
/// `spi`) with the set of transforms both sides support, including every
/// additional key-exchange transform `offer` names that `candidates` also
/// accepts, preserving plan order.
fn intersect(offer: &Proposal, candidates: &[Proposal], flags: SelectionFlags) -> Option<Proposal> {
    let counterpart = candidates
        .iter()
        .find(|c| c.protocol_id == offer.protocol_id)?;

    let mut chosen = Vec::new();
    for kind in REQUIRED_TYPES
        .iter()
        .copied()
        .chain(TransformType::ADDITIONAL)
    {
        let Some(offered) = offer.transform(kind) else {
            continue;
        };
        if flags.skip_private && is_private(offered.transform_id) {
            continue;
        }
        let accepted = counterpart
            .transform(kind)
            .filter(|t| t.transform_id == offered.transform_id)
            .filter(|t| !(flags.skip_private && is_private(t.transform_id)));
        match accepted {
            Some(t) => chosen.push(Transform::new(kind, t.transform_id)),
            None if REQUIRED_TYPES.contains(&kind) => return None,
            None => {}
        }
    }

    Some(Proposal {
        proposal_num: offer.proposal_num,
        protocol_id: offer.protocol_id,
        spi: offer.spi.clone(),
        transforms: chosen,
    })
}

/// Selects a single proposal out of `remote` that the local configuration
/// (`local`) also accepts, or `None` if no combination satisfies every
/// required transform type.
pub fn select_proposal(
    remote: &[Proposal],
    local: &[Proposal],
    flags: SelectionFlags,
) -> Option<Proposal> {
    if flags.prefer_supplied {
        remote.iter().find_map(|r| intersect(r, local, flags))
    } else {
        local.iter().find_map(|l| intersect(l, remote, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes_gcm_sha256_ecp256(spi: Vec<u8>) -> Proposal {
        Proposal {
            proposal_num: 1,
            protocol_id: 1,
            spi,
            transforms: vec![
                Transform::new(TransformType::EncryptionAlgorithm, 20),
                Transform::new(TransformType::PseudoRandomFunction, 5),
                Transform::new(TransformType::IntegrityAlgorithm, 12),
                Transform::new(TransformType::KeyExchangeMethod, 19),
            ],
        }
    }

    #[test]
    fn selects_matching_single_proposal() {
        let remote = vec![aes_gcm_sha256_ecp256(vec![])];
        let local = vec![aes_gcm_sha256_ecp256(vec![])];
        let chosen = select_proposal(&remote, &local, SelectionFlags::default()).unwrap();
        assert_eq!(chosen.key_exchange_method(), Some(19));
    }

    #[test]
    fn rejects_when_no_common_dh_group() {
        let remote = vec![aes_gcm_sha256_ecp256(vec![])];
        let mut other = aes_gcm_sha256_ecp256(vec![]);
        other
            .transforms
            .iter_mut()
            .find(|t| t.transform_type == TransformType::KeyExchangeMethod)
            .unwrap()
            .transform_id = 14;
        let local = vec![other];
        assert!(select_proposal(&remote, &local, SelectionFlags::default()).is_none());
    }

    #[test]
    fn skip_private_excludes_private_use_ids() {
        let mut remote_proposal = aes_gcm_sha256_ecp256(vec![]);
        remote_proposal
            .transforms
            .push(Transform::new(TransformType::AdditionalKeyExchange1, 20000));
        let remote = vec![remote_proposal];
        let mut local_proposal = aes_gcm_sha256_ecp256(vec![]);
        local_proposal
            .transforms
            .push(Transform::new(TransformType::AdditionalKeyExchange1, 20000));
        let local = vec![local_proposal];

        let flags = SelectionFlags {
            skip_private: true,
            prefer_supplied: true,
        };
        let chosen = select_proposal(&remote, &local, flags).unwrap();
        assert!(chosen.transform(TransformType::AdditionalKeyExchange1).is_none());
    }

    #[test]
    fn preserves_multi_ke_plan_when_both_sides_agree() {
        let mut remote_proposal = aes_gcm_sha256_ecp256(vec![]);
        remote_proposal
            .transforms
            .push(Transform::new(TransformType::AdditionalKeyExchange1, 0x0200));
        let remote = vec![remote_proposal.clone()];
        let local = vec![remote_proposal];

        let chosen = select_proposal(&remote, &local, SelectionFlags::default()).unwrap();
        assert_eq!(chosen.key_exchange_plan(), vec![19, 0x0200]);
    }
}
