//! Outbound message construction (`spec.md` §4.2) and the top-level
//! `build` dispatch (`spec.md` §4.1).

use super::{IkeInitTask, Phase, TaskStatus};
use crate::bus::Bus;
use crate::config::MAX_RETRIES;
use crate::message::{ExchangeType, Message, NotifyType};
use crate::payload::{KeyExchangePayload, NoncePayload, Payload, Proposal, SecurityAssociationPayload, TransformType};
use crate::sa::{Extension, IkeSaHandle};

/// Reorders `proposals` for outbound SA payload construction (`spec.md`
/// §4.2 item 1): within each proposal that carries `chosen_method` as its
/// `KEY_EXCHANGE_METHOD` transform, that transform is promoted to slot 0 of
/// the proposal's own transform list; proposals that don't carry it are
/// moved to the end of the list (still offered, but last), preserving
/// relative order on both sides of the split.
fn promote_chosen_method(mut proposals: Vec<Proposal>, chosen_method: u16) -> Vec<Proposal> {
    for proposal in proposals.iter_mut() {
        if let Some(idx) = proposal.transforms.iter().position(|t| {
            t.transform_type == TransformType::KeyExchangeMethod && t.transform_id == chosen_method
        }) {
            let transform = proposal.transforms.remove(idx);
            proposal.transforms.insert(0, transform);
        }
    }
    let (carries_method, rest): (Vec<_>, Vec<_>) = proposals
        .into_iter()
        .partition(|p| p.key_exchange_method() == Some(chosen_method));
    carries_method.into_iter().chain(rest).collect()
}

impl IkeInitTask {
    /// `spec.md` §4.1 `build(message) -> Status`. Dispatches on role and
    /// phase; the multi-KE variants live in `task::multi_ke`.
    pub fn build(
        &mut self,
        message: &mut dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        match self.phase {
            Phase::Initial => {
                if self.initiator {
                    self.build_i(message, ike_sa)
                } else {
                    self.build_r(message, ike_sa, bus)
                }
            }
            Phase::MultiKe => {
                if self.initiator {
                    self.build_i_multi_ke(message, ike_sa)
                } else {
                    self.build_r_multi_ke(message, ike_sa, bus)
                }
            }
            Phase::IntermediateDeferred { .. } => {
                tracing::error!("build called while a post_build/post_process derivation is outstanding");
                TaskStatus::Failed
            }
        }
    }

    /// Picks the key-exchange method for the very first outbound attempt:
    /// the predecessor's group when rekeying with `prefer_previous_dh_group`
    /// (`spec.md` §8 scenario 5), otherwise the local config's top-choice
    /// proposal's `KEY_EXCHANGE_METHOD`. Later attempts (cookie/invalid-KE
    /// retries) leave `ke_method` already set, so this only runs once.
    fn choose_initial_ke_method(&self, ike_sa: &dyn IkeSaHandle) -> u16 {
        if self.is_rekey() && self.prefer_previous_dh_group {
            if let Some(old_sa) = &self.old_sa {
                return old_sa.preferred_group;
            }
        }
        ike_sa
            .get_ike_cfg()
            .get_proposals()
            .iter()
            .find_map(Proposal::key_exchange_method)
            .unwrap_or(0)
    }

    /// Initiator build for the initial exchange (`spec.md` §4.2). Handles
    /// both the first attempt and every cookie/invalid-KE retry through the
    /// same code path, since `ke_method`/`cookie`/`my_nonce` already carry
    /// whatever a retry updated.
    pub(super) fn build_i(&mut self, message: &mut dyn Message, ike_sa: &mut dyn IkeSaHandle) -> TaskStatus {
        if self.retry >= MAX_RETRIES {
            return TaskStatus::Failed;
        }

        if self.ke_method == 0 {
            self.ke_method = self.choose_initial_ke_method(ike_sa);
        }

        let needs_new_ke = match &self.ke {
            Some(ke) => ke.get_method() != self.ke_method,
            None => true,
        };
        if needs_new_ke {
            self.ke = None;
            match ike_sa.get_keymat().create_ke(self.ke_method) {
                Ok(ke) => self.ke = Some(ke),
                Err(error) => {
                    tracing::error!(method = self.ke_method, %error, "could not instantiate initiator key exchange");
                    return TaskStatus::Failed;
                }
            }
        }

        if let Err(error) = self.ensure_my_nonce() {
            tracing::error!(%error, "nonce generation failed");
            return TaskStatus::Failed;
        }

        message.set_exchange_type(ExchangeType::IkeSaInit);

        if let Some(cookie) = self.cookie.clone() {
            message.add_notify(false, NotifyType::Cookie.as_u16(), cookie);
        }

        let mut proposals = ike_sa.get_ike_cfg().get_proposals();
        if self.is_rekey() {
            let spi = ike_sa.get_id().to_be_bytes().to_vec();
            for proposal in proposals.iter_mut() {
                proposal.spi = spi.clone();
            }
        }
        let proposals = promote_chosen_method(proposals, self.ke_method);
        message.add_payload(Payload::SecurityAssociation(SecurityAssociationPayload {
            proposals,
        }));

        let ke = self.ke.as_ref().expect("just instantiated above");
        message.add_payload(Payload::KeyExchange(KeyExchangePayload {
            method: self.ke_method,
            data: ke.get_public_key().to_vec(),
        }));

        message.add_payload(Payload::Nonce(NoncePayload {
            data: self.my_nonce.clone().expect("ensure_my_nonce succeeded"),
        }));

        if !self.is_rekey() {
            self.emit_initial_notifies(message, ike_sa);
        }

        TaskStatus::NeedMore
    }

    /// Responder build for the initial exchange (`spec.md` §4.2, §4.6
    /// "the initial responder build derives keys inside `build_r`"). The
    /// peer's proposal and raw KE method were already recorded by
    /// `process_r`; this verifies the KE group, applies the peer's public
    /// value, emits the reply, and derives keys before returning since an
    /// `IKE_SA_INIT` response carries no integrity protection of its own.
    pub(super) fn build_r(
        &mut self,
        message: &mut dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        let Some(proposal) = self.proposal.clone() else {
            return TaskStatus::Failed;
        };

        let expected_method = self.key_exchanges[0].map(|slot| slot.method);
        if expected_method != Some(self.ke_method) {
            let correct = expected_method.unwrap_or(0);
            message.set_exchange_type(ExchangeType::IkeSaInit);
            message.add_notify(
                true,
                NotifyType::InvalidKeyPayload.as_u16(),
                correct.to_be_bytes().to_vec(),
            );
            tracing::warn!(
                got = self.ke_method,
                correct,
                "peer's key exchange group does not match the selected proposal"
            );
            return TaskStatus::Failed;
        }

        if let Err(status) = self.apply_primary_ke(ike_sa) {
            message.set_exchange_type(ExchangeType::IkeSaInit);
            message.add_notify(true, NotifyType::NoProposalChosen.as_u16(), Vec::new());
            return status;
        }

        if let Err(error) = self.ensure_my_nonce() {
            tracing::error!(%error, "nonce generation failed");
            return TaskStatus::Failed;
        }

        message.set_exchange_type(ExchangeType::IkeSaInit);

        let mut sa_proposal = proposal.clone();
        if self.is_rekey() {
            sa_proposal.spi = ike_sa.get_id().to_be_bytes().to_vec();
        }
        message.add_payload(Payload::SecurityAssociation(SecurityAssociationPayload {
            proposals: vec![sa_proposal],
        }));

        let ke = self.ke.as_ref().expect("apply_primary_ke instantiated it");
        message.add_payload(Payload::KeyExchange(KeyExchangePayload {
            method: self.ke_method,
            data: ke.get_public_key().to_vec(),
        }));

        message.add_payload(Payload::Nonce(NoncePayload {
            data: self.my_nonce.clone().expect("ensure_my_nonce succeeded"),
        }));

        if !self.is_rekey() {
            self.emit_initial_notifies(message, ike_sa);
        }

        let Some((nonce_i, nonce_r)) = self.ordered_nonces() else {
            return TaskStatus::Failed;
        };
        self.key_exchange_done(&nonce_i, &nonce_r, ike_sa, bus)
    }

    /// Emits the capability notifies of `spec.md` §4.2 item 4, added only
    /// for the first, non-rekey exchange. Both `build_i` and `build_r`
    /// share this: the predicates read the same extension flags and
    /// settings regardless of role, only their role-dependent halves
    /// (`self.initiator`) differ.
    fn emit_initial_notifies(&self, message: &mut dyn Message, ike_sa: &mut dyn IkeSaHandle) {
        if ike_sa.get_ike_cfg().fragmentation()
            && (self.initiator || ike_sa.supports_extension(Extension::IkeFragmentation))
        {
            message.add_notify(false, NotifyType::FragmentationSupported.as_u16(), Vec::new());
        }

        if self.signature_authentication
            && (self.initiator || ike_sa.supports_extension(Extension::SignatureAuth))
        {
            super::hash::emit_signature_hash_algorithms(message, ike_sa.get_peer_cfg());
        }

        if self.initiator {
            if let Some(gateway) = ike_sa.get_redirected_from() {
                message.add_notify(false, NotifyType::RedirectedFrom.as_u16(), gateway);
            } else if self.follow_redirects {
                message.add_notify(false, NotifyType::RedirectSupported.as_u16(), Vec::new());
            }
        }

        if self.send_use_ppk(ike_sa) {
            message.add_notify(false, NotifyType::UsePpk.as_u16(), Vec::new());
        }

        if !self.initiator && ike_sa.get_ike_cfg().childless() {
            message.add_notify(false, NotifyType::ChildlessIkev2Supported.as_u16(), Vec::new());
        }
    }

    /// `spec.md` §4.2 item 4 `USE_PPK` predicate: the initiator has a PPK
    /// ID configured for the peer, or the responder observed `EXT_PPK` from
    /// the peer and has at least one PPK credential available.
    fn send_use_ppk(&self, ike_sa: &mut dyn IkeSaHandle) -> bool {
        if self.initiator {
            ike_sa.get_peer_cfg().get_ppk_id().is_some()
        } else {
            ike_sa.supports_extension(Extension::Ppk) && ike_sa.get_peer_cfg().get_ppk_id().is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Transform;

    fn proposal(num: u8, transforms: Vec<Transform>) -> Proposal {
        Proposal {
            proposal_num: num,
            protocol_id: 1,
            spi: vec![],
            transforms,
        }
    }

    #[test]
    fn promote_chosen_method_reorders_transforms_and_proposal_order() {
        let p1 = proposal(
            1,
            vec![
                Transform::new(TransformType::KeyExchangeMethod, 14),
                Transform::new(TransformType::EncryptionAlgorithm, 20),
            ],
        );
        let p2 = proposal(
            2,
            vec![
                Transform::new(TransformType::EncryptionAlgorithm, 20),
                Transform::new(TransformType::KeyExchangeMethod, 19),
            ],
        );
        let reordered = promote_chosen_method(vec![p1, p2], 19);

        assert_eq!(reordered[0].proposal_num, 2);
        assert_eq!(reordered[0].transforms[0].transform_type, TransformType::KeyExchangeMethod);
        assert_eq!(reordered[0].transforms[0].transform_id, 19);
        assert_eq!(reordered[1].proposal_num, 1);
    }

    #[test]
    fn promote_chosen_method_leaves_proposal_without_match_untouched() {
        let p1 = proposal(1, vec![Transform::new(TransformType::KeyExchangeMethod, 14)]);
        let reordered = promote_chosen_method(vec![p1.clone()], 19);
        assert_eq!(reordered, vec![p1]);
    }
}
