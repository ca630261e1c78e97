//! Inbound payload processing for the initial exchange (`spec.md` §4.3) and
//! the top-level `process`/`pre_process` dispatch (`spec.md` §4.1).

use super::{IkeInitTask, Phase, TaskStatus};
use crate::bus::{AlertCode, AlertPayload, Bus};
use crate::message::{Message, NotifyType, PayloadKind};
use crate::proposal::SelectionFlags;
use crate::sa::{Extension, IkeSaHandle};

impl IkeInitTask {
    /// `spec.md` §4.1 `process(message) -> Status`. Dispatches on role and
    /// phase; the multi-KE variants live in `task::multi_ke`.
    pub fn process(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        match self.phase {
            Phase::Initial => {
                if self.initiator {
                    self.process_i(message, ike_sa, bus)
                } else {
                    self.process_r(message, ike_sa, bus)
                }
            }
            Phase::MultiKe => {
                if self.initiator {
                    self.process_i_multi_ke(message, ike_sa, bus)
                } else {
                    self.process_r_multi_ke(message, ike_sa, bus)
                }
            }
            Phase::IntermediateDeferred { .. } => {
                tracing::error!("process called while a post_process derivation is outstanding");
                TaskStatus::Failed
            }
        }
    }

    /// `spec.md` §4.1 `pre_process`: validates an inbound response ahead of
    /// regular processing, without mutating the SA. Only meaningful for the
    /// initiator; the responder never calls this.
    pub fn pre_process(&mut self, message: &dyn Message) -> TaskStatus {
        if !self.initiator {
            return TaskStatus::NeedMore;
        }

        if let Some(notify) = message.get_notify(NotifyType::Cookie.as_u16()) {
            if self.cookie.as_deref() == Some(notify.data.as_slice()) {
                return TaskStatus::Failed;
            }
        }

        if let Some(notify) = message.get_notify(NotifyType::Redirect.as_u16()) {
            match super::retry::parse_redirect(&notify.data) {
                Some((_, echoed_nonce)) => {
                    if self.my_nonce.as_deref() != Some(echoed_nonce.as_slice()) {
                        return TaskStatus::Failed;
                    }
                }
                None => return TaskStatus::Failed,
            }
        }

        TaskStatus::NeedMore
    }

    /// Initiator half of `process` for the initial exchange.
    pub(super) fn process_i(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        if let Some(notify) = message.get_notify(NotifyType::Cookie.as_u16()) {
            let data = notify.data.clone();
            return self.handle_cookie_notify(&data, ike_sa);
        }
        if let Some(notify) = message.get_notify(NotifyType::InvalidKeyPayload.as_u16()) {
            let data = notify.data.clone();
            return self.handle_invalid_ke_notify(&data, ike_sa);
        }
        if let Some(notify) = message.get_notify(NotifyType::Redirect.as_u16()) {
            let data = notify.data.clone();
            return self.handle_redirect_notify(&data, ike_sa);
        }
        if let Some(notify) = message.get_notify(NotifyType::NoProposalChosen.as_u16()) {
            let _ = notify;
            bus.alert(
                AlertCode::ProposalMismatchIke,
                AlertPayload::Proposals(ike_sa.get_ike_cfg().get_proposals()),
            );
            return TaskStatus::Failed;
        }
        if let Some(status) = self.reject_unknown_error_notify(message) {
            return status;
        }

        if let Err(status) = self.process_payloads(message, ike_sa, bus) {
            return status;
        }

        self.finish_initial_exchange(ike_sa, bus)
    }

    /// Responder half of `process` for the initial exchange: processes the
    /// inbound `IKE_SA_INIT` request. The reply is produced separately by
    /// `build_r`.
    pub(super) fn process_r(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        if let Err(status) = self.process_payloads(message, ike_sa, bus) {
            return status;
        }
        if self.proposal.is_none() {
            return TaskStatus::Failed;
        }
        TaskStatus::NeedMore
    }

    /// Shared inbound payload handling (`spec.md` §4.3): SA selection,
    /// NONCE capture, capability notifies. Applying the captured KE payload
    /// happens afterward once the plan is known, via
    /// `finish_initial_exchange`/the multi-KE routines.
    pub(super) fn process_payloads(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> Result<(), TaskStatus> {
        if let Some(payload) = message.get_payload(PayloadKind::SecurityAssociation) {
            let sa = payload.as_sa().expect("PayloadKind::SecurityAssociation");
            let flags = SelectionFlags {
                skip_private: !self.accept_private_algs
                    && !ike_sa.supports_extension(Extension::StrongSwan),
                prefer_supplied: !self.prefer_configured_proposals,
            };
            let mut selected = ike_sa.get_ike_cfg().select_proposal(&sa.proposals, flags);
            if selected.is_none() && !self.initiator {
                // `spec.md` §4.3: "iterate alternative IKE configs matching
                // the same host pair", switching the SA onto the first one
                // that accepts the peer's offer.
                for alt_cfg in ike_sa.alternative_ike_cfgs() {
                    if let Some(proposal) = alt_cfg.select_proposal(&sa.proposals, flags) {
                        selected = Some(proposal);
                        ike_sa.set_ike_cfg(alt_cfg);
                        break;
                    }
                }
            }
            match selected {
                Some(proposal) => self.proposal = Some(proposal),
                None => {
                    bus.alert(
                        AlertCode::ProposalMismatchIke,
                        AlertPayload::Proposals(sa.proposals.clone()),
                    );
                    return Err(TaskStatus::Failed);
                }
            }
        }

        if let Some(payload) = message.get_payload(PayloadKind::KeyExchange) {
            let ke = payload.as_ke().expect("PayloadKind::KeyExchange");
            self.ke_method = ke.method;
            self.pending_ke_public = Some(ke.data.clone());
        }

        if let Some(payload) = message.get_payload(PayloadKind::Nonce) {
            let nonce = payload.as_nonce().expect("PayloadKind::Nonce");
            self.other_nonce = Some(nonce.data.clone());
        }

        for payload in message.payloads() {
            let Some(notify) = payload.as_notify() else {
                continue;
            };
            match NotifyType::from_u16(notify.notify_type) {
                Some(NotifyType::FragmentationSupported) => {
                    ike_sa.enable_extension(Extension::IkeFragmentation)
                }
                Some(NotifyType::SignatureHashAlgorithms) => {
                    super::hash::process_signature_hash_algorithms(notify, ike_sa)
                }
                Some(NotifyType::UsePpk) => ike_sa.enable_extension(Extension::Ppk),
                Some(NotifyType::RedirectedFrom) => {
                    // Falls through to also enable REDIRECT_SUPPORTED's flag,
                    // matching the source's documented (non-bug) behavior of
                    // enabling both effects for one notify.
                    ike_sa.enable_extension(Extension::RedirectSupported);
                }
                Some(NotifyType::RedirectSupported) => {
                    ike_sa.enable_extension(Extension::RedirectSupported)
                }
                Some(NotifyType::ChildlessIkev2Supported) => {
                    ike_sa.enable_extension(Extension::ChildlessIkev2Supported)
                }
                _ => {}
            }
        }

        if let Some(proposal) = self.proposal.clone() {
            if self.is_rekey() {
                // `spec.md` §4.3: the selected proposal's `spi` carries the
                // peer's own new SPI (stamped by `build_i`/`build_r`); copy
                // it onto the new SA's identifier.
                ike_sa.set_peer_spi(proposal.spi.clone());
            }
            ike_sa.set_proposal(proposal.clone());
            self.load_plan(&proposal);
        }

        Ok(())
    }

    /// Detects an error-range notify (`spec.md` §4.5 "Unknown notify errors
    /// (type ≤ 16383) received by the initiator are fatal") that isn't one
    /// of the specifically handled retry/redirect/no-proposal codes.
    fn reject_unknown_error_notify(&self, message: &dyn Message) -> Option<TaskStatus> {
        for payload in message.payloads() {
            let Some(notify) = payload.as_notify() else {
                continue;
            };
            if !NotifyType::is_error_range(notify.notify_type) {
                continue;
            }
            let handled = matches!(
                NotifyType::from_u16(notify.notify_type),
                Some(NotifyType::Cookie)
                    | Some(NotifyType::InvalidKeyPayload)
                    | Some(NotifyType::Redirect)
                    | Some(NotifyType::NoProposalChosen)
            );
            if !handled {
                tracing::error!(
                    notify_type = notify.notify_type,
                    "unrecognised error notify from peer"
                );
                return Some(TaskStatus::Failed);
            }
        }
        None
    }

    /// Applies the captured KE payload once the plan is known and finishes
    /// the initial exchange's slot 0 via the shared `key_exchange_done`
    /// routine (`spec.md` §4.6), used by both the initiator's `process_i`
    /// and (after plan load) indirectly by the responder's `build_r`.
    pub(super) fn finish_initial_exchange(
        &mut self,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        if self.proposal.is_none() {
            return TaskStatus::Failed;
        }
        if let Err(status) = self.apply_primary_ke(ike_sa) {
            return status;
        }
        let nonce_i = if self.initiator {
            self.my_nonce.clone()
        } else {
            self.other_nonce.clone()
        };
        let nonce_r = if self.initiator {
            self.other_nonce.clone()
        } else {
            self.my_nonce.clone()
        };
        let (Some(nonce_i), Some(nonce_r)) = (nonce_i, nonce_r) else {
            return TaskStatus::Failed;
        };
        self.key_exchange_done(&nonce_i, &nonce_r, ike_sa, bus)
    }
}
