//! Multi-exchange extension (`spec.md` §4.6): the `IKE_INTERMEDIATE`/
//! `IKE_FOLLOWUP_KE` rounds that carry any `ADDITIONAL_KEY_EXCHANGE_1..7`
//! transforms beyond slot 0, plus `process_ke_payload`/`key_exchange_done`,
//! the two routines shared with the initial exchange in `task::process`.
//!
//! The ordering rule this module exists to get right (`spec.md` §4.6
//! "Ordering of derivation vs. message emission"): a responder completing a
//! non-rekey intermediate round must not derive keys until *after* the
//! reply has been built and signed, since the reply itself is still
//! protected by the pre-update keys. [`Phase::IntermediateDeferred`] carries
//! the nonces `post_build`/`post_process` need to finish the job once the
//! caller has finalized the message.

use super::{IkeInitTask, Phase, TaskStatus};
use crate::bus::Bus;
use crate::message::{ExchangeType, Message, NotifyType, PayloadKind};
use crate::payload::{KeyExchangePayload, Payload};
use crate::sa::IkeSaHandle;

impl IkeInitTask {
    /// Shared application of whatever KE payload was most recently captured
    /// into `pending_ke_public`, for the slot at `ke_index`. Used both for
    /// slot 0 (initial exchange) and every later multi-KE round.
    ///
    /// - If the wire method disagrees with the planned method, latches
    ///   `ke_failed` and returns.
    /// - Responder: destroys any existing `ke`, instantiates a fresh one for
    ///   the negotiated method (instantiation failure surfaces as
    ///   no-proposal-chosen in the build step, not here).
    /// - Initiator with an existing `ke`: a method mismatch latches
    ///   `ke_failed`.
    /// - Applies the peer's public value; failure latches `ke_failed`.
    pub(super) fn process_ke_payload(&mut self, ike_sa: &mut dyn IkeSaHandle) {
        let planned = self.key_exchanges[self.ke_index].map(|slot| slot.method);
        if let Some(planned) = planned {
            if planned != self.ke_method {
                self.ke_failed = true;
                return;
            }
        }

        if !self.initiator {
            self.ke = None;
            match ike_sa.get_keymat().create_ke(self.ke_method) {
                Ok(ke) => self.ke = Some(ke),
                Err(error) => {
                    tracing::warn!(
                        method = self.ke_method,
                        %error,
                        "could not instantiate responder key exchange for negotiated method"
                    );
                    self.ke_failed = true;
                    return;
                }
            }
        } else if let Some(existing) = self.ke.as_ref() {
            if existing.get_method() != self.ke_method {
                self.ke_failed = true;
                return;
            }
        }

        let Some(public) = self.pending_ke_public.take() else {
            self.ke_failed = true;
            return;
        };

        match self.ke.as_mut() {
            Some(ke) => {
                if !ke.set_public_key(&public) || ke.get_shared_secret().is_none() {
                    self.ke_failed = true;
                }
            }
            None => self.ke_failed = true,
        }
    }

    /// Applies the primary (slot 0) KE payload captured during the initial
    /// exchange's inbound processing. Thin wrapper over
    /// [`Self::process_ke_payload`] that turns a latched `ke_failed` into
    /// the `Failed` status `process_i`'s caller expects.
    pub(super) fn apply_primary_ke(
        &mut self,
        ike_sa: &mut dyn IkeSaHandle,
    ) -> Result<(), TaskStatus> {
        self.process_ke_payload(ike_sa);
        if self.ke_failed {
            return Err(TaskStatus::Failed);
        }
        Ok(())
    }

    /// Completion of one key-exchange slot (`spec.md` §4.6
    /// `key_exchange_done`), shared by the initial exchange and every
    /// multi-KE round:
    ///
    /// 1. Marks the current slot done, advances `ke_index`, and moves the
    ///    just-completed `ke` into `kes`.
    /// 2. Derives keys for this SA, chaining from whatever predecessor
    ///    applies: the real predecessor's `SK_d` on a rekey, or (for a
    ///    from-scratch establishment already carrying keys from an earlier
    ///    round) the SA's own current `SK_d` — the mechanism by which keys
    ///    chain across intermediate exchanges.
    /// 3. Returns `NeedMore` while slots remain in the plan, `Success` once
    ///    it's exhausted, `Failed` on any derivation failure.
    pub(super) fn key_exchange_done(
        &mut self,
        nonce_i: &[u8],
        nonce_r: &[u8],
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        if self.ke_failed {
            return TaskStatus::Failed;
        }

        if let Some(slot) = self.key_exchanges[self.ke_index].as_mut() {
            slot.done = true;
        }
        self.ke_index += 1;
        if let Some(ke) = self.ke.take() {
            self.kes.push(ke);
        }

        let Some(proposal) = self.proposal.clone() else {
            return TaskStatus::Failed;
        };

        let predecessor: Option<(u16, Vec<u8>)> = if self.is_rekey() {
            self.old_sa
                .as_ref()
                .map(|old| (old.prf_algorithm, old.sk_d.clone()))
        } else {
            ike_sa.get_keymat().get_skd().map(|(alg, d)| (alg, d.to_vec()))
        };

        let sa_id = ike_sa.get_id();
        let ok = ike_sa.get_keymat().derive_ike_keys(
            &proposal,
            &self.kes,
            nonce_i,
            nonce_r,
            sa_id,
            predecessor.as_ref().map(|(alg, _)| *alg),
            predecessor.as_ref().map(|(_, d)| d.as_slice()),
            bus,
        );

        if !ok {
            return TaskStatus::Failed;
        }

        if self.plan_complete() {
            TaskStatus::Success
        } else {
            self.phase = Phase::MultiKe;
            TaskStatus::NeedMore
        }
    }

    /// `IKE_FOLLOWUP_KE` for a rekey, `IKE_INTERMEDIATE` otherwise
    /// (`spec.md` §4.6 "Exchange type selection").
    fn multi_ke_exchange_type(&self) -> ExchangeType {
        if self.is_rekey() {
            ExchangeType::IkeFollowupKeyExchange
        } else {
            ExchangeType::IkeIntermediate
        }
    }

    pub(super) fn ordered_nonces(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let mine = self.my_nonce.clone()?;
        let theirs = self.other_nonce.clone()?;
        Some(if self.initiator {
            (mine, theirs)
        } else {
            (theirs, mine)
        })
    }

    /// Initiator side of a multi-KE build (`spec.md` §4.6 "Multi-build"):
    /// destroys any prior `ke`, instantiates a fresh object for the method
    /// at `ke_index`, and emits exactly one KE payload.
    pub(super) fn build_i_multi_ke(
        &mut self,
        message: &mut dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
    ) -> TaskStatus {
        let Some(slot) = self.key_exchanges[self.ke_index] else {
            tracing::error!("build_i_multi_ke called with no pending plan slot");
            return TaskStatus::Failed;
        };

        self.ke = None;
        let ke = match ike_sa.get_keymat().create_ke(slot.method) {
            Ok(ke) => ke,
            Err(error) => {
                tracing::error!(method = slot.method, %error, "could not instantiate initiator key exchange");
                return TaskStatus::Failed;
            }
        };

        self.ke_method = slot.method;
        message.set_exchange_type(self.multi_ke_exchange_type());
        message.add_payload(Payload::KeyExchange(KeyExchangePayload {
            method: slot.method,
            data: ke.get_public_key().to_vec(),
        }));
        self.ke = Some(ke);
        TaskStatus::NeedMore
    }

    /// Responder side of a multi-KE build: the peer's offer for this round
    /// was already applied by `process_r_multi_ke`, so this only emits our
    /// own public value for the already-instantiated `ke` and decides when
    /// `key_exchange_done` runs — inline for a rekey (`spec.md` §4.6: "the
    /// current keys are already independent"), deferred to `post_build`
    /// otherwise.
    pub(super) fn build_r_multi_ke(
        &mut self,
        message: &mut dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        if self.ke_failed {
            message.add_notify(true, NotifyType::NoProposalChosen.as_u16(), Vec::new());
            return TaskStatus::Failed;
        }
        let Some(ke) = self.ke.as_ref() else {
            message.add_notify(true, NotifyType::NoProposalChosen.as_u16(), Vec::new());
            return TaskStatus::Failed;
        };

        message.set_exchange_type(self.multi_ke_exchange_type());
        message.add_payload(Payload::KeyExchange(KeyExchangePayload {
            method: self.ke_method,
            data: ke.get_public_key().to_vec(),
        }));

        let Some((nonce_i, nonce_r)) = self.ordered_nonces() else {
            return TaskStatus::Failed;
        };

        if self.is_rekey() {
            self.key_exchange_done(&nonce_i, &nonce_r, ike_sa, bus)
        } else {
            self.phase = Phase::IntermediateDeferred { nonce_i, nonce_r };
            TaskStatus::NeedMore
        }
    }

    /// Initiator side of multi-KE processing: applies the responder's KE
    /// payload for this round. A rekey's keys are independent of the
    /// exchange that carries them and derive immediately; an intermediate
    /// exchange defers to `post_process` so the authentication computed
    /// over this message still uses the pre-update keys.
    pub(super) fn process_i_multi_ke(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        bus: &dyn Bus,
    ) -> TaskStatus {
        let Some(payload) = message.get_payload(PayloadKind::KeyExchange) else {
            return TaskStatus::Failed;
        };
        let ke = payload.as_ke().expect("PayloadKind::KeyExchange");
        self.ke_method = ke.method;
        self.pending_ke_public = Some(ke.data.clone());

        self.process_ke_payload(ike_sa);
        if self.ke_failed {
            return TaskStatus::Failed;
        }

        let Some((nonce_i, nonce_r)) = self.ordered_nonces() else {
            return TaskStatus::Failed;
        };

        if self.is_rekey() {
            self.key_exchange_done(&nonce_i, &nonce_r, ike_sa, bus)
        } else {
            self.phase = Phase::IntermediateDeferred { nonce_i, nonce_r };
            TaskStatus::NeedMore
        }
    }

    /// Responder side of multi-KE processing: captures the initiator's
    /// offer for this round and applies it. Completion always happens from
    /// the build side (`build_r_multi_ke`), since the responder only knows
    /// whether to derive inline or defer once it knows whether a reply is
    /// about to be signed.
    pub(super) fn process_r_multi_ke(
        &mut self,
        message: &dyn Message,
        ike_sa: &mut dyn IkeSaHandle,
        _bus: &dyn Bus,
    ) -> TaskStatus {
        let Some(payload) = message.get_payload(PayloadKind::KeyExchange) else {
            return TaskStatus::Failed;
        };
        let ke = payload.as_ke().expect("PayloadKind::KeyExchange");
        self.ke_method = ke.method;
        self.pending_ke_public = Some(ke.data.clone());

        self.process_ke_payload(ike_sa);
        TaskStatus::NeedMore
    }

    /// Finishes a deferred `key_exchange_done` call after `build`/`process`
    /// has returned, if the task is currently parked in
    /// [`Phase::IntermediateDeferred`]; a no-op otherwise.
    fn finish_deferred(&mut self, ike_sa: &mut dyn IkeSaHandle, bus: &dyn Bus) -> TaskStatus {
        match std::mem::replace(&mut self.phase, Phase::MultiKe) {
            Phase::IntermediateDeferred { nonce_i, nonce_r } => {
                self.key_exchange_done(&nonce_i, &nonce_r, ike_sa, bus)
            }
            other => {
                self.phase = other;
                TaskStatus::NeedMore
            }
        }
    }

    /// `spec.md` §4.1 `post_build`: completes a responder's deferred
    /// intermediate-round derivation now that the reply has been signed.
    pub fn post_build(&mut self, ike_sa: &mut dyn IkeSaHandle, bus: &dyn Bus) -> TaskStatus {
        self.finish_deferred(ike_sa, bus)
    }

    /// `spec.md` §4.1 `post_process`: completes an initiator's deferred
    /// intermediate-round derivation now that inbound processing (and any
    /// signature verification over the still-protected message) is done.
    pub fn post_process(&mut self, ike_sa: &mut dyn IkeSaHandle, bus: &dyn Bus) -> TaskStatus {
        self.finish_deferred(ike_sa, bus)
    }
}
