//! IKE_INIT task: the state machine tying every other component together
//! (`spec.md` §2 component 6, ~65% of the core). This module only holds the
//! data model (`spec.md` §3); the operations live in the sibling `build`,
//! `process`, `multi_ke`, `hash` and `retry` modules as further `impl
//! IkeInitTask` blocks, spreading the task's behaviour across focused files
//! rather than one giant one.

mod build;
mod hash;
mod multi_ke;
mod process;
mod retry;

use crate::bus::Bus;
use crate::config::{Settings, MAX_KEY_EXCHANGES, MAX_RETRIES};
use crate::keyexchange::KeyExchange;
use crate::noncegen::NonceGen;
use crate::payload::{Proposal, TransformType};
use crate::sa::OldSaRef;

/// Constant task-type tag returned by [`IkeInitTask::get_type`]
/// (`spec.md` §4.1 `get_type() -> TaskType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    IkeInit,
}

/// Outcome of one `build`/`process`/`pre_process`/`post_*` call
/// (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NeedMore,
    Success,
    Failed,
}

/// One slot in the key-exchange plan (`spec.md` §3 `key_exchanges[0..N]`):
/// the transform type this slot was planned for, the method value, and
/// whether that exchange has completed.
#[derive(Debug, Clone, Copy)]
pub struct KeSlot {
    pub transform_type: TransformType,
    pub method: u16,
    pub done: bool,
}

/// Dispatch phase a task is in. `spec.md` §9 Design Notes endorses this
/// tagged-phase rendering of the source's runtime dispatch-pointer swap as
/// "either preserves the invariant that a single call site drives
/// behavior". [`Phase::IntermediateDeferred`] captures the one case where
/// completing an exchange doesn't immediately run key derivation: an
/// intermediate (non-rekey) responder build, where derivation must wait
/// until the outgoing message has been signed (`spec.md` §4.6 "Ordering of
/// derivation vs. message emission").
#[derive(Debug, Clone)]
pub enum Phase {
    /// Still running the initial `IKE_SA_INIT` exchange.
    Initial,
    /// Running `IKE_INTERMEDIATE`/`IKE_FOLLOWUP_KE` rounds for the
    /// remaining entries in the key-exchange plan.
    MultiKe,
    /// The current multi-KE round's payloads are ready to send/have been
    /// processed, but `key_exchange_done` must run from `post_build` or
    /// `post_process` once the message is finalized. Carries the nonces
    /// that call will need.
    IntermediateDeferred {
        nonce_i: Vec<u8>,
        nonce_r: Vec<u8>,
    },
}

/// The IKE_SA_INIT/IKE_INTERMEDIATE task (`spec.md` §3 `IkeInitTask`).
///
/// `ike_sa`, `old_sa`'s raw back-reference and `keymat` are never stored as
/// owned fields: `ike_sa` (and, transitively, the keymat it exposes through
/// `get_keymat`) is borrowed as `&mut dyn IkeSaHandle` for the duration of
/// each `build`/`process` call, and `old_sa`'s back-reference is narrowed at
/// construction time to [`OldSaRef`] — see `SPEC_FULL.md` §3 for the
/// rationale.
pub struct IkeInitTask {
    initiator: bool,
    old_sa: Option<OldSaRef>,

    key_exchanges: [Option<KeSlot>; MAX_KEY_EXCHANGES],
    ke_index: usize,
    ke_method: u16,
    ke: Option<Box<dyn KeyExchange>>,
    kes: Vec<Box<dyn KeyExchange>>,
    ke_failed: bool,
    /// The peer's public value from the most recently received KE
    /// payload, held between payload processing and the point where it can
    /// actually be applied (`spec.md` §4.3: "Actual DH application is
    /// deferred ... after the SA has been selected so the plan is known").
    pending_ke_public: Option<Vec<u8>>,

    my_nonce: Option<Vec<u8>>,
    other_nonce: Option<Vec<u8>>,
    nonceg: Box<dyn NonceGen>,

    proposal: Option<Proposal>,
    cookie: Option<Vec<u8>>,
    retry: u32,

    phase: Phase,

    signature_authentication: bool,
    follow_redirects: bool,
    accept_private_algs: bool,
    prefer_configured_proposals: bool,
    prefer_previous_dh_group: bool,
}

impl IkeInitTask {
    /// Builds a task for a brand-new (non-rekey) `IKE_SA_INIT` exchange.
    pub fn new(
        initiator: bool,
        nonceg: Box<dyn NonceGen>,
        settings: &Settings,
    ) -> Self {
        Self {
            initiator,
            old_sa: None,
            key_exchanges: [None; MAX_KEY_EXCHANGES],
            ke_index: 0,
            ke_method: 0,
            ke: None,
            kes: Vec::new(),
            ke_failed: false,
            pending_ke_public: None,
            my_nonce: None,
            other_nonce: None,
            nonceg,
            proposal: None,
            cookie: None,
            retry: 0,
            phase: Phase::Initial,
            signature_authentication: settings.signature_authentication,
            follow_redirects: settings.follow_redirects,
            accept_private_algs: settings.accept_private_algs,
            prefer_configured_proposals: settings.prefer_configured_proposals,
            prefer_previous_dh_group: settings.prefer_previous_dh_group,
        }
    }

    /// Builds a task for a rekey, inheriting `SK_d`/PRF/preferred group
    /// from `old_sa` (`spec.md` §3 `old_sa`).
    pub fn new_rekey(
        initiator: bool,
        nonceg: Box<dyn NonceGen>,
        settings: &Settings,
        old_sa: OldSaRef,
    ) -> Self {
        let mut task = Self::new(initiator, nonceg, settings);
        task.old_sa = Some(old_sa);
        task
    }

    pub fn get_type(&self) -> TaskType {
        TaskType::IkeInit
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn is_rekey(&self) -> bool {
        self.old_sa.is_some()
    }

    /// Whichever of the two nonces is lexicographically smaller, compared
    /// over their common prefix (`spec.md` §4.1 `get_lower_nonce`). `Vec<u8>`
    /// ordering already compares element-wise over the shared prefix before
    /// falling back to length, which is exactly this rule; `None` until
    /// both nonces are known.
    pub fn get_lower_nonce(&self) -> Option<&[u8]> {
        let mine = self.my_nonce.as_deref()?;
        let theirs = self.other_nonce.as_deref()?;
        Some(if mine <= theirs { mine } else { theirs })
    }

    /// Rebinds the task to a new enclosing SA, clearing negotiation state
    /// while preserving the nonce and cookie already generated (`spec.md`
    /// §3 `migrate`, §5 "On `migrate`, owned volatile state is released
    /// except nonces and cookie").
    pub fn migrate(&mut self) {
        self.proposal = None;
        self.other_nonce = None;
        self.ke_failed = false;
        self.key_exchanges = [None; MAX_KEY_EXCHANGES];
        self.ke_index = 0;
        self.ke_method = 0;
        self.ke = None;
        self.kes.clear();
        self.pending_ke_public = None;
        self.phase = Phase::Initial;
    }

    /// Releases every owned resource (`spec.md` §3 `destroy`). With owned
    /// fields dropped automatically by Rust, this just clears them
    /// eagerly so a caller holding the task alive a while longer doesn't
    /// keep key material resident any longer than necessary.
    pub fn destroy(&mut self) {
        self.ke = None;
        self.kes.clear();
        self.pending_ke_public = None;
        self.proposal = None;
        self.my_nonce = None;
        self.other_nonce = None;
        self.cookie = None;
    }

    fn ensure_my_nonce(&mut self) -> Result<(), crate::error::KeymatError> {
        if self.my_nonce.is_none() {
            self.my_nonce = Some(self.nonceg.generate()?);
        }
        Ok(())
    }

    /// Active (planned) slot count: the length of the contiguous run of
    /// `Some` entries at the front of `key_exchanges` (`spec.md` §3
    /// invariant: slots are compacted to the front with no gaps).
    fn plan_len(&self) -> usize {
        self.key_exchanges
            .iter()
            .take_while(|slot| slot.is_some())
            .count()
    }

    /// True once every planned slot is `done` (`spec.md` §4.6 "no pending
    /// slot remains").
    fn plan_complete(&self) -> bool {
        self.key_exchanges[..self.plan_len()]
            .iter()
            .all(|slot| slot.map(|s| s.done).unwrap_or(true))
    }

    fn load_plan(&mut self, proposal: &Proposal) {
        self.key_exchanges = [None; MAX_KEY_EXCHANGES];
        let plan = proposal.key_exchange_plan();
        let types = std::iter::once(TransformType::KeyExchangeMethod)
            .chain(TransformType::ADDITIONAL.into_iter());
        for (slot, (method, transform_type)) in
            self.key_exchanges.iter_mut().zip(plan.into_iter().zip(types))
        {
            *slot = Some(KeSlot {
                transform_type,
                method,
                done: false,
            });
        }
        self.ke_index = 0;
    }

    fn reset_retry_state(&mut self) {
        self.proposal = None;
        self.other_nonce = None;
        self.ke_failed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noncegen::SystemNonceGen;

    fn task() -> IkeInitTask {
        IkeInitTask::new(true, Box::new(SystemNonceGen::default()), &Settings::default())
    }

    #[test]
    fn get_lower_nonce_picks_smaller_prefix() {
        let mut t = task();
        t.my_nonce = Some(vec![0x01, 0xFF]);
        t.other_nonce = Some(vec![0x02, 0x00]);
        assert_eq!(t.get_lower_nonce(), Some(&[0x01, 0xFF][..]));
    }

    #[test]
    fn migrate_clears_volatile_state_but_keeps_identity() {
        let mut t = task();
        t.my_nonce = Some(vec![1, 2, 3]);
        t.cookie = Some(vec![9, 9]);
        t.proposal = Some(Proposal {
            proposal_num: 1,
            protocol_id: 1,
            spi: vec![],
            transforms: vec![],
        });
        t.migrate();
        assert!(t.proposal.is_none());
        assert_eq!(t.my_nonce, Some(vec![1, 2, 3]));
        assert_eq!(t.cookie, Some(vec![9, 9]));
    }

    #[test]
    fn load_plan_compacts_transform_types_to_front() {
        let mut t = task();
        let proposal = Proposal {
            proposal_num: 1,
            protocol_id: 1,
            spi: vec![],
            transforms: vec![
                crate::payload::Transform::new(TransformType::KeyExchangeMethod, 19),
                crate::payload::Transform::new(TransformType::AdditionalKeyExchange1, 0x0200),
            ],
        };
        t.load_plan(&proposal);
        assert_eq!(t.plan_len(), 2);
        assert!(!t.plan_complete());
        assert_eq!(t.key_exchanges[0].unwrap().method, 19);
        assert_eq!(t.key_exchanges[1].unwrap().method, 0x0200);
        assert!(t.key_exchanges[2].is_none());
    }
}
