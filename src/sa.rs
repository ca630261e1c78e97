//! IKE_SA collaborator seam: the enclosing security-association container
//! this task reads and mutates but never owns (`spec.md` §6 "IKE_SA").
//!
//! Split into the narrow traits the task actually calls through, rather
//! than one monolithic struct — the daemon embedding this task owns the
//! real SA type and implements these traits over it.

use std::net::SocketAddr;

use crate::payload::Proposal;

/// Extensions the SA can enable or have enabled by the peer, tracked as a
/// fixed-width bit set (`spec.md` §9 Design Notes: "Representing them as a
/// fixed-width bit set keyed by an enumeration of known extensions keeps
/// the many `enable_extension`/`supports_extension` checks O(1) and
/// total").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Extension {
    IkeFragmentation,
    SignatureAuth,
    Ppk,
    RedirectSupported,
    ChildlessIkev2Supported,
    /// The peer identified itself as strongSwan via a vendor ID payload
    /// (out of scope for this task, `spec.md` §1 — vendor ID parsing is the
    /// embedding daemon's job). `spec.md` §4.3 clears `SelectionFlags::skip_private`
    /// when this is set, letting private-use transform IDs into the
    /// selected proposal.
    StrongSwan,
}

const EXTENSION_COUNT: usize = 6;

/// A fixed-width bit set over [`Extension`], never heap-allocated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensionFlags(u8);

impl ExtensionFlags {
    pub fn enable(&mut self, ext: Extension) {
        self.0 |= 1 << (ext as u8);
    }

    pub fn supports(&self, ext: Extension) -> bool {
        self.0 & (1 << (ext as u8)) != 0
    }
}

const _: () = assert!(EXTENSION_COUNT <= 8, "ExtensionFlags needs a wider backing int");

/// States an IKE_SA passes through; this task only ever calls
/// `set_state` with `Connecting` or `Established`/`Destroying` on terminal
/// outcomes, the rest belong to the surrounding daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaState {
    Connecting,
    Established,
    Rekeying,
    Destroying,
}

/// IKE-level proposal/algorithm configuration (`spec.md` §6 `IkeConfig`).
pub trait IkeConfig: Send + Sync {
    fn get_proposals(&self) -> Vec<Proposal>;
    fn select_proposal(
        &self,
        proposals: &[Proposal],
        flags: crate::proposal::SelectionFlags,
    ) -> Option<Proposal>;
    /// Fragmentation policy; `None` means `FRAGMENTATION_NO` (disabled).
    fn fragmentation(&self) -> bool;
    fn childless(&self) -> bool;
}

/// Peer-specific authentication configuration (`spec.md` §6 `PeerConfig`).
/// `auth_hash_algorithms` replaces the source's `create_auth_cfg_enumerator`
/// with a direct iterator-returning method.
pub trait PeerConfig: Send + Sync {
    /// Hash algorithm codes drawn from this peer's
    /// `AUTH_RULE_IKE_SIGNATURE_SCHEME` auth rules, for `spec.md` §4.4.
    fn auth_hash_algorithms(&self) -> Vec<u16>;
    fn get_ppk_id(&self) -> Option<Vec<u8>>;
}

/// Narrowed, owned view of a predecessor IKE_SA, substituting for a raw
/// back-reference (`spec.md` §3 `old_sa`). Holds only what keymat
/// derivation and group-preference logic in `spec.md` §4.6/§4.7 actually
/// read: the outgoing `SK_d`, the PRF that produced it, and the DH group
/// the predecessor used (for `prefer_previous_dh_group`). The predecessor's
/// own SPIs play no part in deriving the *new* SA's identifier — that comes
/// from the freshly negotiated proposal via `IkeSaHandle::set_peer_spi` —
/// so they are not carried here.
#[derive(Debug, Clone)]
pub struct OldSaRef {
    pub sk_d: Vec<u8>,
    pub prf_algorithm: u16,
    pub preferred_group: u16,
}

/// The enclosing IKE_SA (`spec.md` §6 "IKE_SA (collaborator)"). `get_ref`
/// from the source is the C refcount bump keeping the SA alive while a task
/// holds a raw pointer to it; under Rust's borrow model the task instead
/// takes `&mut dyn IkeSaHandle` for the duration of one `build`/`process`
/// call, so there is nothing for `get_ref` to do and it is not ported.
pub trait IkeSaHandle: Send {
    fn get_id(&self) -> u64;
    fn get_ike_cfg(&self) -> &dyn IkeConfig;
    fn set_ike_cfg(&mut self, cfg: Box<dyn IkeConfig>);
    /// Other configured `IkeConfig`s matching this SA's host pair, tried in
    /// order when the current config's proposals don't satisfy the peer's
    /// offer (`spec.md` §4.3 "iterate alternative IKE configs matching the
    /// same host pair"). Empty when there is no other candidate.
    fn alternative_ike_cfgs(&self) -> Vec<Box<dyn IkeConfig>>;
    fn get_peer_cfg(&self) -> &dyn PeerConfig;
    fn get_keymat(&mut self) -> &mut dyn crate::keymat::Keymat;
    fn get_name(&self) -> &str;
    fn get_unique_id(&self) -> u64;
    fn get_other_host(&self) -> SocketAddr;

    fn set_state(&mut self, state: SaState);
    fn set_proposal(&mut self, proposal: Proposal);
    fn get_proposal(&self) -> Option<&Proposal>;
    /// Copies the peer's half of the negotiated SPI into the new (rekeyed)
    /// SA's identifier (`spec.md` §4.3: "on rekey, copy the negotiated SPI
    /// into the new SA's identifier — initiator receives responder SPI,
    /// responder receives initiator SPI"). The task calls this with the
    /// selected proposal's `spi` field only when rekeying; a no-op outside
    /// a rekey since a fresh establishment has no predecessor identifier to
    /// complete.
    fn set_peer_spi(&mut self, spi: Vec<u8>);

    fn enable_extension(&mut self, ext: Extension);
    fn supports_extension(&self, ext: Extension) -> bool;

    /// Clears negotiation-scoped state ahead of a retry (cookie,
    /// invalid-KE-group) while preserving identity (`spec.md` §4.5).
    fn reset(&mut self);

    /// Asks the SA's redirect handler whether `target` is an acceptable
    /// gateway to reinitiate against (`spec.md` §4.5 REDIRECT).
    fn handle_redirect(&mut self, target: &[u8]) -> bool;

    fn get_connect_id(&self) -> Option<Vec<u8>>;
    /// The gateway this SA was redirected from, if any, as a wire-ready
    /// identity octet string (`spec.md` §4.2 `REDIRECTED_FROM`).
    fn get_redirected_from(&self) -> Option<Vec<u8>>;
}
