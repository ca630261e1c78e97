//! RFC 7427 signature hash-algorithm negotiation (`spec.md` §4.4). Split
//! out from `build`/`process` since it's invoked identically by both the
//! initial and multi-KE exchange variants.

use crate::message::{Message, Notify, NotifyType};
use crate::sa::{Extension, IkeSaHandle, PeerConfig};

/// RFC 7427 §3 hash algorithm identifiers valid for IKEv2 signatures:
/// SHA1, SHA2-256, SHA2-384, SHA2-512.
fn default_ikev2_hashes() -> Vec<u16> {
    vec![1, 2, 3, 4]
}

fn is_valid_ikev2_hash(hash: u16) -> bool {
    matches!(hash, 1..=4)
}

/// Outbound half of `spec.md` §4.4: collects the peer's configured
/// `AUTH_RULE_IKE_SIGNATURE_SCHEME` hashes, falling back to every hasher
/// the crypto registry exposes for IKEv2 when the peer config names none,
/// and emits a single `SIGNATURE_HASH_ALGORITHMS` notify.
pub(super) fn emit_signature_hash_algorithms(message: &mut dyn Message, peer_cfg: &dyn PeerConfig) {
    let mut hashes = peer_cfg.auth_hash_algorithms();
    if hashes.is_empty() {
        hashes = default_ikev2_hashes();
    }
    let mut data = Vec::with_capacity(hashes.len() * 2);
    for hash in &hashes {
        data.extend_from_slice(&hash.to_be_bytes());
    }
    message.add_notify(false, NotifyType::SignatureHashAlgorithms.as_u16(), data);
}

/// Inbound half of `spec.md` §4.4: parses the 16-bit hash codes out of the
/// notify, registers every recognised one with the keymat, and enables
/// `EXT_SIGNATURE_AUTH` if at least one was added.
pub(super) fn process_signature_hash_algorithms(notify: &Notify, ike_sa: &mut dyn IkeSaHandle) {
    let mut added = false;
    for chunk in notify.data.chunks_exact(2) {
        let hash = u16::from_be_bytes([chunk[0], chunk[1]]);
        if is_valid_ikev2_hash(hash) {
            ike_sa.get_keymat().add_hash_algorithm(hash);
            added = true;
        }
    }
    if added {
        ike_sa.enable_extension(Extension::SignatureAuth);
    }
}
