//! Nonce source: the "Nonce source" component of `spec.md` §2 (~3% of the
//! core) — produces the random `Ni`/`Nr` values IKE_SA_INIT exchanges and
//! the derivation in `spec.md` §4.7 consumes.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::KeymatError;

/// RFC 7296 §2.10 bounds a nonce to at least half the negotiated PRF key
/// size and no more than 256 bits; every PRF this task supports needs at
/// most 32 bytes of entropy, so a fixed 32-byte nonce satisfies the lower
/// bound for all of them.
pub const NONCE_LEN: usize = 32;

/// Generates the local nonce for one IKE_SA_INIT exchange. Mirrors
/// `spec.md` §6 `Keymat::create_nonce_gen`.
pub trait NonceGen: Send {
    /// A fresh random nonce of at least [`NONCE_LEN`] bytes. Failure is
    /// fatal to the exchange (`spec.md` §4.1 "Entropy source failure (fatal,
    /// aborts IKE_SA_INIT)") — there is no degraded fallback.
    fn generate(&self) -> Result<Vec<u8>, KeymatError>;
}

/// [`NonceGen`] backed by the platform RNG via `ring::rand::SystemRandom`,
/// the same source the keymat deriver uses for its own key material.
#[derive(Default)]
pub struct SystemNonceGen {
    rng: SystemRandom,
}

impl NonceGen for SystemNonceGen {
    fn generate(&self) -> Result<Vec<u8>, KeymatError> {
        let mut nonce = vec![0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| KeymatError::NonceUnavailable)?;
        Ok(nonce)
    }
}
