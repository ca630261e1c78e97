//! Keymat deriver: the "Keymat deriver" component of `spec.md` §2 (~10% of
//! the core) — turns the selected proposal, the completed key-exchange
//! chain and both nonces into the suite of IKE_SA keys (`spec.md` §4.7).
//!
//! The PRF+ construction follows RFC 7296 §2.13/2.14, built on
//! `ring::hmac` the way a crypto module typically derives its session keys.
//! Every derived key is a fixed 32 bytes; a real
//! daemon would size each key from the negotiated transform (the
//! encryption/PRF/integrity algorithm widths), but that mapping lives in
//! the crypto registry this task treats as an external collaborator, so a
//! single fixed width keeps the derivation runnable without inventing that
//! registry.

use ring::hmac;

use crate::bus::Bus;
use crate::error::KeymatError;
use crate::keyexchange::{DefaultKeyExchangeFactory, KeyExchange, KeyExchangeFactory};
use crate::noncegen::{NonceGen, SystemNonceGen};
use crate::payload::Proposal;

const KEY_LEN: usize = 32;

/// The derived IKE_SA key suite (`spec.md` GLOSSARY "Keymat").
#[derive(Debug, Clone, Default)]
pub struct IkeKeys {
    pub sk_d: Vec<u8>,
    pub sk_ai: Vec<u8>,
    pub sk_ar: Vec<u8>,
    pub sk_ei: Vec<u8>,
    pub sk_er: Vec<u8>,
    pub sk_pi: Vec<u8>,
    pub sk_pr: Vec<u8>,
}

fn prf(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// RFC 7296 §2.13 `prf+`: `T1 | T2 | ... ` until `len` bytes are available.
fn prf_plus(key: &[u8], seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + KEY_LEN);
    let mut t = Vec::new();
    let mut counter = 1u8;
    while out.len() < len {
        let mut input = t.clone();
        input.extend_from_slice(seed);
        input.push(counter);
        t = prf(key, &input);
        out.extend_from_slice(&t);
        counter += 1;
    }
    out.truncate(len);
    out
}

/// `spec.md` §6 `Keymat (v2)`.
pub trait Keymat: Send {
    fn create_ke(&self, method: u16) -> Result<Box<dyn KeyExchange>, KeymatError>;
    fn create_nonce_gen(&self) -> Box<dyn NonceGen>;

    /// Derives the new IKE_SA key suite from the selected `proposal`, the
    /// completed key exchanges in plan order, both nonces and the IKE_SA
    /// identifier. `prf_alg`/`sk_d` carry the predecessor's PRF and `SK_d`
    /// when chaining from a prior SA (rekey, or the primary exchange
    /// feeding an intermediate exchange); `None` for a from-scratch
    /// initial derivation. Returns whether derivation succeeded; on
    /// success publishes `ike_keys` on `bus`.
    #[allow(clippy::too_many_arguments)]
    fn derive_ike_keys(
        &mut self,
        proposal: &Proposal,
        kes: &[Box<dyn KeyExchange>],
        nonce_i: &[u8],
        nonce_r: &[u8],
        sa_id: u64,
        prf_alg: Option<u16>,
        sk_d: Option<&[u8]>,
        bus: &dyn Bus,
    ) -> bool;

    fn add_hash_algorithm(&mut self, hash: u16);
    /// The PRF algorithm and `SK_d` produced by the last successful
    /// derivation, for a future rekey or intermediate exchange to chain
    /// from.
    fn get_skd(&self) -> Option<(u16, &[u8])>;
}

/// Default [`Keymat`] implementation, backed by [`DefaultKeyExchangeFactory`]
/// and [`SystemNonceGen`].
pub struct DefaultKeymat {
    ke_factory: DefaultKeyExchangeFactory,
    hash_algorithms: Vec<u16>,
    keys: Option<IkeKeys>,
    /// PRF algorithm paired with the last-derived `SK_d`; `0` is used as a
    /// stand-in PRF identifier since this task treats the PRF as an opaque
    /// code, never invoking a negotiated-algorithm registry.
    skd: Option<(u16, Vec<u8>)>,
}

impl Default for DefaultKeymat {
    fn default() -> Self {
        Self {
            ke_factory: DefaultKeyExchangeFactory,
            hash_algorithms: Vec::new(),
            keys: None,
            skd: None,
        }
    }
}

impl DefaultKeymat {
    pub fn keys(&self) -> Option<&IkeKeys> {
        self.keys.as_ref()
    }

    pub fn hash_algorithms(&self) -> &[u16] {
        &self.hash_algorithms
    }
}

impl Keymat for DefaultKeymat {
    fn create_ke(&self, method: u16) -> Result<Box<dyn KeyExchange>, KeymatError> {
        self.ke_factory.create_ke(method)
    }

    fn create_nonce_gen(&self) -> Box<dyn NonceGen> {
        Box::new(SystemNonceGen::default())
    }

    fn derive_ike_keys(
        &mut self,
        proposal: &Proposal,
        kes: &[Box<dyn KeyExchange>],
        nonce_i: &[u8],
        nonce_r: &[u8],
        sa_id: u64,
        prf_alg: Option<u16>,
        sk_d: Option<&[u8]>,
        bus: &dyn Bus,
    ) -> bool {
        if kes.is_empty() {
            tracing::error!("derive_ike_keys called with no completed key exchanges");
            return false;
        }

        let mut shared = Vec::new();
        for ke in kes {
            let Some(secret) = ke.cached_shared_secret() else {
                tracing::error!(method = ke.get_method(), "key exchange has no shared secret");
                return false;
            };
            shared.extend_from_slice(secret);
        }

        let mut seed = Vec::with_capacity(nonce_i.len() + nonce_r.len());
        seed.extend_from_slice(nonce_i);
        seed.extend_from_slice(nonce_r);

        // SKEYSEED = prf(Ni | Nr, g^ir), or prf(SK_d_old, g^ir | Ni | Nr) when
        // chaining from a predecessor (RFC 7296 §2.18).
        let skeyseed = match sk_d {
            Some(old_sk_d) => {
                let mut chained = shared.clone();
                chained.extend_from_slice(nonce_i);
                chained.extend_from_slice(nonce_r);
                prf(old_sk_d, &chained)
            }
            None => prf(&seed, &shared),
        };

        let mut prf_seed = Vec::with_capacity(seed.len() + 16);
        prf_seed.extend_from_slice(nonce_i);
        prf_seed.extend_from_slice(nonce_r);
        prf_seed.extend_from_slice(&sa_id.to_be_bytes());

        let material = prf_plus(&skeyseed, &prf_seed, KEY_LEN * 7);
        let mut chunks = material.chunks_exact(KEY_LEN);
        let keys = IkeKeys {
            sk_d: chunks.next().unwrap().to_vec(),
            sk_ai: chunks.next().unwrap().to_vec(),
            sk_ar: chunks.next().unwrap().to_vec(),
            sk_ei: chunks.next().unwrap().to_vec(),
            sk_er: chunks.next().unwrap().to_vec(),
            sk_pi: chunks.next().unwrap().to_vec(),
            sk_pr: chunks.next().unwrap().to_vec(),
        };

        tracing::info!(proposal_num = proposal.proposal_num, "derived ike keys");
        self.skd = Some((prf_alg.unwrap_or(0), keys.sk_d.clone()));
        self.keys = Some(keys);

        let predecessor = match (prf_alg, sk_d) {
            (Some(alg), Some(d)) => Some((alg, d)),
            _ => None,
        };
        bus.ike_keys(proposal, kes, nonce_i, nonce_r, predecessor);
        true
    }

    fn add_hash_algorithm(&mut self, hash: u16) {
        if !self.hash_algorithms.contains(&hash) {
            self.hash_algorithms.push(hash);
        }
    }

    fn get_skd(&self) -> Option<(u16, &[u8])> {
        self.skd.as_ref().map(|(alg, d)| (*alg, d.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TracingBus;
    use crate::keyexchange::{DefaultKeyExchangeFactory, KeyExchangeFactory};
    use crate::payload::{Transform, TransformType};

    fn sample_proposal() -> Proposal {
        Proposal {
            proposal_num: 1,
            protocol_id: 1,
            spi: vec![1, 2, 3, 4, 5, 6, 7, 8],
            transforms: vec![Transform::new(TransformType::KeyExchangeMethod, 19)],
        }
    }

    fn completed_pair() -> (Box<dyn KeyExchange>, Box<dyn KeyExchange>) {
        let factory = DefaultKeyExchangeFactory;
        let mut a = factory.create_ke(19).unwrap();
        let mut b = factory.create_ke(19).unwrap();
        b.set_public_key(a.get_public_key());
        a.set_public_key(b.get_public_key());
        a.get_shared_secret();
        b.get_shared_secret();
        (a, b)
    }

    #[test]
    fn both_sides_derive_identical_keymat() {
        let (a, b) = completed_pair();
        let proposal = sample_proposal();
        let bus = TracingBus;
        let ni = vec![0xAA; 32];
        let nr = vec![0xBB; 32];

        let mut keymat_i = DefaultKeymat::default();
        let mut keymat_r = DefaultKeymat::default();

        assert!(keymat_i.derive_ike_keys(&proposal, &[a], &ni, &nr, 42, None, None, &bus));
        assert!(keymat_r.derive_ike_keys(&proposal, &[b], &ni, &nr, 42, None, None, &bus));

        let ki = keymat_i.keys().unwrap();
        let kr = keymat_r.keys().unwrap();
        assert_eq!(ki.sk_d, kr.sk_d);
        assert_eq!(ki.sk_ei, kr.sk_ei);
        assert_eq!(ki.sk_pr, kr.sk_pr);
    }

    #[test]
    fn rekey_derivation_differs_from_initial() {
        let (a, _b) = completed_pair();
        let proposal = sample_proposal();
        let bus = TracingBus;
        let ni = vec![0xAA; 32];
        let nr = vec![0xBB; 32];

        let mut fresh = DefaultKeymat::default();
        assert!(fresh.derive_ike_keys(&proposal, &[a], &ni, &nr, 7, None, None, &bus));

        let (a2, _b2) = completed_pair();
        let mut rekeyed = DefaultKeymat::default();
        let old_sk_d = vec![0x11; 32];
        assert!(rekeyed.derive_ike_keys(
            &proposal,
            &[a2],
            &ni,
            &nr,
            7,
            Some(2),
            Some(&old_sk_d),
            &bus
        ));

        assert_ne!(fresh.keys().unwrap().sk_d, rekeyed.keys().unwrap().sk_d);
    }

    #[test]
    fn add_hash_algorithm_deduplicates() {
        let mut keymat = DefaultKeymat::default();
        keymat.add_hash_algorithm(2);
        keymat.add_hash_algorithm(2);
        keymat.add_hash_algorithm(4);
        assert_eq!(keymat.hash_algorithms(), &[2, 4]);
    }
}
