//! Event bus seam (`spec.md` §6 `Bus`): the task publishes successful key
//! derivation and raises alerts through this trait rather than calling into
//! logging or metrics directly, keeping cross-subsystem events routed
//! through one seam instead of modules reaching into each other directly.

use crate::keyexchange::KeyExchange;
use crate::payload::Proposal;

/// Alert codes this task can raise. Only `ProposalMismatchIke` is emitted
/// directly (`spec.md` §4.8); the enum stays open for the surrounding
/// daemon's own alerts so one `Bus` implementation can serve everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCode {
    /// No local proposal matched what the peer offered, and no alternative
    /// IKE config resolved the mismatch either.
    ProposalMismatchIke,
}

/// Payload accompanying an [`AlertCode`]. `ProposalMismatchIke` always
/// carries the proposal list that failed to match (`spec.md` §4.8: "the
/// received list" for the first site, "re-enumerate the IKE config's
/// proposals" for the second).
#[derive(Debug, Clone)]
pub enum AlertPayload {
    Proposals(Vec<Proposal>),
}

/// Sink for the events this task publishes (`spec.md` §6 `Bus`).
pub trait Bus: Send + Sync {
    /// Published once keymat derivation succeeds (`spec.md` §4.7): the
    /// completed key-exchange list in plan order, both nonces, and the
    /// predecessor's PRF/`SK_d` (`None` unless a real `SK_d` was chained
    /// in).
    fn ike_keys(
        &self,
        proposal: &Proposal,
        kes: &[Box<dyn KeyExchange>],
        nonce_i: &[u8],
        nonce_r: &[u8],
        predecessor: Option<(u16, &[u8])>,
    );

    fn alert(&self, code: AlertCode, payload: AlertPayload);
}

/// [`Bus`] implementation that reports every event through `tracing`,
/// matching the teacher's habit of logging at the boundary of each
/// subsystem rather than swallowing events silently.
#[derive(Default)]
pub struct TracingBus;

impl Bus for TracingBus {
    fn ike_keys(
        &self,
        proposal: &Proposal,
        kes: &[Box<dyn KeyExchange>],
        nonce_i: &[u8],
        nonce_r: &[u8],
        predecessor: Option<(u16, &[u8])>,
    ) {
        tracing::info!(
            proposal_num = proposal.proposal_num,
            key_exchanges = kes.len(),
            nonce_i_len = nonce_i.len(),
            nonce_r_len = nonce_r.len(),
            chained_from_predecessor = predecessor.is_some(),
            "ike_keys derived"
        );
    }

    fn alert(&self, code: AlertCode, payload: AlertPayload) {
        match (code, payload) {
            (AlertCode::ProposalMismatchIke, AlertPayload::Proposals(proposals)) => {
                tracing::warn!(
                    proposal_count = proposals.len(),
                    "ProposalMismatchIke: no local proposal matched peer offer"
                );
            }
        }
    }
}
