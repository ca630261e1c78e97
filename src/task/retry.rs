//! Retry paths (`spec.md` §4.5): `COOKIE`, `INVALID_KE_PAYLOAD` and
//! `REDIRECT` notifies received by the initiator while waiting on the
//! `IKE_SA_INIT` response.

use super::{IkeInitTask, TaskStatus};
use crate::config::MAX_RETRIES;
use crate::sa::IkeSaHandle;

/// RFC 5685 §4 `REDIRECT` notification data: one octet gateway identity
/// type, one octet length, the identity itself, then the echoed original
/// nonce occupying the remainder of the payload.
pub(super) fn parse_redirect(data: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let &[_gw_ident_type, gw_ident_len, ref rest @ ..] = data else {
        return None;
    };
    let gw_ident_len = gw_ident_len as usize;
    if rest.len() < gw_ident_len {
        return None;
    }
    let (identity, echoed_nonce) = rest.split_at(gw_ident_len);
    if echoed_nonce.is_empty() {
        return None;
    }
    Some((identity.to_vec(), echoed_nonce.to_vec()))
}

impl IkeInitTask {
    /// `COOKIE`: store the cookie to prepend on the next build, bump the
    /// retry counter, reset the SA's negotiation state and retry — up to
    /// `MAX_RETRIES` (`spec.md` §3, §6).
    pub(super) fn handle_cookie_notify(
        &mut self,
        data: &[u8],
        ike_sa: &mut dyn IkeSaHandle,
    ) -> TaskStatus {
        self.retry += 1;
        if self.retry > MAX_RETRIES {
            return TaskStatus::Failed;
        }
        self.cookie = Some(data.to_vec());
        ike_sa.reset();
        self.reset_retry_state();
        TaskStatus::NeedMore
    }

    /// `INVALID_KE_PAYLOAD`: read the group the responder wants instead,
    /// replace `ke_method`, bump the retry counter and reset — except on a
    /// rekey, where the predecessor SA stays in place and only this task's
    /// negotiation state resets.
    pub(super) fn handle_invalid_ke_notify(
        &mut self,
        data: &[u8],
        ike_sa: &mut dyn IkeSaHandle,
    ) -> TaskStatus {
        let &[hi, lo, ..] = data else {
            return TaskStatus::Failed;
        };
        self.retry += 1;
        if self.retry > MAX_RETRIES {
            return TaskStatus::Failed;
        }
        self.ke_method = u16::from_be_bytes([hi, lo]);
        self.ke = None;
        if !self.is_rekey() {
            ike_sa.reset();
        }
        self.reset_retry_state();
        TaskStatus::NeedMore
    }

    /// `REDIRECT`: parse the gateway identity and echoed nonce, validate the
    /// echo against our own nonce, then ask the SA whether the named
    /// gateway is an acceptable redirect target (`spec.md` §4.5, §7
    /// `InvalidRedirect`).
    pub(super) fn handle_redirect_notify(
        &mut self,
        data: &[u8],
        ike_sa: &mut dyn IkeSaHandle,
    ) -> TaskStatus {
        if !self.follow_redirects {
            return TaskStatus::Failed;
        }
        let Some((gateway, echoed_nonce)) = parse_redirect(data) else {
            return TaskStatus::Failed;
        };
        if self.my_nonce.as_deref() != Some(echoed_nonce.as_slice()) {
            return TaskStatus::Failed;
        }
        if ike_sa.handle_redirect(&gateway) {
            TaskStatus::NeedMore
        } else {
            TaskStatus::Failed
        }
    }
}
