//! Error types for the IKE_SA initial exchange task and its collaborators.
//!
//! Each module-local error converts into [`TaskError`] via `#[from]`, the way
//! a daemon with several subsystems layers a per-subsystem error underneath
//! one top-level error type.

use thiserror::Error;

/// Errors raised by the proposal selector.
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("no proposal accepted by peer or local configuration")]
    NoAcceptableProposal,
}

/// Errors raised by the payload codec while decoding untrusted wire data.
#[derive(Debug, Error)]
pub enum PayloadCodecError {
    #[error("payload truncated: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("payload length field ({declared}) disagrees with available data ({available})")]
    LengthMismatch { declared: usize, available: usize },
    #[error("unknown or unsupported payload type {0}")]
    UnknownPayloadType(u8),
    #[error("proposal contained zero transforms")]
    EmptyProposal,
}

/// Errors raised by the keymat deriver.
#[derive(Debug, Error)]
pub enum KeymatError {
    #[error("crypto provider could not instantiate key exchange method {0}")]
    UnsupportedMethod(u16),
    #[error("key derivation failed in the underlying crypto provider")]
    DerivationFailed,
    #[error("nonce source exhausted or unavailable")]
    NonceUnavailable,
}

/// The task's own error type, covering every failure mode in `spec.md` §7.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("nonce allocation failed: {0}")]
    NonceAllocationFailed(KeymatError),
    #[error("crypto provider could not instantiate key exchange method {0}")]
    UnsupportedKeMethod(u16),
    #[error("proposal selector found no acceptable proposal")]
    ProposalMismatch(#[from] ProposalError),
    #[error("peer's key exchange group does not match the selected proposal")]
    WrongKeGroup { expected: u16, got: u16 },
    #[error("key exchange application failed: peer public value rejected")]
    KeApplyFailed,
    #[error("responder requested a cookie challenge")]
    CookieChallenge,
    #[error("responder requested a different key exchange group")]
    InvalidKeRetry,
    #[error("response echoed a cookie we already sent, aborting to avoid a loop")]
    DuplicateCookie,
    #[error("responder requested redirection to another gateway")]
    RedirectRequested,
    #[error("redirect notify was unparsable or echoed the wrong nonce")]
    InvalidRedirect,
    #[error("retry limit ({0}) reached")]
    RetryLimitReached(u32),
    #[error("peer sent an unrecognised error notify (type {0})")]
    UnknownNotifyError(u16),
    #[error("payload codec error: {0}")]
    Codec(#[from] PayloadCodecError),
    #[error("configuration error: {0}")]
    Configuration(#[from] config::ConfigError),
}
