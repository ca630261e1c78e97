//! Wire message seam: the collaborator described in `spec.md` §6 as `Message`.
//!
//! The task never touches raw bytes directly — it reads and writes typed
//! [`Payload`] values through a [`Message`] — the transport, fragmentation
//! and retransmission machinery that turns a `Message` into bytes on the
//! wire is out of scope (`spec.md` §1 Non-goals) and lives in the daemon
//! this task is embedded in.

use std::net::SocketAddr;

use crate::payload::Payload;

/// Value of the "Exchange Type" octet in an IKEv2 header (RFC 7296 §3.1,
/// extended by RFC 9242/9370). Numeric values match the IANA registry, as
/// used by the teacher's own `ExchangeType` in `network::ike::mod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ExchangeType {
    IkeSaInit = 34,
    IkeAuth = 35,
    CreateChildSa = 36,
    Informational = 37,
    IkeIntermediate = 43,
    IkeFollowupKeyExchange = 44,
}

/// Notify message type codes this task sends or recognises. Values per the
/// IANA "IKEv2 Notify Message Types" registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum NotifyType {
    InvalidKeyPayload = 17,
    NoProposalChosen = 14,
    Cookie = 16390,
    RedirectSupported = 16406,
    Redirect = 16407,
    RedirectedFrom = 16408,
    ChildlessIkev2Supported = 16418,
    FragmentationSupported = 16430,
    SignatureHashAlgorithms = 16431,
    UsePpk = 16435,
}

impl NotifyType {
    /// Notify types with a numeric value below 16384 report exchange errors
    /// (`spec.md` §4.5, §7 `UnknownNotifyError`); everything at or above it
    /// only advertises capabilities and must be ignored if unrecognised.
    pub fn is_error_range(raw: u16) -> bool {
        raw < 16384
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            17 => Some(Self::InvalidKeyPayload),
            14 => Some(Self::NoProposalChosen),
            16390 => Some(Self::Cookie),
            16406 => Some(Self::RedirectSupported),
            16407 => Some(Self::Redirect),
            16408 => Some(Self::RedirectedFrom),
            16418 => Some(Self::ChildlessIkev2Supported),
            16430 => Some(Self::FragmentationSupported),
            16431 => Some(Self::SignatureHashAlgorithms),
            16435 => Some(Self::UsePpk),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// One notify payload: type code plus opaque data, trimmed to the fields
/// this task actually populates (no SPI — IKE-SA-scoped notifies never
/// carry one, per `spec.md` §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Notify {
    pub critical: bool,
    pub notify_type: u16,
    pub data: Vec<u8>,
}

/// A seam onto the outer IKE message the task builds and consumes.
///
/// This is the Rust rendering of `spec.md` §6's `Message` collaborator.
/// Concrete implementations own the full payload list and exchange-type
/// header field; the wire encoding of that list is entirely outside this
/// task (see [`crate::payload`] for the sub-payloads the task itself
/// encodes and decodes).
pub trait Message {
    fn set_exchange_type(&mut self, exchange_type: ExchangeType);
    fn get_exchange_type(&self) -> Option<ExchangeType>;

    fn add_payload(&mut self, payload: Payload);
    /// First payload of the requested discriminant, if present.
    fn get_payload(&self, discriminant: PayloadKind) -> Option<&Payload>;
    fn get_notify(&self, notify_type: u16) -> Option<&Notify>;
    fn payloads(&self) -> &[Payload];

    fn add_notify(&mut self, critical: bool, notify_type: u16, data: Vec<u8>);

    fn get_source(&self) -> SocketAddr;
    fn get_destination(&self) -> SocketAddr;
}

/// Discriminant used to query [`Message::get_payload`] without borrowing a
/// whole [`Payload`] just to match on its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    SecurityAssociation,
    KeyExchange,
    Nonce,
}

/// A minimal in-memory [`Message`] implementation, sufficient to drive the
/// task end to end in tests and the demonstration binary. Ordering of
/// `add_payload`/`add_notify` calls is preserved, matching the ordered
/// construction `spec.md` §4.2 mandates. Notifies are stored as ordinary
/// [`Payload::Notify`] entries in the same list, the way a real IKEv2
/// message enumerates all payloads uniformly regardless of type.
#[derive(Debug, Clone)]
pub struct InMemoryMessage {
    exchange_type: Option<ExchangeType>,
    payloads: Vec<Payload>,
    source: SocketAddr,
    destination: SocketAddr,
}

impl InMemoryMessage {
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            exchange_type: None,
            payloads: Vec::new(),
            source,
            destination,
        }
    }
}

impl Message for InMemoryMessage {
    fn set_exchange_type(&mut self, exchange_type: ExchangeType) {
        self.exchange_type = Some(exchange_type);
    }

    fn get_exchange_type(&self) -> Option<ExchangeType> {
        self.exchange_type
    }

    fn add_payload(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }

    fn get_payload(&self, discriminant: PayloadKind) -> Option<&Payload> {
        self.payloads.iter().find(|p| match (p, discriminant) {
            (Payload::SecurityAssociation(_), PayloadKind::SecurityAssociation) => true,
            (Payload::KeyExchange(_), PayloadKind::KeyExchange) => true,
            (Payload::Nonce(_), PayloadKind::Nonce) => true,
            _ => false,
        })
    }

    fn get_notify(&self, notify_type: u16) -> Option<&Notify> {
        self.payloads.iter().find_map(|p| match p.as_notify() {
            Some(n) if n.notify_type == notify_type => Some(n),
            _ => None,
        })
    }

    fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    fn add_notify(&mut self, critical: bool, notify_type: u16, data: Vec<u8>) {
        self.payloads.push(Payload::Notify(Notify {
            critical,
            notify_type,
            data,
        }));
    }

    fn get_source(&self) -> SocketAddr {
        self.source
    }

    fn get_destination(&self) -> SocketAddr {
        self.destination
    }
}
