//! SA, KE, NONCE and NOTIFY payload types plus their wire codec.
//!
//! This is the "Payload codec" component of `spec.md` §2 (~10% of the core).
//! Field layouts are grounded in RFC 7296 §3.3–3.10 and the IANA "Transform
//! Type Values"/"Exchange Type" registries, structured as one type per
//! payload kind (`SecurityAssociationPayload`/`KeyExchangePayload`/
//! `NoncePayload`/`Notify`) with a real byte-level codec underneath.

pub mod codec;

use crate::message::Notify;
use serde::{Deserialize, Serialize};

/// Transform types from the IANA "Transform Type Values" registry (RFC 7296
/// §3.3.2, extended by RFC 9370 §5 for additional key exchanges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransformType {
    EncryptionAlgorithm = 1,
    PseudoRandomFunction = 2,
    IntegrityAlgorithm = 3,
    KeyExchangeMethod = 4,
    SequenceNumber = 5,
    AdditionalKeyExchange1 = 6,
    AdditionalKeyExchange2 = 7,
    AdditionalKeyExchange3 = 8,
    AdditionalKeyExchange4 = 9,
    AdditionalKeyExchange5 = 10,
    AdditionalKeyExchange6 = 11,
    AdditionalKeyExchange7 = 12,
    KeyWrapAlgorithm = 13,
    GroupControllerAuthenticationMethod = 14,
}

impl TransformType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::EncryptionAlgorithm,
            2 => Self::PseudoRandomFunction,
            3 => Self::IntegrityAlgorithm,
            4 => Self::KeyExchangeMethod,
            5 => Self::SequenceNumber,
            6 => Self::AdditionalKeyExchange1,
            7 => Self::AdditionalKeyExchange2,
            8 => Self::AdditionalKeyExchange3,
            9 => Self::AdditionalKeyExchange4,
            10 => Self::AdditionalKeyExchange5,
            11 => Self::AdditionalKeyExchange6,
            12 => Self::AdditionalKeyExchange7,
            13 => Self::KeyWrapAlgorithm,
            14 => Self::GroupControllerAuthenticationMethod,
            _ => return None,
        })
    }

    /// The `ADDITIONAL_KEY_EXCHANGE_1..7` transforms in ascending order, as
    /// referenced by `spec.md` §4.6 when computing the key-exchange plan.
    pub const ADDITIONAL: [TransformType; 7] = [
        Self::AdditionalKeyExchange1,
        Self::AdditionalKeyExchange2,
        Self::AdditionalKeyExchange3,
        Self::AdditionalKeyExchange4,
        Self::AdditionalKeyExchange5,
        Self::AdditionalKeyExchange6,
        Self::AdditionalKeyExchange7,
    ];
}

/// A single transform inside a [`Proposal`] (RFC 7296 §3.3.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    pub transform_type: TransformType,
    pub transform_id: u16,
}

impl Transform {
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Self {
            transform_type,
            transform_id,
        }
    }
}

/// One proposal inside a [`SecurityAssociationPayload`] (RFC 7296 §3.3.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_num: u8,
    pub protocol_id: u8,
    pub spi: Vec<u8>,
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// The transform of the given type, if the proposal carries one.
    pub fn transform(&self, kind: TransformType) -> Option<&Transform> {
        self.transforms.iter().find(|t| t.transform_type == kind)
    }

    /// The negotiated method for the primary key exchange
    /// (`TransformType::KeyExchangeMethod`).
    pub fn key_exchange_method(&self) -> Option<u16> {
        self.transform(TransformType::KeyExchangeMethod)
            .map(|t| t.transform_id)
    }

    /// The key-exchange plan this proposal describes: slot 0 is the primary
    /// method, slots 1.. are the present `ADDITIONAL_KEY_EXCHANGE_1..7`
    /// transforms in numerical order, compacted to the front with no gaps —
    /// exactly the rule in `spec.md` §4.6.
    pub fn key_exchange_plan(&self) -> Vec<u16> {
        let mut plan = Vec::with_capacity(8);
        if let Some(method) = self.key_exchange_method() {
            plan.push(method);
        }
        for kind in TransformType::ADDITIONAL {
            if let Some(t) = self.transform(kind) {
                plan.push(t.transform_id);
            }
        }
        plan
    }
}

/// SA payload: the full or single-proposal list exchanged during
/// IKE_SA_INIT (RFC 7296 §3.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssociationPayload {
    pub proposals: Vec<Proposal>,
}

/// KE payload: method code plus the local/peer public value
/// (RFC 7296 §3.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangePayload {
    pub method: u16,
    pub data: Vec<u8>,
}

/// NONCE payload: an opaque random byte string (RFC 7296 §3.9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoncePayload {
    pub data: Vec<u8>,
}

/// Any payload this task produces or consumes, trimmed to the four kinds
/// this task is specified to handle (`spec.md` §1: "produces and consumes
/// only: SA, KE, NONCE, and NOTIFY payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    SecurityAssociation(SecurityAssociationPayload),
    KeyExchange(KeyExchangePayload),
    Nonce(NoncePayload),
    Notify(Notify),
}

impl Payload {
    pub fn as_sa(&self) -> Option<&SecurityAssociationPayload> {
        match self {
            Self::SecurityAssociation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_ke(&self) -> Option<&KeyExchangePayload> {
        match self {
            Self::KeyExchange(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_nonce(&self) -> Option<&NoncePayload> {
        match self {
            Self::Nonce(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_notify(&self) -> Option<&Notify> {
        match self {
            Self::Notify(n) => Some(n),
            _ => None,
        }
    }
}
