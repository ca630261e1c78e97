//! Byte-level encode/decode for SA, KE and NONCE payload bodies.
//!
//! Field layouts follow RFC 7296 §3.3 (SA/Proposal/Transform), §3.4 (KE) and
//! §3.9 (NONCE); the same structures documented in the `ikebuster`
//! `ProposalHeader`/`TransformHeader`/`KeyExchangeHeader` definitions this
//! crate was grounded against. Transform attributes are not emitted: every
//! transform used by this task (encryption, PRF, integrity, KE methods) is
//! referenced by its transform ID alone, never a keyed variant, so the
//! attribute sub-TLV is simply absent, matching RFC 7296 where attributes
//! are optional.
//!
//! Each `encode_*`/`decode_*` pair round-trips: `decode_x(&encode_x(v)) == v`
//! for every payload type this task handles (`spec.md` §8).

use super::{KeyExchangePayload, NoncePayload, Proposal, SecurityAssociationPayload, Transform};
use crate::error::PayloadCodecError;

const LAST_SUBSTRUCT_NONE: u8 = 0;
const LAST_SUBSTRUCT_MORE: u8 = 2; // value mandated for Proposal by RFC 7296
const TRANSFORM_MORE: u8 = 3; // value mandated for Transform by RFC 7296

fn need(have: usize, want: usize) -> Result<(), PayloadCodecError> {
    if have < want {
        Err(PayloadCodecError::Truncated {
            need: want,
            have,
        })
    } else {
        Ok(())
    }
}

pub fn encode_transform(t: &Transform) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.push(LAST_SUBSTRUCT_NONE); // patched by caller when not last
    buf.push(0); // reserved
    buf.extend_from_slice(&8u16.to_be_bytes()); // transform_length (no attributes)
    buf.push(t.transform_type as u8);
    buf.push(0); // reserved
    buf.extend_from_slice(&t.transform_id.to_be_bytes());
    buf
}

fn decode_transform(data: &[u8]) -> Result<(Transform, bool, usize), PayloadCodecError> {
    need(data.len(), 8)?;
    let last_substruct = data[0];
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    need(data.len(), length)?;
    if length < 8 {
        return Err(PayloadCodecError::LengthMismatch {
            declared: length,
            available: data.len(),
        });
    }
    let transform_type = super::TransformType::from_u8(data[4])
        .ok_or(PayloadCodecError::UnknownPayloadType(data[4]))?;
    let transform_id = u16::from_be_bytes([data[6], data[7]]);
    let has_more = last_substruct == TRANSFORM_MORE;
    Ok((
        Transform {
            transform_type,
            transform_id,
        },
        has_more,
        length,
    ))
}

pub fn encode_proposal(p: &Proposal) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(p.proposal_num);
    body.push(p.protocol_id);
    body.push(p.spi.len() as u8);
    body.push(p.transforms.len() as u8);
    body.extend_from_slice(&p.spi);

    for (i, t) in p.transforms.iter().enumerate() {
        let mut tbuf = encode_transform(t);
        if i + 1 < p.transforms.len() {
            tbuf[0] = TRANSFORM_MORE;
        }
        body.extend_from_slice(&tbuf);
    }

    let mut buf = Vec::with_capacity(body.len() + 4);
    buf.push(LAST_SUBSTRUCT_NONE); // patched by caller when not last
    buf.push(0);
    buf.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

fn decode_proposal(data: &[u8]) -> Result<(Proposal, bool, usize), PayloadCodecError> {
    need(data.len(), 8)?;
    let last_substruct = data[0];
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    need(data.len(), length)?;
    if length < 8 {
        return Err(PayloadCodecError::LengthMismatch {
            declared: length,
            available: data.len(),
        });
    }
    let proposal_num = data[4];
    let protocol_id = data[5];
    let spi_size = data[6] as usize;
    let num_transforms = data[7] as usize;

    let mut offset = 8;
    need(length, offset + spi_size)?;
    let spi = data[offset..offset + spi_size].to_vec();
    offset += spi_size;

    let mut transforms = Vec::with_capacity(num_transforms);
    for i in 0..num_transforms {
        let (t, has_more, tlen) = decode_transform(&data[offset..length])?;
        transforms.push(t);
        offset += tlen;
        let is_last = i + 1 == num_transforms;
        if has_more == is_last {
            // A transform claims to continue past the last one, or stops short.
            return Err(PayloadCodecError::LengthMismatch {
                declared: num_transforms,
                available: transforms.len(),
            });
        }
    }
    if transforms.is_empty() {
        return Err(PayloadCodecError::EmptyProposal);
    }

    let is_last = last_substruct == LAST_SUBSTRUCT_NONE;
    Ok((
        Proposal {
            proposal_num,
            protocol_id,
            spi,
            transforms,
        },
        !is_last,
        length,
    ))
}

pub fn encode_sa(sa: &SecurityAssociationPayload) -> Vec<u8> {
    let mut buf = Vec::new();
    for (i, p) in sa.proposals.iter().enumerate() {
        let mut pbuf = encode_proposal(p);
        if i + 1 < sa.proposals.len() {
            pbuf[0] = LAST_SUBSTRUCT_MORE;
        }
        buf.extend_from_slice(&pbuf);
    }
    buf
}

pub fn decode_sa(data: &[u8]) -> Result<SecurityAssociationPayload, PayloadCodecError> {
    let mut proposals = Vec::new();
    let mut offset = 0;
    loop {
        if offset >= data.len() {
            break;
        }
        let (proposal, has_more, plen) = decode_proposal(&data[offset..])?;
        proposals.push(proposal);
        offset += plen;
        if !has_more {
            break;
        }
    }
    if offset != data.len() {
        return Err(PayloadCodecError::LengthMismatch {
            declared: offset,
            available: data.len(),
        });
    }
    Ok(SecurityAssociationPayload { proposals })
}

pub fn encode_ke(ke: &KeyExchangePayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ke.data.len());
    buf.extend_from_slice(&ke.method.to_be_bytes());
    buf.extend_from_slice(&[0, 0]); // reserved
    buf.extend_from_slice(&ke.data);
    buf
}

pub fn decode_ke(data: &[u8]) -> Result<KeyExchangePayload, PayloadCodecError> {
    need(data.len(), 4)?;
    let method = u16::from_be_bytes([data[0], data[1]]);
    Ok(KeyExchangePayload {
        method,
        data: data[4..].to_vec(),
    })
}

pub fn encode_nonce(n: &NoncePayload) -> Vec<u8> {
    n.data.clone()
}

pub fn decode_nonce(data: &[u8]) -> Result<NoncePayload, PayloadCodecError> {
    Ok(NoncePayload {
        data: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::TransformType;

    fn sample_proposal(num: u8, transforms: Vec<Transform>) -> Proposal {
        Proposal {
            proposal_num: num,
            protocol_id: 1,
            spi: vec![],
            transforms,
        }
    }

    #[test]
    fn sa_round_trip_single_proposal() {
        let sa = SecurityAssociationPayload {
            proposals: vec![sample_proposal(
                1,
                vec![
                    Transform::new(TransformType::EncryptionAlgorithm, 20),
                    Transform::new(TransformType::PseudoRandomFunction, 5),
                    Transform::new(TransformType::IntegrityAlgorithm, 12),
                    Transform::new(TransformType::KeyExchangeMethod, 19),
                ],
            )],
        };
        let bytes = encode_sa(&sa);
        let decoded = decode_sa(&bytes).unwrap();
        assert_eq!(sa, decoded);
    }

    #[test]
    fn sa_round_trip_multiple_proposals() {
        let sa = SecurityAssociationPayload {
            proposals: vec![
                sample_proposal(1, vec![Transform::new(TransformType::KeyExchangeMethod, 19)]),
                sample_proposal(2, vec![Transform::new(TransformType::KeyExchangeMethod, 14)]),
            ],
        };
        let bytes = encode_sa(&sa);
        let decoded = decode_sa(&bytes).unwrap();
        assert_eq!(sa, decoded);
    }

    #[test]
    fn sa_with_multi_ke_transforms_round_trips() {
        let sa = SecurityAssociationPayload {
            proposals: vec![sample_proposal(
                1,
                vec![
                    Transform::new(TransformType::KeyExchangeMethod, 19),
                    Transform::new(TransformType::AdditionalKeyExchange1, 0x0200),
                ],
            )],
        };
        let bytes = encode_sa(&sa);
        let decoded = decode_sa(&bytes).unwrap();
        assert_eq!(sa.proposals[0].key_exchange_plan(), vec![19, 0x0200]);
        assert_eq!(sa, decoded);
    }

    #[test]
    fn ke_round_trips() {
        let ke = KeyExchangePayload {
            method: 19,
            data: vec![1, 2, 3, 4, 5],
        };
        let bytes = encode_ke(&ke);
        assert_eq!(decode_ke(&bytes).unwrap(), ke);
    }

    #[test]
    fn nonce_round_trips() {
        let nonce = NoncePayload {
            data: vec![0xAA; 32],
        };
        let bytes = encode_nonce(&nonce);
        assert_eq!(decode_nonce(&bytes).unwrap(), nonce);
    }

    #[test]
    fn truncated_sa_is_rejected() {
        assert!(decode_sa(&[0, 0, 0]).is_err());
    }

    #[test]
    fn empty_proposal_is_rejected() {
        let sa = SecurityAssociationPayload {
            proposals: vec![sample_proposal(1, vec![])],
        };
        let bytes = encode_sa(&sa);
        assert!(decode_sa(&bytes).is_err());
    }
}
