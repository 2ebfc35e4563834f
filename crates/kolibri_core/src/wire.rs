//! Swarm datagram framing (C6, §4.6 "Wire format").
//!
//! `magic(4) || version(1) || type(1) || sender_id(4 BE) || port(2 BE) ||
//! payload_len(2 BE) || payload || hmac(32)`. The HMAC covers every byte
//! before it.

use crate::error::{KolibriError, KolibriResult};
use crate::genome::{constant_time_eq, hmac_sha256};

pub const MAGIC: [u8; 4] = *b"KSP\0";
pub const VERSION: u8 = 1;

pub const TYPE_HELLO: u8 = 1;
pub const TYPE_FORMULA: u8 = 2;

const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 2 + 2;
const HMAC_SIZE: usize = 32;
/// Ceiling on a whole wire datagram, header through trailing HMAC.
pub const MAX_DATAGRAM: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Hello,
    Formula { gene_digits: Vec<u8>, fitness: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub sender_id: u32,
    pub port: u16,
    pub payload: Payload,
}

fn formula_payload_bytes(gene_digits: &[u8], fitness: f64) -> KolibriResult<Vec<u8>> {
    if gene_digits.len() > u8::MAX as usize {
        return Err(KolibriError::InvalidArgument("gene digits exceed 255 bytes".into()));
    }
    let mut out = Vec::with_capacity(1 + gene_digits.len() + 8);
    out.push(gene_digits.len() as u8);
    out.extend_from_slice(gene_digits);
    out.extend_from_slice(&fitness.to_bits().to_be_bytes());
    Ok(out)
}

/// Build and HMAC-sign a complete datagram, ready to send.
pub fn encode_datagram(
    key: &[u8],
    msg_type: u8,
    sender_id: u32,
    port: u16,
    payload: &[u8],
) -> KolibriResult<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(KolibriError::InvalidArgument("payload too large".into()));
    }

    let mut body = Vec::with_capacity(HEADER_LEN + payload.len());
    body.extend_from_slice(&MAGIC);
    body.push(VERSION);
    body.push(msg_type);
    body.extend_from_slice(&sender_id.to_be_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    body.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    body.extend_from_slice(payload);

    let hmac = hmac_sha256(key, &body);
    body.extend_from_slice(&hmac);

    if body.len() > MAX_DATAGRAM {
        return Err(KolibriError::InvalidArgument("datagram exceeds 512 bytes".into()));
    }
    Ok(body)
}

pub fn encode_hello(key: &[u8], sender_id: u32, port: u16) -> KolibriResult<Vec<u8>> {
    encode_datagram(key, TYPE_HELLO, sender_id, port, &[])
}

pub fn encode_formula(
    key: &[u8],
    sender_id: u32,
    port: u16,
    gene_digits: &[u8],
    fitness: f64,
) -> KolibriResult<Vec<u8>> {
    let payload = formula_payload_bytes(gene_digits, fitness)?;
    encode_datagram(key, TYPE_FORMULA, sender_id, port, &payload)
}

/// Verify and parse a raw datagram. Returns `None` for any of the receive
/// path's "silently drop" conditions (malformed, unauthenticated, wrong
/// version, or a loop-back from `self_id`) rather than an error — none of
/// those are exceptional on a best-effort gossip socket.
pub fn decode_datagram(buf: &[u8], key: &[u8], self_id: u32) -> Option<Decoded> {
    if buf.len() < HEADER_LEN + HMAC_SIZE {
        return None;
    }
    let (body, provided_hmac) = buf.split_at(buf.len() - HMAC_SIZE);
    let expected_hmac = hmac_sha256(key, body);
    if !constant_time_eq(provided_hmac, &expected_hmac) {
        return None;
    }

    if body[0..4] != MAGIC {
        return None;
    }
    if body[4] != VERSION {
        return None;
    }
    let msg_type = body[5];
    let sender_id = u32::from_be_bytes(body[6..10].try_into().ok()?);
    let port = u16::from_be_bytes(body[10..12].try_into().ok()?);
    let payload_len = u16::from_be_bytes(body[12..14].try_into().ok()?) as usize;

    let rest = &body[HEADER_LEN..];
    if payload_len > rest.len() {
        return None;
    }
    let payload_bytes = &rest[..payload_len];

    if sender_id == self_id {
        return None;
    }

    let payload = match msg_type {
        TYPE_HELLO => Payload::Hello,
        TYPE_FORMULA => {
            if payload_bytes.is_empty() {
                return None;
            }
            let gene_length = payload_bytes[0] as usize;
            if payload_bytes.len() < 1 + gene_length + 8 {
                return None;
            }
            let gene_digits = payload_bytes[1..1 + gene_length].to_vec();
            let fitness_bits =
                u64::from_be_bytes(payload_bytes[1 + gene_length..1 + gene_length + 8].try_into().ok()?);
            Payload::Formula { gene_digits, fitness: f64::from_bits(fitness_bits) }
        }
        _ => return None,
    };

    Some(Decoded { sender_id, port, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"swarm-key-0123456";

    #[test]
    fn hello_round_trips() {
        let datagram = encode_hello(KEY, 7, 9000).unwrap();
        let decoded = decode_datagram(&datagram, KEY, 1).unwrap();
        assert_eq!(decoded.sender_id, 7);
        assert_eq!(decoded.port, 9000);
        assert_eq!(decoded.payload, Payload::Hello);
    }

    #[test]
    fn formula_round_trips() {
        let digits = vec![1u8, 2, 3, 4, 5];
        let datagram = encode_formula(KEY, 7, 9000, &digits, 0.875).unwrap();
        let decoded = decode_datagram(&datagram, KEY, 1).unwrap();
        match decoded.payload {
            Payload::Formula { gene_digits, fitness } => {
                assert_eq!(gene_digits, digits);
                assert_eq!(fitness, 0.875);
            }
            _ => panic!("expected a formula payload"),
        }
    }

    #[test]
    fn self_id_is_dropped() {
        let datagram = encode_hello(KEY, 7, 9000).unwrap();
        assert!(decode_datagram(&datagram, KEY, 7).is_none());
    }

    #[test]
    fn wrong_key_is_dropped() {
        let datagram = encode_hello(KEY, 7, 9000).unwrap();
        assert!(decode_datagram(&datagram, b"a-different-key!", 1).is_none());
    }

    #[test]
    fn truncated_datagram_is_dropped() {
        let datagram = encode_hello(KEY, 7, 9000).unwrap();
        assert!(decode_datagram(&datagram[..10], KEY, 1).is_none());
    }

    #[test]
    fn tampered_byte_is_dropped() {
        let mut datagram = encode_hello(KEY, 7, 9000).unwrap();
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;
        assert!(decode_datagram(&datagram, KEY, 1).is_none());
    }

    #[test]
    fn oversized_gene_digits_are_rejected_at_encode_time() {
        let digits = vec![0u8; 256];
        assert!(encode_formula(KEY, 1, 1, &digits, 0.0).is_err());
    }
}
