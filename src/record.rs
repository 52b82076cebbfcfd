//! The FastCGI wire format: header (de)serialization and the PARAMS name/value codec.
//!
//! Generalizes the teacher's `FcgiHeader`/`FcgiRecord` in `minifcgi.rs` (same
//! `from_be_bytes`/`to_be_bytes` idiom, same `num_derive` enum-to-byte mapping) to the full
//! record type set and to the "incomplete means keep reading" contract spec §4.2 requires
//! instead of erroring on a truncated buffer.

use crate::error::{FcgiError, Result};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// FastCGI protocol version this crate speaks. The only value ever defined.
pub const VERSION: u8 = 1;

/// Length in bytes of a serialized record header.
pub const HEADER_LENGTH: usize = 8;

/// Largest content a single record can carry (content length is a 16-bit field).
pub const MAX_CONTENT_LENGTH: usize = 0xffff;

/// FastCGI record type, spec §3.
#[derive(Debug, FromPrimitive, ToPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

/// The application role declared in a `BEGIN_REQUEST` body, spec §6.
#[derive(Debug, FromPrimitive, ToPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

/// The `protocol_status` byte of an `END_REQUEST` body, spec §6.
#[derive(Debug, FromPrimitive, ToPrimitive, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMultiplexConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

/// An 8-byte FastCGI record header, deserialized.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub version: u8,
    pub rec_type: RecordType,
    pub fcgi_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    /// Builds a header for `content_length` bytes of payload, computing padding automatically.
    pub fn new(rec_type: RecordType, fcgi_id: u16, content_length: u16) -> Self {
        Self {
            version: VERSION,
            rec_type,
            fcgi_id,
            content_length,
            padding_length: calc_padding_length(content_length),
        }
    }

    /// Parses an 8-byte header. Fails on an unrecognized version or record type byte;
    /// this is the one place truncated input can't occur since the caller always supplies
    /// a full 8-byte array.
    pub fn from_bytes(b: &[u8; HEADER_LENGTH]) -> Result<Self> {
        if b[0] != VERSION {
            return Err(FcgiError::UnsupportedVersion(b[0]));
        }
        let rec_type =
            RecordType::from_u8(b[1]).ok_or(FcgiError::UnknownRecordType(b[1]))?;
        Ok(Self {
            version: b[0],
            rec_type,
            fcgi_id: u16::from_be_bytes([b[2], b[3]]),
            content_length: u16::from_be_bytes([b[4], b[5]]),
            padding_length: b[6],
        })
    }

    /// Serializes the header to its 8-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let id = self.fcgi_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            self.version,
            self.rec_type.to_u8().expect("RecordType always maps to a byte"),
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            0,
        ]
    }

    /// Total on-wire size of this record including header, content and padding.
    pub fn framed_length(&self) -> usize {
        HEADER_LENGTH + self.content_length as usize + self.padding_length as usize
    }
}

/// Padding bytes needed so `content_length + padding_length` is a multiple of 8.
pub fn calc_padding_length(content_length: u16) -> u8 {
    (8 - (content_length & 0x7) as u8) & 0x7
}

/// Serializes a complete record (header + content + zero padding) to a fresh `Vec<u8>`.
/// `content` must be at most [`MAX_CONTENT_LENGTH`] bytes; callers split larger payloads
/// into multiple records themselves (the request engine's output streams do this).
pub fn encode_record(rec_type: RecordType, fcgi_id: u16, content: &[u8]) -> Vec<u8> {
    debug_assert!(content.len() <= MAX_CONTENT_LENGTH);
    let header = Header::new(rec_type, fcgi_id, content.len() as u16);
    let mut buf = Vec::with_capacity(header.framed_length());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(content);
    buf.resize(buf.len() + header.padding_length as usize, 0);
    buf
}

/// `BEGIN_REQUEST` body: role, keep-alive flag.
#[derive(Debug, Clone, Copy)]
pub struct BeginRequestBody {
    pub role: Role,
    pub keep_alive: bool,
}

impl BeginRequestBody {
    /// Parses an 8-byte `BEGIN_REQUEST` content field (2 role + 1 flags + 5 reserved).
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < 8 {
            return None;
        }
        let role_num = u16::from_be_bytes([content[0], content[1]]);
        let role = Role::from_u16(role_num)?;
        Some(Self {
            role,
            keep_alive: content[2] & 0x1 != 0,
        })
    }
}

/// Serializes an `END_REQUEST` content field: 4-byte app status, 1-byte protocol status,
/// 3 reserved bytes.
pub fn end_request_body(app_status: u32, protocol_status: ProtocolStatus) -> [u8; 8] {
    let status = app_status.to_be_bytes();
    [
        status[0],
        status[1],
        status[2],
        status[3],
        protocol_status.to_u8().expect("ProtocolStatus always maps to a byte"),
        0,
        0,
        0,
    ]
}

/// `UNKNOWN_TYPE` content field: 1-byte type, 7 reserved bytes.
pub fn unknown_type_body(rec_type: u8) -> [u8; 8] {
    [rec_type, 0, 0, 0, 0, 0, 0, 0]
}

/// Result of parsing one name/value pair out of a PARAMS/GET_VALUES/GET_VALUES_RESULT body.
#[derive(Debug)]
pub enum NameValue<'a> {
    /// A complete pair. `consumed` is the number of bytes (length fields + name + value)
    /// read from the start of the input slice.
    Pair {
        name: &'a [u8],
        value: &'a [u8],
        consumed: usize,
    },
    /// The input ended cleanly — no more pairs.
    End,
    /// The input was truncated partway through a pair.
    Incomplete,
}

/// Parses one length field: 7-bit short form (top bit clear) or 31-bit long form (top bit
/// set, 4 bytes total, big-endian with the top bit masked off).
fn parse_length(buf: &[u8]) -> Option<(usize, usize)> {
    let b0 = *buf.first()?;
    if b0 & 0x80 == 0 {
        Some((b0 as usize, 1))
    } else {
        if buf.len() < 4 {
            return None;
        }
        let v = (((b0 & 0x7f) as usize) << 24)
            | ((buf[1] as usize) << 16)
            | ((buf[2] as usize) << 8)
            | buf[3] as usize;
        Some((v, 4))
    }
}

/// Parses one name/value pair at the start of `buf`. See spec §4.2/§6.
pub fn parse_name_value_pair(buf: &[u8]) -> NameValue<'_> {
    if buf.is_empty() {
        return NameValue::End;
    }
    let Some((name_len, n1)) = parse_length(buf) else {
        return NameValue::Incomplete;
    };
    let Some((value_len, n2)) = parse_length(&buf[n1..]) else {
        return NameValue::Incomplete;
    };
    let header_len = n1 + n2;
    let total = header_len + name_len + value_len;
    if buf.len() < total {
        return NameValue::Incomplete;
    }
    let name = &buf[header_len..header_len + name_len];
    let value = &buf[header_len + name_len..total];
    NameValue::Pair {
        name,
        value,
        consumed: total,
    }
}

/// Encodes one name/value pair using the same length scheme, for `GET_VALUES_RESULT`
/// replies and for clients/tests constructing `PARAMS` bodies.
pub fn encode_name_value_pair(name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + value.len() + 8);
    encode_length(name.len(), &mut out);
    encode_length(value.len(), &mut out);
    out.extend_from_slice(name);
    out.extend_from_slice(value);
    out
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let v = (len as u32) | 0x8000_0000;
        out.extend_from_slice(&v.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = Header::new(RecordType::Stdout, 42, 100);
        let bytes = h.to_bytes();
        let parsed = Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.version, VERSION);
        assert_eq!(parsed.fcgi_id, 42);
        assert_eq!(parsed.content_length, 100);
        assert_eq!(parsed.padding_length, calc_padding_length(100));
    }

    #[test]
    fn padding_rounds_up_to_eight() {
        for (len, pad) in [(0u16, 0u8), (1, 7), (7, 1), (8, 0), (9, 7), (65535, 1)] {
            assert_eq!(calc_padding_length(len), pad);
            assert_eq!((len as usize + pad as usize) % 8, 0);
        }
    }

    #[test]
    fn name_value_short_short() {
        let encoded = encode_name_value_pair(b"KEY", b"VALUE");
        match parse_name_value_pair(&encoded) {
            NameValue::Pair {
                name,
                value,
                consumed,
            } => {
                assert_eq!(name, b"KEY");
                assert_eq!(value, b"VALUE");
                assert_eq!(consumed, encoded.len());
            }
            other => panic!("expected Pair, got {other:?}"),
        }
    }

    #[test]
    fn name_value_long_value() {
        let long_value = vec![b'x'; 200];
        let encoded = encode_name_value_pair(b"BIG", &long_value);
        match parse_name_value_pair(&encoded) {
            NameValue::Pair { name, value, .. } => {
                assert_eq!(name, b"BIG");
                assert_eq!(value, long_value.as_slice());
            }
            other => panic!("expected Pair, got {other:?}"),
        }
    }

    #[test]
    fn name_value_incomplete_on_every_prefix() {
        let encoded = encode_name_value_pair(b"KEY", b"VALUE");
        for n in 0..encoded.len() {
            match parse_name_value_pair(&encoded[..n]) {
                NameValue::Incomplete | NameValue::End => {}
                other => panic!("prefix {n} should be incomplete, got {other:?}"),
            }
        }
        // Full input parses.
        assert!(matches!(
            parse_name_value_pair(&encoded),
            NameValue::Pair { .. }
        ));
    }

    #[test]
    fn begin_request_body_roundtrip() {
        let content = [0u8, 1, 1, 0, 0, 0, 0, 0];
        let parsed = BeginRequestBody::parse(&content).unwrap();
        assert_eq!(parsed.role, Role::Responder);
        assert!(parsed.keep_alive);
    }
}
