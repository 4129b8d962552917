//! Record codec — fixed-format framing of variable-length payloads into a
//! block-sized byte slice.
//!
//! # On-disk layout (4-byte header, all fields big-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      1   version  = 0              (u8)
//!    1      1   kind     1=Complete 2=Begin 3=Continue  (u8)
//!    2      2   size     payload length in this block   (u16 BE)
//!    4    size  data     payload bytes
//! ```
//!
//! A block is always written/read whole; bytes in `buf` after `4 + size`
//! are undefined and never zeroed by this codec. The in-file block size is
//! fixed at file creation time and is not stored per-record.
//!
//! Logical records (the `(start, end, payload)` tuples `File` actually
//! deals in) add a second, payload-level framing on top of this: the first
//! framed block of a logical record carries two varints (`start`, `end`)
//! before the caller's opaque bytes. See `frame_logical`/`split_logical`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use integer_encoding::VarInt;

use crate::error::{EngineError, Result};

pub const RECORD_VERSION: u8 = 0;
pub const HEADER_SIZE: usize = 4;

/// Upper bound on the encoded size of a single `i64` varint (zig-zag, 10
/// bytes worst case for a 64-bit value). Two of these (`start`, `end`)
/// must always fit in one block alongside the header; see
/// `DiskConfig::validate`.
pub const VARINT_MAX: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Complete = 1,
    Begin = 2,
    Continue = 3,
}

impl RecordKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(RecordKind::Complete),
            2 => Some(RecordKind::Begin),
            3 => Some(RecordKind::Continue),
            _ => None,
        }
    }
}

/// Write `kind` + `payload` into `buf`, returning the number of bytes of
/// `buf` that are now meaningful (always `HEADER_SIZE + payload.len()`).
///
/// Fails with `RecordTooLarge` if the framed record does not fit in `buf`.
pub fn encode(buf: &mut [u8], kind: RecordKind, payload: &[u8]) -> Result<usize> {
    let total = HEADER_SIZE + payload.len();
    if total > buf.len() {
        return Err(EngineError::RecordTooLarge {
            size: total,
            capacity: buf.len(),
        });
    }
    if payload.len() > u16::MAX as usize {
        return Err(EngineError::RecordTooLarge {
            size: payload.len(),
            capacity: u16::MAX as usize,
        });
    }

    let mut header = &mut buf[0..HEADER_SIZE];
    header.write_u8(RECORD_VERSION)?;
    header.write_u8(kind as u8)?;
    header.write_u16::<BigEndian>(payload.len() as u16)?;
    buf[HEADER_SIZE..total].copy_from_slice(payload);
    Ok(total)
}

/// Parse the header of `buf` and return `(kind, payload_slice)`, where the
/// payload slice borrows into `buf`.
pub fn decode(buf: &[u8]) -> Result<(RecordKind, &[u8])> {
    if buf.len() < HEADER_SIZE {
        return Err(EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: "block shorter than record header".into(),
        });
    }
    let mut header = &buf[0..HEADER_SIZE];
    let version = header.read_u8()?;
    if version != RECORD_VERSION {
        return Err(EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: format!("unsupported record version {version}"),
        });
    }
    let kind_raw = header.read_u8()?;
    let kind = RecordKind::from_u8(kind_raw).ok_or_else(|| EngineError::Corrupt {
        path: Default::default(),
        block: 0,
        reason: format!("unknown record kind {kind_raw}"),
    })?;
    let size = header.read_u16::<BigEndian>()? as usize;
    if HEADER_SIZE + size > buf.len() {
        return Err(EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: format!("record size {size} exceeds block"),
        });
    }
    Ok((kind, &buf[HEADER_SIZE..HEADER_SIZE + size]))
}

/// Prepend the `(start, end)` varint framing to `payload`, producing the
/// bytes that go into the *first* framed block of a logical record.
pub fn frame_logical(start: i64, end: i64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * VARINT_MAX + payload.len());
    out.extend_from_slice(&start.encode_var_vec());
    out.extend_from_slice(&end.encode_var_vec());
    out.extend_from_slice(payload);
    out
}

/// Inverse of `frame_logical`: split the leading `(start, end)` varints off
/// the reassembled bytes of a logical record's first block.
pub fn split_logical(framed: &[u8]) -> Result<(i64, i64, &[u8])> {
    let (start, n1) = i64::decode_var(framed).ok_or_else(|| EngineError::Corrupt {
        path: Default::default(),
        block: 0,
        reason: "truncated start varint".into(),
    })?;
    let (end, n2) =
        i64::decode_var(&framed[n1..]).ok_or_else(|| EngineError::Corrupt {
            path: Default::default(),
            block: 0,
            reason: "truncated end varint".into(),
        })?;
    Ok((start, end, &framed[n1 + n2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = [0u8; 64];
        let payload = b"hello world";
        let n = encode(&mut buf, RecordKind::Complete, payload).unwrap();
        assert_eq!(n, HEADER_SIZE + payload.len());
        let (kind, data) = decode(&buf).unwrap();
        assert_eq!(kind, RecordKind::Complete);
        assert_eq!(data, payload);
    }

    #[test]
    fn encode_rejects_oversize() {
        let mut buf = [0u8; 8];
        let payload = [0u8; 100];
        assert!(encode(&mut buf, RecordKind::Complete, &payload).is_err());
    }

    #[test]
    fn logical_framing_roundtrip() {
        let framed = frame_logical(10, 20, b"payload");
        let (start, end, data) = split_logical(&framed).unwrap();
        assert_eq!(start, 10);
        assert_eq!(end, 20);
        assert_eq!(data, b"payload");
    }

    #[test]
    fn logical_framing_negative_timestamps() {
        let framed = frame_logical(-100, -50, b"x");
        let (start, end, data) = split_logical(&framed).unwrap();
        assert_eq!((start, end), (-100, -50));
        assert_eq!(data, b"x");
    }
}
