//! NSEC / NSEC3 type bitmaps (RFC 4034 section 4.1.2).

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use super::reader::Reader;
use super::types::RecordType;
use crate::error::DecodeError;

fn windows(types: &[RecordType]) -> BTreeMap<u8, Vec<u8>> {
    let mut windows: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
    for ty in types {
        let window = (ty.0 >> 8) as u8;
        let low = (ty.0 & 0xff) as usize;
        let bits = windows.entry(window).or_default();
        if bits.len() <= low >> 3 {
            bits.resize((low >> 3) + 1, 0);
        }
        bits[low >> 3] |= 0x80 >> (low & 7);
    }
    windows
}

pub(crate) fn encode(types: &[RecordType], buf: &mut BytesMut) {
    for (window, bits) in windows(types) {
        buf.put_u8(window);
        buf.put_u8(bits.len() as u8);
        buf.put_slice(&bits);
    }
}

pub(crate) fn encoding_length(types: &[RecordType]) -> usize {
    windows(types).values().map(|bits| 2 + bits.len()).sum()
}

/// Reads windows until `end`. Types come back in ascending order.
pub(crate) fn decode(reader: &mut Reader<'_>, end: usize) -> Result<Vec<RecordType>, DecodeError> {
    let mut types = Vec::new();
    while reader.position() < end {
        let window = reader.u8()? as u16;
        let len = reader.u8()? as usize;
        let bits = reader.bytes(len)?;
        for (i, byte) in bits.iter().enumerate() {
            for j in 0..8 {
                if byte & (0x80 >> j) != 0 {
                    types.push(RecordType((window << 8) | ((i as u16) << 3) | j));
                }
            }
        }
    }
    Ok(types)
}
