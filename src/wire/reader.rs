use bytes::{BufMut, BytesMut};

use super::name;
use crate::error::{DecodeError, EncodeError};

/// Bounds-checked big-endian cursor over a received datagram.
///
/// Names are decoded against the whole buffer so compression pointers can
/// reach back before the current position.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::BufferOverflow(self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Everything from the cursor up to `end`, which must not precede it.
    pub(crate) fn bytes_until(&mut self, end: usize) -> Result<&'a [u8], DecodeError> {
        let len = end
            .checked_sub(self.pos)
            .ok_or(DecodeError::BufferOverflow(self.pos))?;
        self.bytes(len)
    }

    pub(crate) fn name(&mut self, mail: bool) -> Result<String, DecodeError> {
        let (decoded, consumed) = name::decode(self.buf, self.pos, mail)?;
        self.pos += consumed;
        Ok(decoded)
    }

    /// A length-prefixed `<character-string>`.
    pub(crate) fn char_string(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        Ok(String::from_utf8_lossy(self.bytes(len)?).into_owned())
    }
}

pub(crate) fn put_char_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    let len = u8::try_from(s.len()).map_err(|_| EncodeError::StringTooLong(s.len()))?;
    buf.put_u8(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Runs `body` and back-fills the 16-bit length of what it wrote.
pub(crate) fn with_length_prefix<F>(buf: &mut BytesMut, body: F) -> Result<(), EncodeError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), EncodeError>,
{
    let at = buf.len();
    buf.put_u16(0);
    body(buf)?;
    let written = buf.len() - at - 2;
    let len = u16::try_from(written).map_err(|_| EncodeError::DataTooLong(written))?;
    buf[at..at + 2].copy_from_slice(&len.to_be_bytes());
    Ok(())
}
