//! Domain name codec.
//!
//! Names are always written out in full; compression pointers are only
//! followed on decode.

use std::borrow::Cow;

use bytes::{BufMut, BytesMut};

use crate::error::{DecodeError, EncodeError};

/// Upper bound on accumulated `length byte + label` bytes in one name.
pub const MAX_NAME_LENGTH: usize = 254;
pub const MAX_LABEL_LENGTH: usize = 63;

const POINTER: u8 = 0xC0;

fn split_labels(name: &str, mail: bool) -> Vec<Cow<'_, str>> {
    let trimmed = name.strip_prefix('.').unwrap_or(name);
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Vec::new();
    }
    if !mail {
        return trimmed.split('.').map(Cow::Borrowed).collect();
    }

    // Mail form: `first\.last.example.com` keeps `first.last` as one label.
    let mut local = String::new();
    let mut labels = Vec::new();
    for label in trimmed.split('.') {
        if let Some(head) = label.strip_suffix('\\') {
            if !local.is_empty() {
                local.push('.');
            }
            local.push_str(head);
        } else if labels.is_empty() && !local.is_empty() {
            labels.push(Cow::Owned(format!("{local}.{label}")));
        } else {
            labels.push(Cow::Borrowed(label));
        }
    }
    if labels.is_empty() && !local.is_empty() {
        labels.push(Cow::Owned(local));
    }
    labels
}

/// Writes `name` as length-prefixed labels followed by the root label.
pub fn encode(name: &str, buf: &mut BytesMut, mail: bool) -> Result<(), EncodeError> {
    let labels = split_labels(name, mail);

    let mut total = 0;
    for label in &labels {
        let len = label.len();
        if len == 0 {
            return Err(EncodeError::EmptyLabel(name.to_string()));
        }
        if len > MAX_LABEL_LENGTH {
            return Err(EncodeError::LabelTooLong(name.to_string()));
        }
        total += len + 1;
        if total > MAX_NAME_LENGTH {
            return Err(EncodeError::NameTooLong(name.to_string()));
        }
    }

    for label in &labels {
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    Ok(())
}

pub fn encoding_length(name: &str, mail: bool) -> usize {
    split_labels(name, mail)
        .iter()
        .map(|label| label.len() + 1)
        .sum::<usize>()
        + 1
}

/// Decodes the name starting at `start`.
///
/// Returns the dotted name (`"."` for the root) and the number of bytes the
/// name occupies at `start`; bytes reached through pointers are not counted.
/// Every pointer must target an offset strictly before the segment it was
/// read from.
pub fn decode(buf: &[u8], start: usize, mail: bool) -> Result<(String, usize), DecodeError> {
    let mut labels: Vec<String> = Vec::new();
    let mut offset = start;
    let mut segment_start = start;
    let mut total = 0;
    let mut consumed = 0;
    let mut jumped = false;

    loop {
        let len = *buf.get(offset).ok_or(DecodeError::NameOverflow)?;
        offset += 1;
        if !jumped {
            consumed += 1;
        }

        match len & POINTER {
            0x00 if len == 0 => break,
            0x00 => {
                let len = len as usize;
                let bytes = buf
                    .get(offset..offset + len)
                    .ok_or(DecodeError::NameOverflow)?;
                total += len + 1;
                if total > MAX_NAME_LENGTH {
                    return Err(DecodeError::NameTooLong);
                }
                let label = String::from_utf8_lossy(bytes);
                labels.push(if mail {
                    label.replace('.', "\\.")
                } else {
                    label.into_owned()
                });
                offset += len;
                if !jumped {
                    consumed += len;
                }
            }
            POINTER => {
                let low = *buf.get(offset).ok_or(DecodeError::NameOverflow)?;
                let target = (((len & !POINTER) as usize) << 8) | low as usize;
                if target >= segment_start {
                    return Err(DecodeError::BadPointer);
                }
                if !jumped {
                    consumed += 1;
                }
                offset = target;
                segment_start = target;
                jumped = true;
            }
            _ => return Err(DecodeError::BadLabel),
        }
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };
    Ok((name, consumed))
}

/// Case-insensitive name comparison, as mDNS requires.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
