//! Record packing.
//!
//! Layout, all integers little-endian `u32`:
//!
//! ```text
//! format | dn_len | dn | element_count
//!   (name_len | name | flags | value_count | (value_len | value)*)*
//! ```
//!
//! Elements with no values are skipped; they are equivalent to an absent
//! attribute. Unpacking never reads past the buffer: a truncated or
//! overrunning record is reported as corruption.

use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::{Element, Message, ModFlag};
use crate::value::Value;

/// Packing format marker. Changes whenever the layout does.
pub const PACK_FORMAT: u32 = 0x2601_1967;

/// Packs a message into a record buffer.
#[must_use]
pub fn pack_message(msg: &Message) -> Vec<u8> {
    let dn = msg.dn.to_stored();
    let elements: Vec<&Element> = msg.elements.iter().filter(|e| !e.values.is_empty()).collect();
    let size = 12
        + dn.len()
        + elements
            .iter()
            .map(|e| 12 + e.name.len() + e.values.iter().map(|v| 4 + v.len()).sum::<usize>())
            .sum::<usize>();
    let mut out = Vec::with_capacity(size);
    put_u32(&mut out, PACK_FORMAT);
    put_bytes(&mut out, &dn);
    put_u32(&mut out, elements.len() as u32);
    for element in elements {
        put_bytes(&mut out, element.name.as_bytes());
        put_u32(&mut out, element.flags.to_u32());
        put_u32(&mut out, element.values.len() as u32);
        for value in &element.values {
            put_bytes(&mut out, value.as_bytes());
        }
    }
    out
}

fn put_u32(out: &mut Vec<u8>, n: u32) {
    out.extend_from_slice(&n.to_le_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> DirResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                DirError::corruption(format!(
                    "record overrun: need {n} bytes at offset {} of {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> DirResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn len(&mut self) -> DirResult<usize> {
        let n = self.u32()? as usize;
        // Every counted item needs at least four bytes.
        if n > self.buf.len() - self.pos {
            return Err(DirError::corruption(format!(
                "record count {n} exceeds remaining {} bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(n)
    }

    fn bytes(&mut self) -> DirResult<&'a [u8]> {
        let n = self.len()?;
        self.take(n)
    }
}

/// Unpacks a record buffer.
///
/// # Errors
///
/// Returns `Corruption` if the buffer has the wrong format marker, is
/// truncated, has trailing bytes, or holds an undecodable DN or flag.
pub fn unpack_message(buf: &[u8]) -> DirResult<Message> {
    unpack_inner(buf).inspect_err(|err| {
        tracing::error!(error = %err, len = buf.len(), "failed to unpack record");
    })
}

fn unpack_inner(buf: &[u8]) -> DirResult<Message> {
    let mut reader = Reader { buf, pos: 0 };
    let format = reader.u32()?;
    if format != PACK_FORMAT {
        return Err(DirError::corruption(format!(
            "unknown packing format 0x{format:08x}"
        )));
    }
    let dn = Dn::from_stored(reader.bytes()?)
        .map_err(|e| DirError::corruption(format!("stored DN: {e}")))?;
    let count = reader.len()?;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let name = std::str::from_utf8(reader.bytes()?)
            .map_err(|_| DirError::corruption("attribute name is not UTF-8"))?
            .to_string();
        let raw_flags = reader.u32()?;
        let flags = ModFlag::from_u32(raw_flags)
            .ok_or_else(|| DirError::corruption(format!("unknown element flags {raw_flags}")))?;
        let value_count = reader.len()?;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(Value::from(reader.bytes()?));
        }
        elements.push(Element {
            name,
            flags,
            values,
        });
    }
    if reader.pos != buf.len() {
        return Err(DirError::corruption(format!(
            "{} trailing bytes after record",
            buf.len() - reader.pos
        )));
    }
    Ok(Message { dn, elements })
}
