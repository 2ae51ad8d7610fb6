//! Compact binary wire codec
//!
//! ```text
//! compact-u16   7 bits per byte, low bits first, 0x80 = continuation
//!               at most 3 bytes, canonical (shortest) form only
//! [u8; N]       fixed-width arrays copied verbatim, no padding
//! ```
//!
//! Encoding appends to a `Vec<u8>` and is total. Decoding goes through
//! [`WireReader`], a bounds-checked cursor that fails with
//! [`TransactionError::MalformedData`] instead of panicking.

use crate::errors::TransactionError;

/// Longest legal compact-u16 encoding
pub const MAX_COMPACT_U16_BYTES: usize = 3;

/// Append the compact-u16 encoding of `value`
pub fn encode_compact_u16(buf: &mut Vec<u8>, value: u16) {
    let mut rem = value as u32;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

/// Append a length prefix, failing if it does not fit a compact-u16
pub fn encode_len(buf: &mut Vec<u8>, len: usize) -> Result<(), TransactionError> {
    let value = u16::try_from(len)
        .map_err(|_| TransactionError::malformed(format!("length {} exceeds u16", len)))?;
    encode_compact_u16(buf, value);
    Ok(())
}

/// Decode a compact-u16 at the start of `data`
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), TransactionError> {
    let mut value: u32 = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_COMPACT_U16_BYTES {
            break;
        }
        value |= ((byte & 0x7f) as u32) << (i * 7);

        if byte & 0x80 == 0 {
            // a zero final byte after a continuation is a longer-than-needed form
            if i > 0 && byte == 0 {
                return Err(TransactionError::malformed(
                    "non-canonical compact-u16 encoding",
                ));
            }
            let value = u16::try_from(value)
                .map_err(|_| TransactionError::malformed("compact-u16 value overflow"))?;
            return Ok((value, i + 1));
        }
    }

    if data.len() >= MAX_COMPACT_U16_BYTES {
        Err(TransactionError::malformed(format!(
            "compact-u16 longer than {} bytes",
            MAX_COMPACT_U16_BYTES
        )))
    } else {
        Err(TransactionError::malformed(
            "unexpected end of data while decoding compact-u16",
        ))
    }
}

/// Bounds-checked read cursor over a wire buffer
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, TransactionError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| TransactionError::malformed(format!("truncated at byte {}", self.pos)))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_compact_u16(&mut self) -> Result<u16, TransactionError> {
        let (value, consumed) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], TransactionError> {
        if self.remaining() < len {
            return Err(TransactionError::malformed(format!(
                "truncated: wanted {} bytes at offset {}, {} left",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a fixed-width array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TransactionError> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Read a compact-u16 length followed by that many bytes
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], TransactionError> {
        let len = self.read_compact_u16()? as usize;
        self.read_bytes(len)
    }

    /// Fail if any bytes are left over
    pub fn finish(self) -> Result<(), TransactionError> {
        if self.remaining() != 0 {
            return Err(TransactionError::malformed(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}
