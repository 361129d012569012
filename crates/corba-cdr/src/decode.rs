//! CDR decoding
//!
//! [`CdrReader`] walks a borrowed buffer with an absolute position, so
//! TypeCode indirections can be resolved against earlier positions even
//! across encapsulation boundaries. Entering an encapsulation narrows the
//! readable window, moves the alignment origin and adopts the
//! encapsulation's own byte order.

use crate::context::CdrContext;
use crate::error::{CdrError, Result};
use crate::typecode::{TcKind, TypeCode};
use std::collections::HashMap;

/// Trait for types that can be CDR-decoded
pub trait CdrDecode: Sized {
    /// Decode a value from the reader
    fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self>;
}

/// TypeCodes seen so far, keyed by the position of their kind field
#[derive(Debug, Default)]
pub(crate) struct SeenTypeCodes {
    pub complete: HashMap<usize, TypeCode>,
    pub open: Vec<(usize, TcKind, String)>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    end: usize,
    origin: usize,
    ctx: CdrContext,
}

/// CDR input stream over a borrowed buffer
#[derive(Debug)]
pub struct CdrReader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
    origin: usize,
    ctx: CdrContext,
    frames: Vec<Frame>,
    pub(crate) typecodes: SeenTypeCodes,
}

impl<'a> CdrReader<'a> {
    /// Create a reader over the whole buffer, aligned from its first byte
    pub fn new(data: &'a [u8], ctx: CdrContext) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
            origin: 0,
            ctx,
            frames: Vec::new(),
            typecodes: SeenTypeCodes::default(),
        }
    }

    pub fn context(&self) -> CdrContext {
        self.ctx
    }

    /// Switch byte order, e.g. after reading an encapsulation flag by hand
    pub fn set_byte_order(&mut self, little_endian: bool) {
        self.ctx = CdrContext::with_byte_order(little_endian);
    }

    /// Absolute position in the underlying buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute position inside the current window
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.end {
            return Err(CdrError::BufferUnderflow {
                needed: pos - self.pos,
                have: self.remaining(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    /// Skip padding up to the given alignment
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = CdrContext::align_padding(self.pos - self.origin, alignment);
        self.ensure(padding)?;
        self.pos += padding;
        Ok(())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(CdrError::BufferUnderflow {
                needed,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    pub fn read_octet(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_octet()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CdrError::InvalidBoolean(other)),
        }
    }

    pub fn read_char(&mut self) -> Result<u8> {
        self.read_octet()
    }

    pub fn read_ushort(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes = self.take::<2>()?;
        Ok(self.ctx.get_u16(bytes))
    }

    pub fn read_short(&mut self) -> Result<i16> {
        Ok(self.read_ushort()? as i16)
    }

    pub fn read_wchar(&mut self) -> Result<u16> {
        self.read_ushort()
    }

    pub fn read_ulong(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes = self.take::<4>()?;
        Ok(self.ctx.get_u32(bytes))
    }

    pub fn read_long(&mut self) -> Result<i32> {
        Ok(self.read_ulong()? as i32)
    }

    pub fn read_ulonglong(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes = self.take::<8>()?;
        Ok(self.ctx.get_u64(bytes))
    }

    pub fn read_longlong(&mut self) -> Result<i64> {
        Ok(self.read_ulonglong()? as i64)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_ulong()?))
    }

    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_ulonglong()?))
    }

    /// Borrow the next `len` bytes without alignment
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let data: &'a [u8] = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a `sequence<octet>`
    pub fn read_octets(&mut self) -> Result<Vec<u8>> {
        let len = self.read_ulong()? as usize;
        Ok(self.read_raw(len)?.to_vec())
    }

    /// Read a length-prefixed, NUL-terminated string
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_ulong()? as usize;
        if len == 0 {
            // some peers encode the empty string without a terminator
            return Ok(String::new());
        }
        let raw = self.read_raw(len)?;
        let (body, nul) = raw.split_at(len - 1);
        if nul[0] != 0 {
            return Err(CdrError::InvalidString("missing NUL terminator".into()));
        }
        if body.contains(&0) {
            return Err(CdrError::InvalidString("embedded NUL".into()));
        }
        Ok(String::from_utf8(body.to_vec())?)
    }

    /// Read a wide string written as octet length plus UTF-16 code units
    pub fn read_wstring(&mut self) -> Result<String> {
        let octets = self.read_ulong()? as usize;
        if octets % 2 != 0 {
            return Err(CdrError::InvalidString(format!(
                "odd wstring octet length {}",
                octets
            )));
        }
        self.ensure(octets)?;
        let mut units = Vec::with_capacity(octets / 2);
        for _ in 0..octets / 2 {
            let bytes = self.take::<2>()?;
            units.push(self.ctx.get_u16(bytes));
        }
        let decoded: std::result::Result<String, _> =
            char::decode_utf16(units.iter().copied()).collect();
        Ok(decoded?)
    }

    /// Enter an encapsulation: narrows the window to its contents
    pub fn enter_encapsulation(&mut self) -> Result<()> {
        let len = self.read_ulong()? as usize;
        if len == 0 {
            return Err(CdrError::InvalidEncapsulation("empty encapsulation".into()));
        }
        self.ensure(len)?;
        self.frames.push(Frame {
            end: self.end,
            origin: self.origin,
            ctx: self.ctx,
        });
        self.end = self.pos + len;
        self.origin = self.pos;
        let flag = self.read_octet()?;
        self.ctx = CdrContext::with_byte_order(flag & 1 == 1);
        Ok(())
    }

    /// Leave the innermost encapsulation, skipping any unread contents
    pub fn exit_encapsulation(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CdrError::Internal("exit_encapsulation without enter".into()))?;
        self.pos = self.end;
        self.end = frame.end;
        self.origin = frame.origin;
        self.ctx = frame.ctx;
        Ok(())
    }

    /// Decode anything implementing [`CdrDecode`]
    pub fn read<T: CdrDecode>(&mut self) -> Result<T> {
        T::cdr_decode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::CdrWriter;

    #[test]
    fn test_byte_swapped_read() {
        let data = [0, 0, 0, 0, 0x01, 0x02, 0x03, 0x04];
        let mut r = CdrReader::new(&data, CdrContext::with_byte_order(true));
        r.read_octet().unwrap();
        assert_eq!(r.read_ulong().unwrap(), 0x04030201);
    }

    #[test]
    fn test_underflow_is_reported() {
        let data = [1, 2];
        let mut r = CdrReader::new(&data, CdrContext::native());
        match r.read_ulong() {
            Err(CdrError::BufferUnderflow { needed: 4, have: 2 }) => {}
            other => panic!("expected underflow, got {:?}", other),
        }
    }

    #[test]
    fn test_string_requires_terminator() {
        let data = [3, 0, 0, 0, b'a', b'b', b'c'];
        let mut r = CdrReader::new(&data, CdrContext::with_byte_order(true));
        assert!(matches!(r.read_string(), Err(CdrError::InvalidString(_))));
    }

    #[test]
    fn test_encapsulation_switches_byte_order() {
        let mut w = CdrWriter::new(CdrContext::with_byte_order(false));
        w.write_ulong(1);
        w.write_raw(&[0, 0, 0, 8]); // big-endian length
        w.write_raw(&[1, 0, 0, 0]); // little-endian flag plus padding
        w.write_raw(&[5, 0, 0, 0]);
        w.write_ulong(2);

        let bytes = w.freeze();
        let mut r = CdrReader::new(&bytes, CdrContext::with_byte_order(false));
        assert_eq!(r.read_ulong().unwrap(), 1);
        r.enter_encapsulation().unwrap();
        assert!(r.context().little_endian);
        assert_eq!(r.read_ulong().unwrap(), 5);
        r.exit_encapsulation().unwrap();
        assert!(!r.context().little_endian);
        assert_eq!(r.read_ulong().unwrap(), 2);
    }

    #[test]
    fn test_oversized_sequence_length_rejected() {
        let data = [0xff, 0xff, 0xff, 0x7f, 1, 2, 3];
        let mut r = CdrReader::new(&data, CdrContext::with_byte_order(true));
        assert!(matches!(
            r.read_octets(),
            Err(CdrError::BufferUnderflow { .. })
        ));
    }
}
