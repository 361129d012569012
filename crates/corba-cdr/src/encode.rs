//! CDR encoding
//!
//! [`CdrWriter`] appends CDR data to a growable buffer. Primitives are
//! padded to their natural alignment measured from the current origin,
//! which is the start of the buffer or of the innermost open
//! encapsulation.
//!
//! ```text
//! encapsulation:
//! +--------+-----------+---------------------------+
//! | ulong  | octet     | contents ...              |
//! | length | byte order| (aligned from byte order) |
//! +--------+-----------+---------------------------+
//!          ^ origin moves here
//! ```

use crate::context::CdrContext;
use crate::error::{CdrError, Result};
use crate::typecode::{TcKind, TypeCode};
use bytes::{BufMut, Bytes, BytesMut};

/// Trait for types that can be CDR-encoded
pub trait CdrEncode {
    /// Encode this value into the writer
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()>;
}

/// Positions of TypeCodes already written, for indirection.
#[derive(Debug, Default)]
pub(crate) struct EmittedTypeCodes {
    /// Whether repeated complex TypeCodes may be replaced by indirections
    pub reuse: bool,
    /// Complete TypeCodes written so far, with the position of their kind
    pub written: Vec<(TypeCode, usize)>,
    /// Struct, union and exception TypeCodes still being written
    pub open: Vec<(TcKind, String, usize)>,
}

/// CDR output stream
#[derive(Debug)]
pub struct CdrWriter {
    buf: BytesMut,
    ctx: CdrContext,
    origin: usize,
    encapsulations: Vec<(usize, usize)>,
    pub(crate) typecodes: EmittedTypeCodes,
}

impl CdrWriter {
    /// Create a writer with the given byte order
    pub fn new(ctx: CdrContext) -> Self {
        Self::with_capacity(ctx, 256)
    }

    pub fn with_capacity(ctx: CdrContext, capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            ctx,
            origin: 0,
            encapsulations: Vec::new(),
            typecodes: EmittedTypeCodes::default(),
        }
    }

    /// Allow repeated complex TypeCodes to be written as indirections
    pub fn with_typecode_reuse(mut self, reuse: bool) -> Self {
        self.typecodes.reuse = reuse;
        self
    }

    pub fn context(&self) -> CdrContext {
        self.ctx
    }

    /// Total number of bytes written
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Position relative to the current alignment origin
    pub fn offset(&self) -> usize {
        self.buf.len() - self.origin
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Insert zero padding up to the given alignment
    pub fn align(&mut self, alignment: usize) {
        let padding = CdrContext::align_padding(self.offset(), alignment);
        self.buf.put_bytes(0, padding);
    }

    pub fn write_octet(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_char(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_ushort(&mut self, value: u16) {
        self.align(2);
        self.ctx.put_u16(&mut self.buf, value);
    }

    pub fn write_short(&mut self, value: i16) {
        self.write_ushort(value as u16);
    }

    pub fn write_wchar(&mut self, value: u16) {
        self.write_ushort(value);
    }

    pub fn write_ulong(&mut self, value: u32) {
        self.align(4);
        self.ctx.put_u32(&mut self.buf, value);
    }

    pub fn write_long(&mut self, value: i32) {
        self.write_ulong(value as u32);
    }

    pub fn write_ulonglong(&mut self, value: u64) {
        self.align(8);
        self.ctx.put_u64(&mut self.buf, value);
    }

    pub fn write_longlong(&mut self, value: i64) {
        self.write_ulonglong(value as u64);
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_ulong(value.to_bits());
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_ulonglong(value.to_bits());
    }

    /// Append bytes with no length prefix or alignment
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a `sequence<octet>`
    pub fn write_octets(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| CdrError::BoundExceeded {
            len: bytes.len(),
            bound: u32::MAX,
        })?;
        self.write_ulong(len);
        self.write_raw(bytes);
        Ok(())
    }

    /// Write a NUL-terminated string with its length prefix
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(CdrError::InvalidString("embedded NUL".into()));
        }
        let len = u32::try_from(value.len() + 1).map_err(|_| CdrError::BoundExceeded {
            len: value.len(),
            bound: u32::MAX,
        })?;
        self.write_ulong(len);
        self.write_raw(value.as_bytes());
        self.write_octet(0);
        Ok(())
    }

    /// Write a wide string: octet length, then UTF-16 code units
    pub fn write_wstring(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let octets = units.len() * 2;
        let len = u32::try_from(octets).map_err(|_| CdrError::BoundExceeded {
            len: octets,
            bound: u32::MAX,
        })?;
        self.write_ulong(len);
        for unit in units {
            self.ctx.put_u16(&mut self.buf, unit);
        }
        Ok(())
    }

    /// Open an encapsulation; contents are aligned from its byte-order octet
    pub fn begin_encapsulation(&mut self) {
        self.align(4);
        let length_pos = self.buf.len();
        self.ctx.put_u32(&mut self.buf, 0);
        self.encapsulations.push((length_pos, self.origin));
        self.origin = self.buf.len();
        self.buf.put_u8(self.ctx.flag());
    }

    /// Close the innermost encapsulation and patch its length
    pub fn end_encapsulation(&mut self) -> Result<()> {
        let (length_pos, saved_origin) = self
            .encapsulations
            .pop()
            .ok_or_else(|| CdrError::Internal("end_encapsulation without begin".into()))?;
        let len = self.buf.len() - length_pos - 4;
        let len = u32::try_from(len)
            .map_err(|_| CdrError::InvalidEncapsulation(format!("{} bytes", len)))?;
        self.patch_ulong(length_pos, len);
        self.origin = saved_origin;
        Ok(())
    }

    /// Overwrite a previously written ulong at an absolute position
    pub fn patch_ulong(&mut self, position: usize, value: u32) {
        let bytes = self.ctx.u32_bytes(value);
        self.buf[position..position + 4].copy_from_slice(&bytes);
    }

    /// Encode anything implementing [`CdrEncode`]
    pub fn write<T: CdrEncode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.cdr_encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_relative_to_origin() {
        let mut w = CdrWriter::new(CdrContext::with_byte_order(false));
        w.write_octet(1);
        w.write_ulong(0xAABBCCDD);
        assert_eq!(w.as_bytes(), &[1, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_string_layout() {
        let mut w = CdrWriter::new(CdrContext::with_byte_order(true));
        w.write_string("abc").unwrap();
        assert_eq!(w.as_bytes(), &[4, 0, 0, 0, b'a', b'b', b'c', 0]);
        assert!(w.write_string("a\0b").is_err());
    }

    #[test]
    fn test_encapsulation_length_and_origin() {
        let mut w = CdrWriter::new(CdrContext::with_byte_order(false));
        w.write_octet(9);
        w.begin_encapsulation();
        // byte-order octet sits at encapsulation offset 0, so a ulong pads 3
        w.write_ulong(7);
        w.end_encapsulation().unwrap();
        let bytes = w.as_bytes();
        assert_eq!(&bytes[4..8], &[0, 0, 0, 8]);
        assert_eq!(bytes[8], 0);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 7]);
    }

    #[test]
    fn test_unbalanced_encapsulation() {
        let mut w = CdrWriter::new(CdrContext::native());
        assert!(w.end_encapsulation().unwrap_err().is_fatal());
    }
}
