//! CDR encoding/decoding context
//!
//! The context tracks byte order and provides helpers for alignment and
//! primitive encoding/decoding. Alignment in CDR is always relative to an
//! origin: the start of the enclosing GIOP message or encapsulation.

use bytes::BufMut;

/// CDR encoding/decoding context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdrContext {
    /// Whether multi-byte primitives are little-endian
    pub little_endian: bool,
}

impl CdrContext {
    /// Context using the byte order of the running host
    pub fn native() -> Self {
        Self {
            little_endian: cfg!(target_endian = "little"),
        }
    }

    /// Context with an explicit byte order
    pub fn with_byte_order(little_endian: bool) -> Self {
        Self { little_endian }
    }

    /// The byte-order flag octet as written in GIOP headers and encapsulations
    pub fn flag(&self) -> u8 {
        self.little_endian as u8
    }

    /// Calculate padding needed to align to the given boundary
    #[inline]
    pub fn align_padding(position: usize, alignment: usize) -> usize {
        if alignment <= 1 {
            return 0;
        }
        let remainder = position % alignment;
        if remainder == 0 {
            0
        } else {
            alignment - remainder
        }
    }

    #[inline]
    pub fn put_u16<B: BufMut>(&self, buf: &mut B, value: u16) {
        if self.little_endian {
            buf.put_u16_le(value);
        } else {
            buf.put_u16(value);
        }
    }

    #[inline]
    pub fn put_u32<B: BufMut>(&self, buf: &mut B, value: u32) {
        if self.little_endian {
            buf.put_u32_le(value);
        } else {
            buf.put_u32(value);
        }
    }

    #[inline]
    pub fn put_u64<B: BufMut>(&self, buf: &mut B, value: u64) {
        if self.little_endian {
            buf.put_u64_le(value);
        } else {
            buf.put_u64(value);
        }
    }

    #[inline]
    pub fn get_u16(&self, bytes: [u8; 2]) -> u16 {
        if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        }
    }

    #[inline]
    pub fn get_u32(&self, bytes: [u8; 4]) -> u32 {
        if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        }
    }

    #[inline]
    pub fn get_u64(&self, bytes: [u8; 8]) -> u64 {
        if self.little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        }
    }

    /// Encode a u32 into a fixed array, used when patching lengths in place
    #[inline]
    pub fn u32_bytes(&self, value: u32) -> [u8; 4] {
        if self.little_endian {
            value.to_le_bytes()
        } else {
            value.to_be_bytes()
        }
    }
}

impl Default for CdrContext {
    fn default() -> Self {
        Self::native()
    }
}
