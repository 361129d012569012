//! CDR primitive type implementations
//!
//! | IDL Type           | Rust Type | Size | Alignment |
//! |--------------------|-----------|------|-----------|
//! | boolean            | bool      | 1    | 1         |
//! | octet / char       | u8        | 1    | 1         |
//! | short              | i16       | 2    | 2         |
//! | unsigned short     | u16       | 2    | 2         |
//! | long               | i32       | 4    | 4         |
//! | unsigned long      | u32       | 4    | 4         |
//! | long long          | i64       | 8    | 8         |
//! | unsigned long long | u64       | 8    | 8         |
//! | float              | f32       | 4    | 4         |
//! | double             | f64       | 8    | 8         |
//! | string             | String    | 4+n+1| 4         |

use crate::decode::{CdrDecode, CdrReader};
use crate::encode::{CdrEncode, CdrWriter};
use crate::error::Result;

macro_rules! impl_cdr_primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl CdrEncode for $ty {
            fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
                w.$write(*self);
                Ok(())
            }
        }

        impl CdrDecode for $ty {
            fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self> {
                r.$read()
            }
        }
    };
}

impl_cdr_primitive!(u8, write_octet, read_octet);
impl_cdr_primitive!(bool, write_bool, read_bool);
impl_cdr_primitive!(i16, write_short, read_short);
impl_cdr_primitive!(u16, write_ushort, read_ushort);
impl_cdr_primitive!(i32, write_long, read_long);
impl_cdr_primitive!(u32, write_ulong, read_ulong);
impl_cdr_primitive!(i64, write_longlong, read_longlong);
impl_cdr_primitive!(u64, write_ulonglong, read_ulonglong);
impl_cdr_primitive!(f32, write_float, read_float);
impl_cdr_primitive!(f64, write_double, read_double);

impl CdrEncode for str {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        w.write_string(self)
    }
}

impl CdrEncode for String {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        w.write_string(self)
    }
}

impl CdrDecode for String {
    fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self> {
        r.read_string()
    }
}

/// Sequences encode as a ulong count followed by the elements.
impl<T: CdrEncode> CdrEncode for Vec<T> {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        w.write_ulong(self.len() as u32);
        for item in self {
            item.cdr_encode(w)?;
        }
        Ok(())
    }
}

impl<T: CdrDecode> CdrDecode for Vec<T> {
    fn cdr_decode(r: &mut CdrReader<'_>) -> Result<Self> {
        let count = r.read_ulong()? as usize;
        // every element occupies at least one octet
        if count > r.remaining() {
            return Err(crate::CdrError::BufferUnderflow {
                needed: count,
                have: r.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::cdr_decode(r)?);
        }
        Ok(items)
    }
}
