//! TypeCode-driven marshaling of dynamic values
//!
//! Values are written in the CDR layout their TypeCode prescribes:
//!
//! ```text
//! struct/except  members in order, each at its own alignment
//! union          discriminator label, then the selected member (if any)
//! sequence       ulong count, then elements
//! array          elements only, count fixed by the TypeCode
//! enum           ulong ordinal
//! any            TypeCode, then the value it describes
//! objref         IOR
//! ```

use crate::any::Any;
use crate::decode::CdrReader;
use crate::encode::CdrWriter;
use crate::error::{CdrError, Result};
use crate::ior::Ior;
use crate::typecode::{read_label, write_label, Ancestors, TcDesc, TcKind, TypeCode};
use crate::value::{
    concrete, discriminator_label, label_value, select_member, IorHandle, ObjectHandle,
    ObjectResolver, Value, MAX_VALUE_DEPTH,
};
use std::sync::Arc;

/// Encode `value` as an instance of `tc`
pub fn encode_value(w: &mut CdrWriter, tc: &TypeCode, value: &Value) -> Result<()> {
    encode_walk(w, tc, value, &mut Ancestors::new())
}

/// Decode an instance of `tc`.
///
/// Object references are turned into live handles by `resolver`; without
/// one they decode to plain [`IorHandle`]s.
pub fn decode_value(
    r: &mut CdrReader<'_>,
    tc: &TypeCode,
    resolver: Option<&dyn ObjectResolver>,
) -> Result<Value> {
    decode_walk(r, tc, resolver, &mut Ancestors::new())
}

pub(crate) fn encode_any(w: &mut CdrWriter, any: &Any) -> Result<()> {
    any.type_code().encode(w)?;
    encode_value(w, any.type_code(), any.value())
}

pub(crate) fn decode_any(r: &mut CdrReader<'_>, resolver: Option<&dyn ObjectResolver>) -> Result<Any> {
    let tc = TypeCode::decode(r)?;
    let value = decode_value(r, &tc, resolver)?;
    Ok(Any::from_parts(tc, value))
}

fn mismatch(tc: &TypeCode, value: &Value) -> CdrError {
    CdrError::TypeMismatch {
        expected: tc.to_string(),
        got: value.kind_name(),
    }
}

fn check_bound(len: usize, bound: u32) -> Result<()> {
    if bound != 0 && len > bound as usize {
        return Err(CdrError::BoundExceeded { len, bound });
    }
    Ok(())
}

fn encode_walk(
    w: &mut CdrWriter,
    tc: &TypeCode,
    value: &Value,
    ancestors: &mut Ancestors,
) -> Result<()> {
    if ancestors.depth() > MAX_VALUE_DEPTH {
        return Err(CdrError::NestingTooDeep(ancestors.depth()));
    }
    let tc = concrete(tc, ancestors)?;
    match (tc.desc(), value) {
        (TcDesc::Simple(TcKind::Null | TcKind::Void), Value::Null) => {}
        (TcDesc::Simple(TcKind::Short), Value::Short(v)) => w.write_short(*v),
        (TcDesc::Simple(TcKind::Long), Value::Long(v)) => w.write_long(*v),
        (TcDesc::Simple(TcKind::LongLong), Value::LongLong(v)) => w.write_longlong(*v),
        (TcDesc::Simple(TcKind::UShort), Value::UShort(v)) => w.write_ushort(*v),
        (TcDesc::Simple(TcKind::ULong), Value::ULong(v)) => w.write_ulong(*v),
        (TcDesc::Simple(TcKind::ULongLong), Value::ULongLong(v)) => w.write_ulonglong(*v),
        (TcDesc::Simple(TcKind::Float), Value::Float(v)) => w.write_float(*v),
        (TcDesc::Simple(TcKind::Double), Value::Double(v)) => w.write_double(*v),
        (TcDesc::Simple(TcKind::Boolean), Value::Boolean(v)) => w.write_bool(*v),
        (TcDesc::Simple(TcKind::Char), Value::Char(v)) => w.write_char(*v),
        (TcDesc::Simple(TcKind::WChar), Value::WChar(v)) => w.write_wchar(*v),
        (TcDesc::Simple(TcKind::Octet), Value::Octet(v)) => w.write_octet(*v),
        (TcDesc::Simple(TcKind::Any), Value::Any(any)) => encode_any(w, any)?,
        (TcDesc::Simple(TcKind::TypeCode), Value::TypeCode(inner)) => inner.encode(w)?,
        (TcDesc::String { bound }, Value::String(s)) => {
            check_bound(s.len(), *bound)?;
            w.write_string(s)?;
        }
        (TcDesc::WString { bound }, Value::WString(s)) => {
            check_bound(s.encode_utf16().count(), *bound)?;
            w.write_wstring(s)?;
        }
        (TcDesc::Objref { .. }, Value::Objref(handle)) => {
            let ior = handle.as_ref().map(|h| h.ior()).unwrap_or_else(Ior::nil);
            w.write(&ior)?;
        }
        (TcDesc::Enum { members, .. }, Value::Enum(n)) => {
            if *n as usize >= members.len() {
                return Err(CdrError::InvalidEnumValue {
                    value: *n,
                    count: members.len(),
                });
            }
            w.write_ulong(*n);
        }
        (TcDesc::Sequence { content, bound }, Value::Sequence(items)) => {
            check_bound(items.len(), *bound)?;
            w.write_ulong(items.len() as u32);
            for item in items {
                encode_walk(w, content, item, ancestors)?;
            }
        }
        (TcDesc::Array { content, length }, Value::Array(items)) => {
            if items.len() != *length as usize {
                return Err(CdrError::LengthMismatch {
                    expected: *length as usize,
                    got: items.len(),
                });
            }
            for item in items {
                encode_walk(w, content, item, ancestors)?;
            }
        }
        (TcDesc::Struct { members, .. }, Value::Struct(items))
        | (TcDesc::Except { members, .. }, Value::Struct(items)) => {
            if items.len() != members.len() {
                return Err(CdrError::LengthMismatch {
                    expected: members.len(),
                    got: items.len(),
                });
            }
            ancestors.push(&tc);
            let result = members
                .iter()
                .zip(items)
                .try_for_each(|(m, item)| encode_walk(w, &m.tc, item, ancestors));
            ancestors.pop();
            result?;
        }
        (
            TcDesc::Union {
                discriminator,
                members,
                ..
            },
            Value::Union {
                discriminator: disc,
                value: inner,
            },
        ) => {
            let label = discriminator_label(discriminator, disc)?;
            write_label(w, discriminator, label)?;
            ancestors.push(&tc);
            let result = match select_member(&tc, label) {
                Some(index) => encode_walk(w, &members[index].tc, inner, ancestors),
                None if matches!(**inner, Value::Null) => Ok(()),
                None => Err(mismatch(&TypeCode::void(), inner)),
            };
            ancestors.pop();
            result?;
        }
        _ => return Err(mismatch(&tc, value)),
    }
    Ok(())
}

/// Reject counts that cannot possibly fit in what is left of the buffer
fn read_count(r: &mut CdrReader<'_>, content: &TypeCode) -> Result<usize> {
    let count = r.read_ulong()? as usize;
    let min_size = match content.unalias().kind() {
        TcKind::Null | TcKind::Void => 0,
        _ => 1,
    };
    if count * min_size > r.remaining() {
        return Err(CdrError::BufferUnderflow {
            needed: count * min_size,
            have: r.remaining(),
        });
    }
    Ok(count)
}

fn decode_walk(
    r: &mut CdrReader<'_>,
    tc: &TypeCode,
    resolver: Option<&dyn ObjectResolver>,
    ancestors: &mut Ancestors,
) -> Result<Value> {
    if ancestors.depth() > MAX_VALUE_DEPTH {
        return Err(CdrError::NestingTooDeep(ancestors.depth()));
    }
    let tc = concrete(tc, ancestors)?;
    Ok(match tc.desc() {
        TcDesc::Simple(kind) => match kind {
            TcKind::Null | TcKind::Void => Value::Null,
            TcKind::Short => Value::Short(r.read_short()?),
            TcKind::Long => Value::Long(r.read_long()?),
            TcKind::LongLong => Value::LongLong(r.read_longlong()?),
            TcKind::UShort => Value::UShort(r.read_ushort()?),
            TcKind::ULong => Value::ULong(r.read_ulong()?),
            TcKind::ULongLong => Value::ULongLong(r.read_ulonglong()?),
            TcKind::Float => Value::Float(r.read_float()?),
            TcKind::Double => Value::Double(r.read_double()?),
            TcKind::Boolean => Value::Boolean(r.read_bool()?),
            TcKind::Char => Value::Char(r.read_char()?),
            TcKind::WChar => Value::WChar(r.read_wchar()?),
            TcKind::Octet => Value::Octet(r.read_octet()?),
            TcKind::Any => Value::Any(Box::new(decode_any(r, resolver)?)),
            TcKind::TypeCode => Value::TypeCode(TypeCode::decode(r)?),
            other => return Err(CdrError::BadTypeCodeKind(other.value())),
        },
        TcDesc::String { bound } => {
            let s = r.read_string()?;
            check_bound(s.len(), *bound)?;
            Value::String(s)
        }
        TcDesc::WString { bound } => {
            let s = r.read_wstring()?;
            check_bound(s.encode_utf16().count(), *bound)?;
            Value::WString(s)
        }
        TcDesc::Objref { .. } => {
            let ior: Ior = r.read()?;
            if ior.is_nil() {
                Value::Objref(None)
            } else {
                let handle: Arc<dyn ObjectHandle> = match resolver {
                    Some(resolver) => resolver.resolve(ior),
                    None => Arc::new(IorHandle(ior)),
                };
                Value::Objref(Some(handle))
            }
        }
        TcDesc::Enum { members, .. } => {
            let n = r.read_ulong()?;
            if n as usize >= members.len() {
                return Err(CdrError::InvalidEnumValue {
                    value: n,
                    count: members.len(),
                });
            }
            Value::Enum(n)
        }
        TcDesc::Sequence { content, bound } => {
            let count = read_count(r, content)?;
            check_bound(count, *bound)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_walk(r, content, resolver, ancestors)?);
            }
            Value::Sequence(items)
        }
        TcDesc::Array { content, length } => {
            let mut items = Vec::with_capacity((*length as usize).min(r.remaining()));
            for _ in 0..*length {
                items.push(decode_walk(r, content, resolver, ancestors)?);
            }
            Value::Array(items)
        }
        TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => {
            ancestors.push(&tc);
            let result: Result<Vec<Value>> = members
                .iter()
                .map(|m| decode_walk(r, &m.tc, resolver, ancestors))
                .collect();
            ancestors.pop();
            Value::Struct(result?)
        }
        TcDesc::Union {
            discriminator,
            members,
            ..
        } => {
            let label = read_label(r, discriminator)?;
            let disc = label_value(discriminator, label)?;
            if let Value::Enum(n) = disc {
                let count = discriminator.unalias().member_count();
                if n as usize >= count {
                    return Err(CdrError::InvalidEnumValue { value: n, count });
                }
            }
            ancestors.push(&tc);
            let result = match select_member(&tc, label) {
                Some(index) => decode_walk(r, &members[index].tc, resolver, ancestors),
                None => Ok(Value::Null),
            };
            ancestors.pop();
            Value::Union {
                discriminator: Box::new(disc),
                value: Box::new(result?),
            }
        }
        TcDesc::Alias { .. } | TcDesc::Recursive { .. } => {
            return Err(CdrError::Internal(format!("unresolved {}", tc)))
        }
    })
}
