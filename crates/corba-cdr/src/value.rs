//! Dynamic values and the TypeCode-driven walks over them
//!
//! A [`Value`] carries no type information of its own; every operation
//! that needs to interpret one is driven by the [`TypeCode`] it belongs
//! to. The walks here provide default construction, deep copy, shape
//! validation and the release walk used when a value is freed.

use crate::any::Any;
use crate::error::{CdrError, Result};
use crate::ior::Ior;
use crate::typecode::{Ancestors, TcDesc, TcKind, TypeCode};
use std::fmt;
use std::sync::Arc;

/// Deepest value nesting the walks accept
pub(crate) const MAX_VALUE_DEPTH: usize = 256;

/// A live object reference as seen by the marshaling layer.
///
/// The ORB implements this for its own reference type; cloning the `Arc`
/// is a duplicate and dropping it is a release.
pub trait ObjectHandle: Send + Sync + fmt::Debug {
    /// The interoperable reference to put on the wire
    fn ior(&self) -> Ior;

    /// Recover the concrete handle type
    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync>;
}

/// Turns decoded IORs into live handles
pub trait ObjectResolver: Send + Sync {
    fn resolve(&self, ior: Ior) -> Arc<dyn ObjectHandle>;
}

/// Handle for a decoded IOR with no ORB attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IorHandle(pub Ior);

impl ObjectHandle for IorHandle {
    fn ior(&self) -> Ior {
        self.0.clone()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// A marshalable value
#[derive(Debug, Clone)]
pub enum Value {
    /// Value of `null` and `void`
    Null,
    Short(i16),
    Long(i32),
    LongLong(i64),
    UShort(u16),
    ULong(u32),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Char(u8),
    WChar(u16),
    Octet(u8),
    Any(Box<Any>),
    TypeCode(TypeCode),
    /// `None` is the nil reference
    Objref(Option<Arc<dyn ObjectHandle>>),
    /// Members of a struct or exception, in declaration order
    Struct(Vec<Value>),
    Union {
        discriminator: Box<Value>,
        value: Box<Value>,
    },
    Enum(u32),
    String(String),
    WString(String),
    Sequence(Vec<Value>),
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Short(_) => "short",
            Value::Long(_) => "long",
            Value::LongLong(_) => "long long",
            Value::UShort(_) => "unsigned short",
            Value::ULong(_) => "unsigned long",
            Value::ULongLong(_) => "unsigned long long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::Char(_) => "char",
            Value::WChar(_) => "wchar",
            Value::Octet(_) => "octet",
            Value::Any(_) => "any",
            Value::TypeCode(_) => "TypeCode",
            Value::Objref(_) => "object reference",
            Value::Struct(_) => "struct",
            Value::Union { .. } => "union",
            Value::Enum(_) => "enum",
            Value::String(_) => "string",
            Value::WString(_) => "wstring",
            Value::Sequence(_) => "sequence",
            Value::Array(_) => "array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::WString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Short(v) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::ULong(v) => Some(*v),
            Value::UShort(v) => Some(*v as u32),
            Value::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Elements of a sequence or array, or members of a struct
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) | Value::Array(items) | Value::Struct(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_objref(&self) -> Option<&Arc<dyn ObjectHandle>> {
        match self {
            Value::Objref(Some(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Encode raw bytes as a `sequence<octet>` value
    pub fn octets(bytes: &[u8]) -> Value {
        Value::Sequence(bytes.iter().map(|b| Value::Octet(*b)).collect())
    }

    /// Collect a `sequence<octet>` value back into bytes
    pub fn to_octets(&self) -> Option<Vec<u8>> {
        match self {
            Value::Sequence(items) | Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Octet(b) => Some(*b),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::LongLong(a), Value::LongLong(b)) => a == b,
            (Value::UShort(a), Value::UShort(b)) => a == b,
            (Value::ULong(a), Value::ULong(b)) => a == b,
            (Value::ULongLong(a), Value::ULongLong(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::WChar(a), Value::WChar(b)) => a == b,
            (Value::Octet(a), Value::Octet(b)) => a == b,
            (Value::Any(a), Value::Any(b)) => a == b,
            (Value::TypeCode(a), Value::TypeCode(b)) => a.equal(b),
            (Value::Objref(None), Value::Objref(None)) => true,
            (Value::Objref(Some(a)), Value::Objref(Some(b))) => a.ior() == b.ior(),
            (Value::Struct(a), Value::Struct(b))
            | (Value::Sequence(a), Value::Sequence(b))
            | (Value::Array(a), Value::Array(b)) => a == b,
            (
                Value::Union {
                    discriminator: d1,
                    value: v1,
                },
                Value::Union {
                    discriminator: d2,
                    value: v2,
                },
            ) => d1 == d2 && v1 == v2,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::String(a), Value::String(b)) | (Value::WString(a), Value::WString(b)) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::ULong(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::LongLong(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// What a free walk released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeReport {
    /// Bytes of in-memory storage released, by [`TypeCode::layout`] rules
    pub bytes: usize,
    /// Object references released
    pub objrefs_released: usize,
    /// Elements handed to a custom free function
    pub elements_finalized: usize,
}

impl FreeReport {
    pub fn merge(&mut self, other: FreeReport) {
        self.bytes += other.bytes;
        self.objrefs_released += other.objrefs_released;
        self.elements_finalized += other.elements_finalized;
    }
}

fn mismatch(tc: &TypeCode, value: &Value) -> CdrError {
    CdrError::TypeMismatch {
        expected: tc.to_string(),
        got: value.kind_name(),
    }
}

/// Strip aliases and resolve recursive placeholders
pub(crate) fn concrete(tc: &TypeCode, ancestors: &Ancestors) -> Result<TypeCode> {
    let mut tc = ancestors.resolve(tc)?;
    while let TcDesc::Alias { content, .. } = tc.desc() {
        let next = ancestors.resolve(content)?;
        tc = next;
    }
    Ok(tc)
}

/// Discriminator value to normalized union label
pub(crate) fn discriminator_label(disc: &TypeCode, value: &Value) -> Result<i64> {
    let kind = disc.unalias().kind();
    Ok(match (kind, value) {
        (TcKind::Short, Value::Short(v)) => *v as i64,
        (TcKind::UShort, Value::UShort(v)) => *v as i64,
        (TcKind::Long, Value::Long(v)) => *v as i64,
        (TcKind::ULong, Value::ULong(v)) => *v as i64,
        (TcKind::LongLong, Value::LongLong(v)) => *v,
        (TcKind::ULongLong, Value::ULongLong(v)) => *v as i64,
        (TcKind::Boolean, Value::Boolean(v)) => *v as i64,
        (TcKind::Char, Value::Char(v)) => *v as i64,
        (TcKind::WChar, Value::WChar(v)) => *v as i64,
        (TcKind::Enum, Value::Enum(v)) => *v as i64,
        _ => return Err(mismatch(disc, value)),
    })
}

/// Normalized union label back to a discriminator value
pub(crate) fn label_value(disc: &TypeCode, label: i64) -> Result<Value> {
    Ok(match disc.unalias().kind() {
        TcKind::Short => Value::Short(label as i16),
        TcKind::UShort => Value::UShort(label as u16),
        TcKind::Long => Value::Long(label as i32),
        TcKind::ULong => Value::ULong(label as u32),
        TcKind::LongLong => Value::LongLong(label),
        TcKind::ULongLong => Value::ULongLong(label as u64),
        TcKind::Boolean => Value::Boolean(label != 0),
        TcKind::Char => Value::Char(label as u8),
        TcKind::WChar => Value::WChar(label as u16),
        TcKind::Enum => Value::Enum(label as u32),
        other => return Err(CdrError::InvalidDiscriminant(format!("{:?}", other))),
    })
}

/// Index of the union member selected by a label, if any
pub(crate) fn select_member(tc: &TypeCode, label: i64) -> Option<usize> {
    match tc.desc() {
        TcDesc::Union {
            default_index,
            members,
            ..
        } => members
            .iter()
            .enumerate()
            .position(|(i, m)| Some(i) != *default_index && m.label == label)
            .or(*default_index),
        _ => None,
    }
}

fn simple_matches(kind: TcKind, value: &Value) -> bool {
    matches!(
        (kind, value),
        (TcKind::Null | TcKind::Void, Value::Null)
            | (TcKind::Short, Value::Short(_))
            | (TcKind::Long, Value::Long(_))
            | (TcKind::LongLong, Value::LongLong(_))
            | (TcKind::UShort, Value::UShort(_))
            | (TcKind::ULong, Value::ULong(_))
            | (TcKind::ULongLong, Value::ULongLong(_))
            | (TcKind::Float, Value::Float(_))
            | (TcKind::Double, Value::Double(_))
            | (TcKind::Boolean, Value::Boolean(_))
            | (TcKind::Char, Value::Char(_))
            | (TcKind::WChar, Value::WChar(_))
            | (TcKind::Octet, Value::Octet(_))
            | (TcKind::Any, Value::Any(_))
            | (TcKind::TypeCode, Value::TypeCode(_))
    )
}

fn check_bound(len: usize, bound: u32) -> Result<()> {
    if bound != 0 && len > bound as usize {
        return Err(CdrError::BoundExceeded { len, bound });
    }
    Ok(())
}

impl TypeCode {
    /// Zero/default-initialized value of this type
    pub fn default_value(&self) -> Result<Value> {
        default_walk(self, &mut Ancestors::new())
    }

    /// Verify that a value has the shape this TypeCode describes
    pub fn check_value(&self, value: &Value) -> Result<()> {
        check_walk(self, value, &mut Ancestors::new())
    }

    /// Deep copy a value, validating it against this TypeCode on the way
    pub fn copy_value(&self, value: &Value) -> Result<Value> {
        copy_walk(self, value, &mut Ancestors::new())
    }

    /// Release a value: object references are released, storage freed
    pub fn free_value(&self, value: Value) -> Result<FreeReport> {
        let mut report = FreeReport {
            bytes: self.layout()?.size,
            ..FreeReport::default()
        };
        free_walk(self, value, &mut Ancestors::new(), &mut report)?;
        Ok(report)
    }
}

fn default_walk(tc: &TypeCode, ancestors: &mut Ancestors) -> Result<Value> {
    if ancestors.depth() > MAX_VALUE_DEPTH {
        return Err(CdrError::NestingTooDeep(ancestors.depth()));
    }
    if tc.is_recursive() {
        // only reachable without a sequence in between, i.e. infinite size
        return Err(CdrError::Internal(format!(
            "{} contains itself by value",
            tc
        )));
    }
    let tc = concrete(tc, ancestors)?;
    Ok(match tc.desc() {
        TcDesc::Simple(kind) => match kind {
            TcKind::Null | TcKind::Void => Value::Null,
            TcKind::Short => Value::Short(0),
            TcKind::Long => Value::Long(0),
            TcKind::LongLong => Value::LongLong(0),
            TcKind::UShort => Value::UShort(0),
            TcKind::ULong => Value::ULong(0),
            TcKind::ULongLong => Value::ULongLong(0),
            TcKind::Float => Value::Float(0.0),
            TcKind::Double => Value::Double(0.0),
            TcKind::Boolean => Value::Boolean(false),
            TcKind::Char => Value::Char(0),
            TcKind::WChar => Value::WChar(0),
            TcKind::Octet => Value::Octet(0),
            TcKind::Any => Value::Any(Box::new(Any::null())),
            TcKind::TypeCode => Value::TypeCode(TypeCode::null()),
            other => {
                return Err(CdrError::Internal(format!(
                    "simple TypeCode with kind {:?}",
                    other
                )))
            }
        },
        TcDesc::String { .. } => Value::String(String::new()),
        TcDesc::WString { .. } => Value::WString(String::new()),
        TcDesc::Objref { .. } => Value::Objref(None),
        TcDesc::Enum { .. } => Value::Enum(0),
        TcDesc::Sequence { .. } => Value::Sequence(Vec::new()),
        TcDesc::Array { content, length } => {
            let mut items = Vec::with_capacity(*length as usize);
            for _ in 0..*length {
                items.push(default_walk(content, ancestors)?);
            }
            Value::Array(items)
        }
        TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => {
            ancestors.push(&tc);
            let result: Result<Vec<Value>> = members
                .iter()
                .map(|m| default_walk(&m.tc, ancestors))
                .collect();
            ancestors.pop();
            Value::Struct(result?)
        }
        TcDesc::Union {
            discriminator,
            default_index,
            members,
            ..
        } => {
            ancestors.push(&tc);
            let result = default_union(discriminator, *default_index, members, ancestors);
            ancestors.pop();
            result?
        }
        TcDesc::Alias { .. } | TcDesc::Recursive { .. } => {
            return Err(CdrError::Internal(format!("unresolved {}", tc)))
        }
    })
}

fn default_union(
    discriminator: &TypeCode,
    default_index: Option<usize>,
    members: &[crate::typecode::UnionMember],
    ancestors: &mut Ancestors,
) -> Result<Value> {
    let explicit = members
        .iter()
        .enumerate()
        .find(|(i, _)| Some(*i) != default_index);
    let (label, member) = match explicit {
        Some((_, m)) => (m.label, Some(m)),
        None => {
            // pick a label no explicit case claims; only the default remains
            let used: Vec<i64> = members.iter().map(|m| m.label).collect();
            let label = (0..).find(|l| !used.contains(l)).unwrap_or(0);
            (label, default_index.and_then(|i| members.get(i)))
        }
    };
    let value = match member {
        Some(m) => default_walk(&m.tc, ancestors)?,
        None => Value::Null,
    };
    Ok(Value::Union {
        discriminator: Box::new(label_value(discriminator, label)?),
        value: Box::new(value),
    })
}

fn check_walk(tc: &TypeCode, value: &Value, ancestors: &mut Ancestors) -> Result<()> {
    if ancestors.depth() > MAX_VALUE_DEPTH {
        return Err(CdrError::NestingTooDeep(ancestors.depth()));
    }
    let tc = concrete(tc, ancestors)?;
    match (tc.desc(), value) {
        (TcDesc::Simple(kind), v) if simple_matches(*kind, v) => Ok(()),
        (TcDesc::String { bound }, Value::String(s)) => check_bound(s.len(), *bound),
        (TcDesc::WString { bound }, Value::WString(s)) => {
            check_bound(s.encode_utf16().count(), *bound)
        }
        (TcDesc::Objref { .. }, Value::Objref(_)) => Ok(()),
        (TcDesc::Enum { members, .. }, Value::Enum(n)) => {
            if (*n as usize) < members.len() {
                Ok(())
            } else {
                Err(CdrError::InvalidEnumValue {
                    value: *n,
                    count: members.len(),
                })
            }
        }
        (TcDesc::Sequence { content, bound }, Value::Sequence(items)) => {
            check_bound(items.len(), *bound)?;
            items
                .iter()
                .try_for_each(|item| check_walk(content, item, ancestors))
        }
        (TcDesc::Array { content, length }, Value::Array(items)) => {
            if items.len() != *length as usize {
                return Err(CdrError::LengthMismatch {
                    expected: *length as usize,
                    got: items.len(),
                });
            }
            items
                .iter()
                .try_for_each(|item| check_walk(content, item, ancestors))
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
                .try_for_each(|(m, item)| check_walk(&m.tc, item, ancestors));
            ancestors.pop();
            result
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
            ancestors.push(&tc);
            let result = match select_member(&tc, label) {
                Some(index) => check_walk(&members[index].tc, inner, ancestors),
                None if matches!(**inner, Value::Null) => Ok(()),
                None => Err(mismatch(&TypeCode::void(), inner)),
            };
            ancestors.pop();
            result
        }
        _ => Err(mismatch(&tc, value)),
    }
}

fn copy_walk(tc: &TypeCode, value: &Value, ancestors: &mut Ancestors) -> Result<Value> {
    if ancestors.depth() > MAX_VALUE_DEPTH {
        return Err(CdrError::NestingTooDeep(ancestors.depth()));
    }
    let tc = concrete(tc, ancestors)?;
    Ok(match (tc.desc(), value) {
        (TcDesc::Simple(kind), v) if simple_matches(*kind, v) => v.clone(),
        (TcDesc::String { bound }, Value::String(s)) => {
            check_bound(s.len(), *bound)?;
            Value::String(s.clone())
        }
        (TcDesc::WString { bound }, Value::WString(s)) => {
            check_bound(s.encode_utf16().count(), *bound)?;
            Value::WString(s.clone())
        }
        // duplicates the reference
        (TcDesc::Objref { .. }, Value::Objref(handle)) => Value::Objref(handle.clone()),
        (TcDesc::Enum { .. }, Value::Enum(_)) => {
            check_walk(&tc, value, ancestors)?;
            value.clone()
        }
        (TcDesc::Sequence { content, bound }, Value::Sequence(items)) => {
            check_bound(items.len(), *bound)?;
            let copied: Result<Vec<Value>> = items
                .iter()
                .map(|item| copy_walk(content, item, ancestors))
                .collect();
            Value::Sequence(copied?)
        }
        (TcDesc::Array { content, length }, Value::Array(items)) => {
            if items.len() != *length as usize {
                return Err(CdrError::LengthMismatch {
                    expected: *length as usize,
                    got: items.len(),
                });
            }
            let copied: Result<Vec<Value>> = items
                .iter()
                .map(|item| copy_walk(content, item, ancestors))
                .collect();
            Value::Array(copied?)
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
            let copied: Result<Vec<Value>> = members
                .iter()
                .zip(items)
                .map(|(m, item)| copy_walk(&m.tc, item, ancestors))
                .collect();
            ancestors.pop();
            Value::Struct(copied?)
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
            ancestors.push(&tc);
            let copied = match select_member(&tc, label) {
                Some(index) => copy_walk(&members[index].tc, inner, ancestors),
                None if matches!(**inner, Value::Null) => Ok(Value::Null),
                None => Err(mismatch(&TypeCode::void(), inner)),
            };
            ancestors.pop();
            Value::Union {
                discriminator: disc.clone(),
                value: Box::new(copied?),
            }
        }
        _ => return Err(mismatch(&tc, value)),
    })
}

fn free_walk(
    tc: &TypeCode,
    value: Value,
    ancestors: &mut Ancestors,
    report: &mut FreeReport,
) -> Result<()> {
    let tc = concrete(tc, ancestors)?;
    match (tc.desc(), value) {
        (TcDesc::Objref { .. }, Value::Objref(handle)) => {
            if let Some(handle) = handle {
                drop(handle);
                report.objrefs_released += 1;
            }
        }
        (TcDesc::Simple(TcKind::Any), Value::Any(any)) => {
            report.merge((*any).destroy()?);
        }
        (TcDesc::String { .. }, Value::String(s)) => report.bytes += s.len() + 1,
        (TcDesc::WString { .. }, Value::WString(s)) => {
            report.bytes += (s.encode_utf16().count() + 1) * 2
        }
        (TcDesc::Simple(kind), v) if simple_matches(*kind, &v) => {}
        (TcDesc::Enum { .. }, Value::Enum(_)) => {}
        (TcDesc::Sequence { content, .. }, Value::Sequence(items)) => {
            let elem = ancestors.resolve(content)?.layout()?.size;
            for item in items {
                report.bytes += elem;
                free_walk(content, item, ancestors, report)?;
            }
        }
        (TcDesc::Array { content, .. }, Value::Array(items)) => {
            for item in items {
                free_walk(content, item, ancestors, report)?;
            }
        }
        (TcDesc::Struct { members, .. }, Value::Struct(items))
        | (TcDesc::Except { members, .. }, Value::Struct(items)) => {
            if items.len() != members.len() {
                return Err(CdrError::Internal(format!(
                    "freeing {} with {} of {} members",
                    tc,
                    items.len(),
                    members.len()
                )));
            }
            ancestors.push(&tc);
            let result = members
                .iter()
                .zip(items)
                .try_for_each(|(m, item)| free_walk(&m.tc, item, ancestors, report));
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
            let label = discriminator_label(discriminator, &disc)?;
            if let Some(index) = select_member(&tc, label) {
                ancestors.push(&tc);
                let result = free_walk(&members[index].tc, *inner, ancestors, report);
                ancestors.pop();
                result?;
            }
        }
        (_, value) => {
            // the walk only runs over values that were valid when stored
            return Err(CdrError::Internal(format!(
                "freeing {} as {}",
                value.kind_name(),
                tc
            )));
        }
    }
    Ok(())
}
