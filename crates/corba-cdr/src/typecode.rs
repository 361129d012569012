//! TypeCodes: runtime descriptors for marshalable types
//!
//! A [`TypeCode`] is immutable and cheaply shared (`Arc`). Recursive
//! types are expressed with a placeholder, [`TypeCode::recursive`], that
//! names an enclosing struct, union or exception by repository id. Walks
//! resolve placeholders against the stack of enclosing TypeCodes instead
//! of expanding them inline, so no TypeCode graph ever contains a cycle.
//!
//! # Wire format
//!
//! ```text
//! +-----------+---------------------------------------------+
//! | ulong     | parameters                                  |
//! | TCKind    | none / ulong bound / encapsulation          |
//! +-----------+---------------------------------------------+
//!
//! indirection:
//! +-------------+--------------------------------------------+
//! | 0xffffffff  | long offset, relative to the offset field  |
//! +-------------+--------------------------------------------+
//! ```

use crate::decode::CdrReader;
use crate::encode::CdrWriter;
use crate::error::{CdrError, Result};
use std::fmt;
use std::sync::Arc;

/// Kind marker introducing an indirection in the TypeCode wire format
pub const TC_INDIRECTION: u32 = 0xffff_ffff;

/// Deepest TypeCode nesting accepted from the wire
const MAX_TYPECODE_DEPTH: usize = 64;

/// TypeCode kinds with their standard numeric values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcKind {
    Null,
    Void,
    Short,
    Long,
    UShort,
    ULong,
    Float,
    Double,
    Boolean,
    Char,
    Octet,
    Any,
    TypeCode,
    Objref,
    Struct,
    Union,
    Enum,
    String,
    Sequence,
    Array,
    Alias,
    Except,
    LongLong,
    ULongLong,
    WChar,
    WString,
}

impl TcKind {
    /// Numeric value used on the wire
    pub fn value(self) -> u32 {
        match self {
            TcKind::Null => 0,
            TcKind::Void => 1,
            TcKind::Short => 2,
            TcKind::Long => 3,
            TcKind::UShort => 4,
            TcKind::ULong => 5,
            TcKind::Float => 6,
            TcKind::Double => 7,
            TcKind::Boolean => 8,
            TcKind::Char => 9,
            TcKind::Octet => 10,
            TcKind::Any => 11,
            TcKind::TypeCode => 12,
            TcKind::Objref => 14,
            TcKind::Struct => 15,
            TcKind::Union => 16,
            TcKind::Enum => 17,
            TcKind::String => 18,
            TcKind::Sequence => 19,
            TcKind::Array => 20,
            TcKind::Alias => 21,
            TcKind::Except => 22,
            TcKind::LongLong => 23,
            TcKind::ULongLong => 24,
            TcKind::WChar => 26,
            TcKind::WString => 27,
        }
    }

    /// Parse a wire value; principal and long double are not supported
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => TcKind::Null,
            1 => TcKind::Void,
            2 => TcKind::Short,
            3 => TcKind::Long,
            4 => TcKind::UShort,
            5 => TcKind::ULong,
            6 => TcKind::Float,
            7 => TcKind::Double,
            8 => TcKind::Boolean,
            9 => TcKind::Char,
            10 => TcKind::Octet,
            11 => TcKind::Any,
            12 => TcKind::TypeCode,
            14 => TcKind::Objref,
            15 => TcKind::Struct,
            16 => TcKind::Union,
            17 => TcKind::Enum,
            18 => TcKind::String,
            19 => TcKind::Sequence,
            20 => TcKind::Array,
            21 => TcKind::Alias,
            22 => TcKind::Except,
            23 => TcKind::LongLong,
            24 => TcKind::ULongLong,
            26 => TcKind::WChar,
            27 => TcKind::WString,
            other => return Err(CdrError::BadTypeCodeKind(other)),
        })
    }

    /// Kinds whose parameters travel in an encapsulation
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            TcKind::Objref
                | TcKind::Struct
                | TcKind::Union
                | TcKind::Enum
                | TcKind::Sequence
                | TcKind::Array
                | TcKind::Alias
                | TcKind::Except
        )
    }

    /// Kinds a recursive placeholder may refer to
    pub fn is_aggregate(self) -> bool {
        matches!(self, TcKind::Struct | TcKind::Union | TcKind::Except)
    }

    fn is_simple(self) -> bool {
        !self.is_complex() && !matches!(self, TcKind::String | TcKind::WString)
    }

    /// Kinds allowed as a union discriminator
    pub fn can_discriminate(self) -> bool {
        matches!(
            self,
            TcKind::Short
                | TcKind::Long
                | TcKind::LongLong
                | TcKind::UShort
                | TcKind::ULong
                | TcKind::ULongLong
                | TcKind::Boolean
                | TcKind::Char
                | TcKind::WChar
                | TcKind::Enum
        )
    }
}

/// Named member of a struct or exception
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub tc: TypeCode,
}

impl StructMember {
    pub fn new(name: impl Into<String>, tc: TypeCode) -> Self {
        Self {
            name: name.into(),
            tc,
        }
    }
}

/// Labeled member of a union
///
/// Labels are normalized to `i64`: booleans are 0/1, chars their code,
/// enums their ordinal. The label of the default member is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMember {
    pub label: i64,
    pub name: String,
    pub tc: TypeCode,
}

impl UnionMember {
    pub fn new(label: i64, name: impl Into<String>, tc: TypeCode) -> Self {
        Self {
            label,
            name: name.into(),
            tc,
        }
    }
}

#[derive(Debug)]
pub(crate) enum TcDesc {
    Simple(TcKind),
    String {
        bound: u32,
    },
    WString {
        bound: u32,
    },
    Sequence {
        content: TypeCode,
        bound: u32,
    },
    Array {
        content: TypeCode,
        length: u32,
    },
    Struct {
        id: String,
        name: String,
        members: Vec<StructMember>,
    },
    Except {
        id: String,
        name: String,
        members: Vec<StructMember>,
    },
    Union {
        id: String,
        name: String,
        discriminator: TypeCode,
        default_index: Option<usize>,
        members: Vec<UnionMember>,
    },
    Enum {
        id: String,
        name: String,
        members: Vec<String>,
    },
    Alias {
        id: String,
        name: String,
        content: TypeCode,
    },
    Objref {
        id: String,
        name: String,
    },
    Recursive {
        kind: TcKind,
        id: String,
    },
}

/// In-memory size and alignment of a value, using C layout rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
}

impl Layout {
    const POINTER: Layout = Layout { size: 8, align: 8 };

    fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

fn round_up(value: usize, align: usize) -> Result<usize> {
    value
        .checked_add(crate::CdrContext::align_padding(value, align))
        .ok_or_else(|| CdrError::SizeOverflow(format!("{value} rounded to {align}")))
}

fn add_size(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b)
        .ok_or_else(|| CdrError::SizeOverflow(format!("{a} + {b} bytes")))
}

/// Runtime type descriptor
#[derive(Clone)]
pub struct TypeCode(Arc<TcDesc>);

impl TypeCode {
    fn from_desc(desc: TcDesc) -> Self {
        TypeCode(Arc::new(desc))
    }

    pub(crate) fn desc(&self) -> &TcDesc {
        &self.0
    }

    /// Whether two handles share the same descriptor
    pub fn ptr_eq(&self, other: &TypeCode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn simple(kind: TcKind) -> Self {
        Self::from_desc(TcDesc::Simple(kind))
    }

    pub fn null() -> Self {
        Self::simple(TcKind::Null)
    }

    pub fn void() -> Self {
        Self::simple(TcKind::Void)
    }

    pub fn short() -> Self {
        Self::simple(TcKind::Short)
    }

    pub fn long() -> Self {
        Self::simple(TcKind::Long)
    }

    pub fn long_long() -> Self {
        Self::simple(TcKind::LongLong)
    }

    pub fn ushort() -> Self {
        Self::simple(TcKind::UShort)
    }

    pub fn ulong() -> Self {
        Self::simple(TcKind::ULong)
    }

    pub fn ulong_long() -> Self {
        Self::simple(TcKind::ULongLong)
    }

    pub fn float() -> Self {
        Self::simple(TcKind::Float)
    }

    pub fn double() -> Self {
        Self::simple(TcKind::Double)
    }

    pub fn boolean() -> Self {
        Self::simple(TcKind::Boolean)
    }

    pub fn char() -> Self {
        Self::simple(TcKind::Char)
    }

    pub fn wchar() -> Self {
        Self::simple(TcKind::WChar)
    }

    pub fn octet() -> Self {
        Self::simple(TcKind::Octet)
    }

    pub fn any() -> Self {
        Self::simple(TcKind::Any)
    }

    pub fn typecode() -> Self {
        Self::simple(TcKind::TypeCode)
    }

    /// String with an optional bound; 0 means unbounded
    pub fn string(bound: u32) -> Self {
        Self::from_desc(TcDesc::String { bound })
    }

    pub fn wstring(bound: u32) -> Self {
        Self::from_desc(TcDesc::WString { bound })
    }

    /// Sequence with an optional bound; 0 means unbounded
    pub fn sequence(content: TypeCode, bound: u32) -> Self {
        Self::from_desc(TcDesc::Sequence { content, bound })
    }

    pub fn array(content: TypeCode, length: u32) -> Self {
        Self::from_desc(TcDesc::Array { content, length })
    }

    pub fn structure<I, S>(id: impl Into<String>, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeCode)>,
        S: Into<String>,
    {
        Self::from_desc(TcDesc::Struct {
            id: id.into(),
            name: name.into(),
            members: members
                .into_iter()
                .map(|(n, tc)| StructMember::new(n, tc))
                .collect(),
        })
    }

    pub fn exception<I, S>(id: impl Into<String>, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeCode)>,
        S: Into<String>,
    {
        Self::from_desc(TcDesc::Except {
            id: id.into(),
            name: name.into(),
            members: members
                .into_iter()
                .map(|(n, tc)| StructMember::new(n, tc))
                .collect(),
        })
    }

    /// Union; fails if the discriminator kind cannot discriminate or the
    /// default index is out of range
    pub fn union(
        id: impl Into<String>,
        name: impl Into<String>,
        discriminator: TypeCode,
        members: Vec<UnionMember>,
        default_index: Option<usize>,
    ) -> Result<Self> {
        let disc_kind = discriminator.unalias().kind();
        if !disc_kind.can_discriminate() {
            return Err(CdrError::InvalidDiscriminant(format!("{:?}", disc_kind)));
        }
        if let Some(index) = default_index {
            if index >= members.len() {
                return Err(CdrError::InvalidDiscriminant(format!(
                    "default index {} with {} members",
                    index,
                    members.len()
                )));
            }
        }
        Ok(Self::from_desc(TcDesc::Union {
            id: id.into(),
            name: name.into(),
            discriminator,
            default_index,
            members,
        }))
    }

    pub fn enumeration<I, S>(id: impl Into<String>, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_desc(TcDesc::Enum {
            id: id.into(),
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        })
    }

    pub fn alias(id: impl Into<String>, name: impl Into<String>, content: TypeCode) -> Self {
        Self::from_desc(TcDesc::Alias {
            id: id.into(),
            name: name.into(),
            content,
        })
    }

    pub fn objref(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_desc(TcDesc::Objref {
            id: id.into(),
            name: name.into(),
        })
    }

    /// Placeholder for a reference back to an enclosing struct, union or
    /// exception with the given repository id
    pub fn recursive(kind: TcKind, id: impl Into<String>) -> Result<Self> {
        if !kind.is_aggregate() {
            return Err(CdrError::UnresolvedRecursion(format!(
                "{:?} cannot be recursive",
                kind
            )));
        }
        Ok(Self::from_desc(TcDesc::Recursive {
            kind,
            id: id.into(),
        }))
    }

    pub fn kind(&self) -> TcKind {
        match self.desc() {
            TcDesc::Simple(kind) => *kind,
            TcDesc::String { .. } => TcKind::String,
            TcDesc::WString { .. } => TcKind::WString,
            TcDesc::Sequence { .. } => TcKind::Sequence,
            TcDesc::Array { .. } => TcKind::Array,
            TcDesc::Struct { .. } => TcKind::Struct,
            TcDesc::Except { .. } => TcKind::Except,
            TcDesc::Union { .. } => TcKind::Union,
            TcDesc::Enum { .. } => TcKind::Enum,
            TcDesc::Alias { .. } => TcKind::Alias,
            TcDesc::Objref { .. } => TcKind::Objref,
            TcDesc::Recursive { kind, .. } => *kind,
        }
    }

    /// Whether this is an unresolved recursive placeholder
    pub fn is_recursive(&self) -> bool {
        matches!(self.desc(), TcDesc::Recursive { .. })
    }

    /// Repository id of a named type
    pub fn id(&self) -> Option<&str> {
        match self.desc() {
            TcDesc::Struct { id, .. }
            | TcDesc::Except { id, .. }
            | TcDesc::Union { id, .. }
            | TcDesc::Enum { id, .. }
            | TcDesc::Alias { id, .. }
            | TcDesc::Objref { id, .. }
            | TcDesc::Recursive { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.desc() {
            TcDesc::Struct { name, .. }
            | TcDesc::Except { name, .. }
            | TcDesc::Union { name, .. }
            | TcDesc::Enum { name, .. }
            | TcDesc::Alias { name, .. }
            | TcDesc::Objref { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn member_count(&self) -> usize {
        match self.desc() {
            TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => members.len(),
            TcDesc::Union { members, .. } => members.len(),
            TcDesc::Enum { members, .. } => members.len(),
            _ => 0,
        }
    }

    pub fn member_name(&self, index: usize) -> Option<&str> {
        match self.desc() {
            TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => {
                members.get(index).map(|m| m.name.as_str())
            }
            TcDesc::Union { members, .. } => members.get(index).map(|m| m.name.as_str()),
            TcDesc::Enum { members, .. } => members.get(index).map(String::as_str),
            _ => None,
        }
    }

    pub fn member_type(&self, index: usize) -> Option<&TypeCode> {
        match self.desc() {
            TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => {
                members.get(index).map(|m| &m.tc)
            }
            TcDesc::Union { members, .. } => members.get(index).map(|m| &m.tc),
            _ => None,
        }
    }

    pub fn member_label(&self, index: usize) -> Option<i64> {
        match self.desc() {
            TcDesc::Union { members, .. } => members.get(index).map(|m| m.label),
            _ => None,
        }
    }

    pub fn discriminator_type(&self) -> Option<&TypeCode> {
        match self.desc() {
            TcDesc::Union { discriminator, .. } => Some(discriminator),
            _ => None,
        }
    }

    pub fn default_index(&self) -> Option<usize> {
        match self.desc() {
            TcDesc::Union { default_index, .. } => *default_index,
            _ => None,
        }
    }

    /// Element type of a sequence or array, or the aliased type
    pub fn content_type(&self) -> Option<&TypeCode> {
        match self.desc() {
            TcDesc::Sequence { content, .. }
            | TcDesc::Array { content, .. }
            | TcDesc::Alias { content, .. } => Some(content),
            _ => None,
        }
    }

    /// Bound of a string or sequence, or the length of an array
    pub fn length(&self) -> Option<u32> {
        match self.desc() {
            TcDesc::String { bound } | TcDesc::WString { bound } => Some(*bound),
            TcDesc::Sequence { bound, .. } => Some(*bound),
            TcDesc::Array { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Strip any number of alias layers
    pub fn unalias(&self) -> TypeCode {
        let mut tc = self.clone();
        while let TcDesc::Alias { content, .. } = tc.desc() {
            let next = content.clone();
            tc = next;
        }
        tc
    }

    /// In-memory size and alignment of a value of this type.
    ///
    /// Strings, object references, TypeCodes and recursive placeholders
    /// are pointers; sequences and anys are three-word headers. A type
    /// too large for the address space is a MARSHAL-class error.
    pub fn layout(&self) -> Result<Layout> {
        let layout = match self.desc() {
            TcDesc::Simple(kind) => match kind {
                TcKind::Null | TcKind::Void => Layout::new(0, 1),
                TcKind::Boolean | TcKind::Char | TcKind::Octet => Layout::new(1, 1),
                TcKind::Short | TcKind::UShort | TcKind::WChar => Layout::new(2, 2),
                TcKind::Long | TcKind::ULong | TcKind::Float => Layout::new(4, 4),
                TcKind::LongLong | TcKind::ULongLong | TcKind::Double => Layout::new(8, 8),
                TcKind::Any => Layout::new(24, 8),
                _ => Layout::POINTER,
            },
            TcDesc::String { .. }
            | TcDesc::WString { .. }
            | TcDesc::Objref { .. }
            | TcDesc::Recursive { .. } => Layout::POINTER,
            TcDesc::Sequence { .. } => Layout::new(24, 8),
            TcDesc::Enum { .. } => Layout::new(4, 4),
            TcDesc::Alias { content, .. } => content.layout()?,
            TcDesc::Array { content, length } => {
                let elem = content.layout()?;
                let size = elem.size.checked_mul(*length as usize).ok_or_else(|| {
                    CdrError::SizeOverflow(format!("array of {length} x {} bytes", elem.size))
                })?;
                Layout::new(size, elem.align)
            }
            TcDesc::Struct { members, .. } | TcDesc::Except { members, .. } => {
                let mut size = 0;
                let mut align = 1;
                for member in members {
                    let l = member.tc.layout()?;
                    size = add_size(round_up(size, l.align)?, l.size)?;
                    align = align.max(l.align);
                }
                Layout::new(round_up(size, align)?, align)
            }
            TcDesc::Union {
                discriminator,
                members,
                ..
            } => {
                let disc = discriminator.layout()?;
                let mut body = Layout::new(0, 1);
                for member in members {
                    let l = member.tc.layout()?;
                    body.size = body.size.max(l.size);
                    body.align = body.align.max(l.align);
                }
                let align = disc.align.max(body.align);
                let size = add_size(round_up(disc.size, body.align)?, body.size)?;
                Layout::new(round_up(size, align)?, align)
            }
        };
        Ok(layout)
    }

    /// Structural equality including names and aliases
    pub fn equal(&self, other: &TypeCode) -> bool {
        compare(self, other, true)
    }

    /// Structural equality ignoring member names and alias layers
    pub fn equivalent(&self, other: &TypeCode) -> bool {
        compare(self, other, false)
    }

    /// Marshal this TypeCode
    pub fn encode(&self, w: &mut CdrWriter) -> Result<()> {
        write_typecode(w, self)
    }

    /// Unmarshal a TypeCode
    pub fn decode(r: &mut CdrReader<'_>) -> Result<TypeCode> {
        read_typecode(r, 0)
    }
}

fn compare(a: &TypeCode, b: &TypeCode, strict: bool) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    let (a, b) = if strict {
        (a.clone(), b.clone())
    } else {
        (a.unalias(), b.unalias())
    };
    let names_match = |x: &str, y: &str| !strict || x == y;
    let ids_match = |x: &str, y: &str| x == y || (!strict && (x.is_empty() || y.is_empty()));
    match (a.desc(), b.desc()) {
        (TcDesc::Simple(x), TcDesc::Simple(y)) => x == y,
        (TcDesc::String { bound: x }, TcDesc::String { bound: y })
        | (TcDesc::WString { bound: x }, TcDesc::WString { bound: y }) => x == y,
        (
            TcDesc::Sequence {
                content: c1,
                bound: b1,
            },
            TcDesc::Sequence {
                content: c2,
                bound: b2,
            },
        ) => b1 == b2 && compare(c1, c2, strict),
        (
            TcDesc::Array {
                content: c1,
                length: l1,
            },
            TcDesc::Array {
                content: c2,
                length: l2,
            },
        ) => l1 == l2 && compare(c1, c2, strict),
        (
            TcDesc::Struct {
                id: i1,
                name: n1,
                members: m1,
            },
            TcDesc::Struct {
                id: i2,
                name: n2,
                members: m2,
            },
        )
        | (
            TcDesc::Except {
                id: i1,
                name: n1,
                members: m1,
            },
            TcDesc::Except {
                id: i2,
                name: n2,
                members: m2,
            },
        ) => {
            ids_match(i1, i2)
                && names_match(n1, n2)
                && m1.len() == m2.len()
                && m1
                    .iter()
                    .zip(m2)
                    .all(|(x, y)| names_match(&x.name, &y.name) && compare(&x.tc, &y.tc, strict))
        }
        (
            TcDesc::Union {
                id: i1,
                name: n1,
                discriminator: d1,
                default_index: di1,
                members: m1,
            },
            TcDesc::Union {
                id: i2,
                name: n2,
                discriminator: d2,
                default_index: di2,
                members: m2,
            },
        ) => {
            ids_match(i1, i2)
                && names_match(n1, n2)
                && di1 == di2
                && compare(d1, d2, strict)
                && m1.len() == m2.len()
                && m1.iter().zip(m2).enumerate().all(|(i, (x, y))| {
                    (Some(i) == *di1 || x.label == y.label)
                        && names_match(&x.name, &y.name)
                        && compare(&x.tc, &y.tc, strict)
                })
        }
        (
            TcDesc::Enum {
                id: i1,
                name: n1,
                members: m1,
            },
            TcDesc::Enum {
                id: i2,
                name: n2,
                members: m2,
            },
        ) => {
            ids_match(i1, i2)
                && names_match(n1, n2)
                && m1.len() == m2.len()
                && m1.iter().zip(m2).all(|(x, y)| names_match(x, y))
        }
        (
            TcDesc::Alias {
                id: i1,
                name: n1,
                content: c1,
            },
            TcDesc::Alias {
                id: i2,
                name: n2,
                content: c2,
            },
        ) => i1 == i2 && n1 == n2 && compare(c1, c2, strict),
        (TcDesc::Objref { id: i1, name: n1 }, TcDesc::Objref { id: i2, name: n2 }) => {
            ids_match(i1, i2) && names_match(n1, n2)
        }
        (TcDesc::Recursive { kind: k1, id: i1 }, TcDesc::Recursive { kind: k2, id: i2 }) => {
            k1 == k2 && i1 == i2
        }
        _ => false,
    }
}

impl PartialEq for TypeCode {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeCode({})", self)
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.desc() {
            TcDesc::Simple(kind) => write!(f, "{:?}", kind),
            TcDesc::String { bound: 0 } => write!(f, "string"),
            TcDesc::String { bound } => write!(f, "string<{}>", bound),
            TcDesc::WString { bound: 0 } => write!(f, "wstring"),
            TcDesc::WString { bound } => write!(f, "wstring<{}>", bound),
            TcDesc::Sequence { content, bound: 0 } => write!(f, "sequence<{}>", content),
            TcDesc::Sequence { content, bound } => write!(f, "sequence<{}, {}>", content, bound),
            TcDesc::Array { content, length } => write!(f, "{}[{}]", content, length),
            TcDesc::Struct { id, .. } => write!(f, "struct {}", id),
            TcDesc::Except { id, .. } => write!(f, "exception {}", id),
            TcDesc::Union { id, .. } => write!(f, "union {}", id),
            TcDesc::Enum { id, .. } => write!(f, "enum {}", id),
            TcDesc::Alias { id, .. } => write!(f, "typedef {}", id),
            TcDesc::Objref { id, .. } => write!(f, "interface {}", id),
            TcDesc::Recursive { id, .. } => write!(f, "recursive {}", id),
        }
    }
}

/// Stack of enclosing aggregates used to resolve recursive placeholders
#[derive(Debug, Default)]
pub(crate) struct Ancestors {
    frames: Vec<TypeCode>,
}

impl Ancestors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, tc: &TypeCode) {
        self.frames.push(tc.clone());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Replace a placeholder with the enclosing definition it names
    pub fn resolve(&self, tc: &TypeCode) -> Result<TypeCode> {
        match tc.desc() {
            TcDesc::Recursive { kind, id } => self
                .frames
                .iter()
                .rev()
                .find(|frame| frame.kind() == *kind && frame.id() == Some(id.as_str()))
                .cloned()
                .ok_or_else(|| CdrError::UnresolvedRecursion(id.clone())),
            _ => Ok(tc.clone()),
        }
    }
}

fn write_indirection(w: &mut CdrWriter, target: usize) {
    w.write_ulong(TC_INDIRECTION);
    let field = w.len();
    w.write_long((target as i64 - field as i64) as i32);
}

pub(crate) fn write_label(w: &mut CdrWriter, disc: &TypeCode, label: i64) -> Result<()> {
    match disc.unalias().kind() {
        TcKind::Short => w.write_short(label as i16),
        TcKind::UShort | TcKind::WChar => w.write_ushort(label as u16),
        TcKind::Long => w.write_long(label as i32),
        TcKind::ULong | TcKind::Enum => w.write_ulong(label as u32),
        TcKind::LongLong => w.write_longlong(label),
        TcKind::ULongLong => w.write_ulonglong(label as u64),
        TcKind::Boolean | TcKind::Char => w.write_octet(label as u8),
        other => return Err(CdrError::InvalidDiscriminant(format!("{:?}", other))),
    }
    Ok(())
}

pub(crate) fn read_label(r: &mut CdrReader<'_>, disc: &TypeCode) -> Result<i64> {
    Ok(match disc.unalias().kind() {
        TcKind::Short => r.read_short()? as i64,
        TcKind::UShort | TcKind::WChar => r.read_ushort()? as i64,
        TcKind::Long => r.read_long()? as i64,
        TcKind::ULong | TcKind::Enum => r.read_ulong()? as i64,
        TcKind::LongLong => r.read_longlong()?,
        TcKind::ULongLong => r.read_ulonglong()? as i64,
        TcKind::Boolean | TcKind::Char => r.read_octet()? as i64,
        other => return Err(CdrError::InvalidDiscriminant(format!("{:?}", other))),
    })
}

fn write_typecode(w: &mut CdrWriter, tc: &TypeCode) -> Result<()> {
    if let TcDesc::Recursive { id, .. } = tc.desc() {
        let target = w
            .typecodes
            .open
            .iter()
            .rev()
            .find(|(_, open_id, _)| open_id == id)
            .map(|(_, _, pos)| *pos)
            .ok_or_else(|| CdrError::UnresolvedRecursion(id.clone()))?;
        write_indirection(w, target);
        return Ok(());
    }

    let kind = tc.kind();
    if kind.is_complex() && w.typecodes.reuse {
        let earlier = w
            .typecodes
            .written
            .iter()
            .find(|(seen, _)| seen.ptr_eq(tc))
            .map(|(_, pos)| *pos);
        if let Some(target) = earlier {
            write_indirection(w, target);
            return Ok(());
        }
    }

    w.align(4);
    let start = w.len();
    w.write_ulong(kind.value());

    match tc.desc() {
        TcDesc::Simple(_) | TcDesc::Recursive { .. } => {}
        TcDesc::String { bound } | TcDesc::WString { bound } => w.write_ulong(*bound),
        TcDesc::Objref { id, name } => {
            w.begin_encapsulation();
            w.write_string(id)?;
            w.write_string(name)?;
            w.end_encapsulation()?;
        }
        TcDesc::Struct { id, name, members } | TcDesc::Except { id, name, members } => {
            w.typecodes.open.push((kind, id.clone(), start));
            w.begin_encapsulation();
            w.write_string(id)?;
            w.write_string(name)?;
            w.write_ulong(members.len() as u32);
            for member in members {
                w.write_string(&member.name)?;
                write_typecode(w, &member.tc)?;
            }
            w.end_encapsulation()?;
            w.typecodes.open.pop();
        }
        TcDesc::Union {
            id,
            name,
            discriminator,
            default_index,
            members,
        } => {
            w.typecodes.open.push((kind, id.clone(), start));
            w.begin_encapsulation();
            w.write_string(id)?;
            w.write_string(name)?;
            write_typecode(w, discriminator)?;
            w.write_long(default_index.map(|i| i as i32).unwrap_or(-1));
            w.write_ulong(members.len() as u32);
            for (index, member) in members.iter().enumerate() {
                if Some(index) == *default_index {
                    w.write_octet(0);
                } else {
                    write_label(w, discriminator, member.label)?;
                }
                w.write_string(&member.name)?;
                write_typecode(w, &member.tc)?;
            }
            w.end_encapsulation()?;
            w.typecodes.open.pop();
        }
        TcDesc::Enum { id, name, members } => {
            w.begin_encapsulation();
            w.write_string(id)?;
            w.write_string(name)?;
            w.write_ulong(members.len() as u32);
            for member in members {
                w.write_string(member)?;
            }
            w.end_encapsulation()?;
        }
        TcDesc::Sequence { content, bound } => {
            w.begin_encapsulation();
            write_typecode(w, content)?;
            w.write_ulong(*bound);
            w.end_encapsulation()?;
        }
        TcDesc::Array { content, length } => {
            w.begin_encapsulation();
            write_typecode(w, content)?;
            w.write_ulong(*length);
            w.end_encapsulation()?;
        }
        TcDesc::Alias { id, name, content } => {
            w.begin_encapsulation();
            w.write_string(id)?;
            w.write_string(name)?;
            write_typecode(w, content)?;
            w.end_encapsulation()?;
        }
    }

    if kind.is_complex() {
        w.typecodes.written.push((tc.clone(), start));
    }
    Ok(())
}

fn read_count(r: &CdrReader<'_>, count: u32) -> Result<usize> {
    let count = count as usize;
    if count > r.remaining() {
        return Err(CdrError::BufferUnderflow {
            needed: count,
            have: r.remaining(),
        });
    }
    Ok(count)
}

fn read_typecode(r: &mut CdrReader<'_>, depth: usize) -> Result<TypeCode> {
    if depth > MAX_TYPECODE_DEPTH {
        return Err(CdrError::NestingTooDeep(depth));
    }
    r.align(4)?;
    let start = r.position();
    let raw = r.read_ulong()?;

    if raw == TC_INDIRECTION {
        let field = r.position();
        let offset = r.read_long()?;
        let target = field as i64 + offset as i64;
        if target < 0 || target as usize >= start {
            return Err(CdrError::BadIndirection {
                offset,
                position: field,
            });
        }
        let target = target as usize;
        if let Some(tc) = r.typecodes.complete.get(&target) {
            return Ok(tc.clone());
        }
        if let Some((_, kind, id)) = r.typecodes.open.iter().find(|(pos, _, _)| *pos == target) {
            return TypeCode::recursive(*kind, id.clone());
        }
        return Err(CdrError::BadIndirection {
            offset,
            position: field,
        });
    }

    let kind = TcKind::from_u32(raw)?;
    let tc = match kind {
        TcKind::String => TypeCode::string(r.read_ulong()?),
        TcKind::WString => TypeCode::wstring(r.read_ulong()?),
        TcKind::Objref => {
            r.enter_encapsulation()?;
            let id = r.read_string()?;
            let name = r.read_string()?;
            r.exit_encapsulation()?;
            TypeCode::objref(id, name)
        }
        TcKind::Struct | TcKind::Except => {
            r.enter_encapsulation()?;
            let id = r.read_string()?;
            r.typecodes.open.push((start, kind, id.clone()));
            let name = r.read_string()?;
            let count = r.read_ulong()?;
            let count = read_count(r, count)?;
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                let member_name = r.read_string()?;
                let member_tc = read_typecode(r, depth + 1)?;
                members.push(StructMember::new(member_name, member_tc));
            }
            r.typecodes.open.pop();
            r.exit_encapsulation()?;
            if kind == TcKind::Struct {
                TypeCode::from_desc(TcDesc::Struct { id, name, members })
            } else {
                TypeCode::from_desc(TcDesc::Except { id, name, members })
            }
        }
        TcKind::Union => {
            r.enter_encapsulation()?;
            let id = r.read_string()?;
            r.typecodes.open.push((start, kind, id.clone()));
            let name = r.read_string()?;
            let discriminator = read_typecode(r, depth + 1)?;
            let default_index = match r.read_long()? {
                i if i < 0 => None,
                i => Some(i as usize),
            };
            let count = r.read_ulong()?;
            let count = read_count(r, count)?;
            let mut members = Vec::with_capacity(count);
            for index in 0..count {
                let label = if Some(index) == default_index {
                    r.read_octet()?;
                    0
                } else {
                    read_label(r, &discriminator)?
                };
                let member_name = r.read_string()?;
                let member_tc = read_typecode(r, depth + 1)?;
                members.push(UnionMember::new(label, member_name, member_tc));
            }
            r.typecodes.open.pop();
            r.exit_encapsulation()?;
            TypeCode::union(id, name, discriminator, members, default_index)?
        }
        TcKind::Enum => {
            r.enter_encapsulation()?;
            let id = r.read_string()?;
            let name = r.read_string()?;
            let count = r.read_ulong()?;
            let count = read_count(r, count)?;
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                members.push(r.read_string()?);
            }
            r.exit_encapsulation()?;
            TypeCode::enumeration(id, name, members)
        }
        TcKind::Sequence | TcKind::Array => {
            r.enter_encapsulation()?;
            let content = read_typecode(r, depth + 1)?;
            let length = r.read_ulong()?;
            r.exit_encapsulation()?;
            if kind == TcKind::Sequence {
                TypeCode::sequence(content, length)
            } else {
                TypeCode::array(content, length)
            }
        }
        TcKind::Alias => {
            r.enter_encapsulation()?;
            let id = r.read_string()?;
            let name = r.read_string()?;
            let content = read_typecode(r, depth + 1)?;
            r.exit_encapsulation()?;
            TypeCode::alias(id, name, content)
        }
        simple => {
            debug_assert!(simple.is_simple());
            TypeCode::simple(simple)
        }
    };

    if kind.is_complex() {
        r.typecodes.complete.insert(start, tc.clone());
    }
    Ok(tc)
}
