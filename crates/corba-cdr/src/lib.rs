//! Common Data Representation for MateCORBA
//!
//! This crate holds everything needed to describe and move CORBA data:
//!
//! - [`CdrWriter`] / [`CdrReader`]: aligned primitive streams with
//!   encapsulation support and either byte order
//! - [`TypeCode`]: runtime type descriptors, including recursive types,
//!   with their own wire form
//! - [`Value`] / [`Any`]: dynamic values and TypeCode-driven marshaling
//! - [`Ior`]: interoperable object references
//! - [`Allocator`]: blocks that remember how to release themselves

pub mod alloc;
pub mod any;
pub mod context;
pub mod decode;
pub mod encode;
pub mod error;
pub mod ior;
pub mod marshal;
pub mod primitives;
pub mod typecode;
pub mod value;

pub use alloc::{AllocStats, Allocator, Block, ElementFreeFn, FreeTag};
pub use any::Any;
pub use context::CdrContext;
pub use decode::{CdrDecode, CdrReader};
pub use encode::{CdrEncode, CdrWriter};
pub use error::{CdrError, Result};
pub use ior::{IiopProfile, Ior, TaggedProfile, TAG_INTERNET_IOP};
pub use marshal::{decode_value, encode_value};
pub use typecode::{Layout, StructMember, TcKind, TypeCode, UnionMember, TC_INDIRECTION};
pub use value::{FreeReport, IorHandle, ObjectHandle, ObjectResolver, Value};

pub use bytes::{Buf, BufMut, Bytes, BytesMut};
