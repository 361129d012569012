//! Object key layout
//!
//! Transient adapters stamp their keys with the ORB's random cookie so a
//! reference outliving its ORB instance can never reach a new adapter that
//! happens to reuse the index:
//!
//! ```text
//! transient:  'T' | cookie (8) | adapter index (u32 BE) | object id
//! persistent: 'P' | count (u16 BE) | { len (u16 BE) | name }* | object id
//! ```
//!
//! Persistent keys name the adapter by its path below the root POA.

use crate::poa::ObjectId;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

const TRANSIENT: u8 = b'T';
const PERSISTENT: u8 = b'P';

pub(crate) type Cookie = [u8; 8];

/// Which adapter a key addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AdapterKey {
    Transient { cookie: Cookie, index: u32 },
    Persistent { path: Vec<String> },
}

/// A decoded object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ObjectKey {
    pub adapter: AdapterKey,
    pub oid: ObjectId,
}

impl ObjectKey {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.oid.len());
        match &self.adapter {
            AdapterKey::Transient { cookie, index } => {
                out.push(TRANSIENT);
                out.extend_from_slice(cookie);
                out.extend_from_slice(&index.to_be_bytes());
            }
            AdapterKey::Persistent { path } => {
                out.push(PERSISTENT);
                out.extend_from_slice(&(path.len() as u16).to_be_bytes());
                for name in path {
                    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    out.extend_from_slice(name.as_bytes());
                }
            }
        }
        out.extend_from_slice(&self.oid);
        out
    }

    /// `None` for keys this ORB never produced
    pub(crate) fn decode(key: &[u8]) -> Option<Self> {
        let (&tag, rest) = key.split_first()?;
        match tag {
            TRANSIENT => {
                let cookie: Cookie = rest.get(..8)?.try_into().ok()?;
                let index = u32::from_be_bytes(rest.get(8..12)?.try_into().ok()?);
                Some(Self {
                    adapter: AdapterKey::Transient { cookie, index },
                    oid: rest[12..].to_vec(),
                })
            }
            PERSISTENT => {
                let count = u16::from_be_bytes(rest.get(..2)?.try_into().ok()?);
                let mut pos = 2;
                let mut path = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let len = u16::from_be_bytes(rest.get(pos..pos + 2)?.try_into().ok()?) as usize;
                    pos += 2;
                    let name = std::str::from_utf8(rest.get(pos..pos + len)?).ok()?;
                    path.push(name.to_string());
                    pos += len;
                }
                Some(Self {
                    adapter: AdapterKey::Persistent { path },
                    oid: rest[pos..].to_vec(),
                })
            }
            _ => None,
        }
    }
}

/// Fresh random cookie for an ORB instance
pub(crate) fn new_cookie() -> Cookie {
    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&Uuid::new_v4().as_bytes()[..8]);
    cookie
}

/// Generator of system-assigned object ids: a 4-byte counter followed by
/// 12 random octets
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    counter: AtomicU32,
}

impl IdGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next(&self) -> ObjectId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut oid = Vec::with_capacity(16);
        oid.extend_from_slice(&n.to_be_bytes());
        oid.extend_from_slice(&Uuid::new_v4().as_bytes()[..12]);
        oid
    }
}
