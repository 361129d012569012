//! Typecode-aware allocation
//!
//! Every [`Block`] remembers how it has to be released. Freeing goes
//! through that tag, so callers never need to know what kind of block
//! they hold:
//!
//! | Tag        | Storage        | Release                                   |
//! |------------|----------------|-------------------------------------------|
//! | `None`     | nothing        | bookkeeping only                          |
//! | `Plain`    | raw bytes      | bytes dropped                             |
//! | `TypeCode` | dynamic value  | free walk (object references released)    |
//! | `Custom`   | raw elements   | callback per element, then bytes dropped  |
//!
//! A block is released exactly once: either by [`Block::free`], or when it
//! is dropped.

use crate::error::{CdrError, Result};
use crate::typecode::TypeCode;
use crate::value::{FreeReport, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Per-element cleanup for custom blocks
pub type ElementFreeFn = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    live_blocks: AtomicU64,
    live_bytes: AtomicU64,
    total_allocs: AtomicU64,
    total_frees: AtomicU64,
}

/// Snapshot of allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub live_blocks: u64,
    pub live_bytes: u64,
    pub total_allocs: u64,
    pub total_frees: u64,
}

/// Source of [`Block`]s. Clones share statistics.
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    counters: Arc<Counters>,
}

impl Allocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            live_blocks: self.counters.live_blocks.load(Ordering::Relaxed),
            live_bytes: self.counters.live_bytes.load(Ordering::Relaxed),
            total_allocs: self.counters.total_allocs.load(Ordering::Relaxed),
            total_frees: self.counters.total_frees.load(Ordering::Relaxed),
        }
    }

    fn track(&self, tag: FreeTag, storage: Storage, size: usize) -> Block {
        self.counters.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
        self.counters.total_allocs.fetch_add(1, Ordering::Relaxed);
        Block {
            tag,
            storage: Some(storage),
            size,
            counters: self.counters.clone(),
        }
    }

    /// Zeroed raw block. A zero-sized block needs no release.
    pub fn alloc(&self, size: usize) -> Block {
        let tag = if size == 0 {
            FreeTag::None
        } else {
            FreeTag::Plain
        };
        self.track(tag, Storage::Raw(vec![0; size]), size)
    }

    /// Default-initialized value of `tc`
    pub fn alloc_by_typecode(&self, tc: &TypeCode) -> Result<Block> {
        let value = tc.default_value()?;
        Ok(self.track(
            FreeTag::TypeCode(tc.clone()),
            Storage::Value(value),
            tc.layout()?.size,
        ))
    }

    /// Take ownership of an existing value of type `tc`
    pub fn alloc_value(&self, tc: &TypeCode, value: Value) -> Result<Block> {
        tc.check_value(&value)?;
        Ok(self.track(
            FreeTag::TypeCode(tc.clone()),
            Storage::Value(value),
            tc.layout()?.size,
        ))
    }

    /// Array of `count` zeroed elements; `free_fn` runs on each element
    /// before the block is released.
    pub fn alloc_with_free_fn(
        &self,
        elem_size: usize,
        count: usize,
        free_fn: ElementFreeFn,
    ) -> Result<Block> {
        let size = elem_size.checked_mul(count).ok_or_else(|| {
            CdrError::Internal(format!("{} elements of {} bytes overflow", count, elem_size))
        })?;
        Ok(self.track(
            FreeTag::Custom {
                elem_size,
                count,
                free_fn,
            },
            Storage::Raw(vec![0; size]),
            size,
        ))
    }

    /// Release a block according to its tag
    pub fn free(&self, block: Block) -> Result<FreeReport> {
        block.free()
    }
}

/// How a block is released
#[derive(Clone)]
pub enum FreeTag {
    None,
    Plain,
    TypeCode(TypeCode),
    Custom {
        elem_size: usize,
        count: usize,
        free_fn: ElementFreeFn,
    },
}

impl fmt::Debug for FreeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeTag::None => write!(f, "None"),
            FreeTag::Plain => write!(f, "Plain"),
            FreeTag::TypeCode(tc) => write!(f, "TypeCode({})", tc),
            FreeTag::Custom {
                elem_size, count, ..
            } => write!(f, "Custom({} x {})", count, elem_size),
        }
    }
}

#[derive(Debug)]
enum Storage {
    Raw(Vec<u8>),
    Value(Value),
}

/// An allocation that knows how to release itself
pub struct Block {
    tag: FreeTag,
    storage: Option<Storage>,
    size: usize,
    counters: Arc<Counters>,
}

impl Block {
    pub fn tag(&self) -> &FreeTag {
        &self.tag
    }

    /// In-memory size accounted to this block
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.storage {
            Some(Storage::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        match &mut self.storage {
            Some(Storage::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Some(Storage::Raw(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Some(Storage::Raw(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Hand the value to the caller instead of releasing it
    pub fn into_value(mut self) -> Option<Value> {
        let storage = self.storage.take();
        self.account_free();
        match storage {
            Some(Storage::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Release the block according to its tag
    pub fn free(mut self) -> Result<FreeReport> {
        self.release()
    }

    fn account_free(&self) {
        self.counters.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.counters
            .live_bytes
            .fetch_sub(self.size as u64, Ordering::Relaxed);
        self.counters.total_frees.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&mut self) -> Result<FreeReport> {
        let Some(storage) = self.storage.take() else {
            return Ok(FreeReport::default());
        };
        self.account_free();
        trace!(tag = ?self.tag, size = self.size, "freeing block");

        match (&self.tag, storage) {
            (FreeTag::None, _) => Ok(FreeReport::default()),
            (FreeTag::Plain, Storage::Raw(_)) => Ok(FreeReport {
                bytes: self.size,
                ..FreeReport::default()
            }),
            (FreeTag::TypeCode(tc), Storage::Value(value)) => tc.free_value(value),
            (
                FreeTag::Custom {
                    elem_size,
                    count,
                    free_fn,
                },
                Storage::Raw(mut bytes),
            ) => {
                let mut finalized = 0;
                if *elem_size > 0 {
                    for element in bytes.chunks_mut(*elem_size).take(*count) {
                        free_fn(element);
                        finalized += 1;
                    }
                }
                Ok(FreeReport {
                    bytes: self.size,
                    elements_finalized: finalized,
                    ..FreeReport::default()
                })
            }
            (tag, storage) => Err(CdrError::Internal(format!(
                "block tagged {:?} holds {:?}",
                tag, storage
            ))),
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("implicit block free failed: {}", e);
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("tag", &self.tag)
            .field("size", &self.size)
            .field("live", &self.storage.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ior::Ior;
    use crate::value::{IorHandle, ObjectHandle};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stats_track_live_blocks() {
        let alloc = Allocator::new();
        let a = alloc.alloc(16);
        let b = alloc.alloc_by_typecode(&TypeCode::double()).unwrap();
        assert_eq!(alloc.stats().live_blocks, 2);
        assert_eq!(alloc.stats().live_bytes, 24);

        let report = alloc.free(a).unwrap();
        assert_eq!(report.bytes, 16);
        drop(b);

        let stats = alloc.stats();
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.total_allocs, 2);
        assert_eq!(stats.total_frees, 2);
    }

    #[test]
    fn test_zero_sized_block_is_untagged() {
        let alloc = Allocator::new();
        let block = alloc.alloc(0);
        assert!(matches!(block.tag(), FreeTag::None));
        assert_eq!(block.free().unwrap(), FreeReport::default());
    }

    #[test]
    fn test_custom_free_fn_runs_per_element() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let alloc = Allocator::new();
        let mut block = alloc
            .alloc_with_free_fn(
                4,
                3,
                Arc::new(move |elem: &mut [u8]| {
                    assert_eq!(elem.len(), 4);
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        block.as_bytes_mut().unwrap()[0] = 1;
        let report = block.free().unwrap();
        assert_eq!(report.elements_finalized, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_typecode_block_releases_references_on_drop() {
        let alloc = Allocator::new();
        let tc = TypeCode::structure(
            "IDL:test/Holder:1.0",
            "Holder",
            [("target", TypeCode::objref("IDL:test/Obj:1.0", "Obj"))],
        );
        let handle: Arc<dyn ObjectHandle> = Arc::new(IorHandle(Ior::nil()));
        let block = alloc
            .alloc_value(&tc, Value::Struct(vec![Value::Objref(Some(handle.clone()))]))
            .unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
        drop(block);
        assert_eq!(Arc::strong_count(&handle), 1);
        assert_eq!(alloc.stats().live_blocks, 0);
    }

    #[test]
    fn test_into_value_transfers_ownership() {
        let alloc = Allocator::new();
        let block = alloc.alloc_value(&TypeCode::long(), Value::Long(5)).unwrap();
        assert_eq!(block.into_value(), Some(Value::Long(5)));
        assert_eq!(alloc.stats().live_blocks, 0);
        assert_eq!(alloc.stats().total_frees, 1);
    }
}
