//! Object id to servant table of a retaining adapter

use crate::poa::object::{LifeState, PoaObject};
use crate::poa::ObjectId;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    object: Arc<PoaObject>,
    servant_key: usize,
}

/// Active objects by id, with a reverse index by servant identity
#[derive(Default)]
pub(crate) struct ActiveObjectMap {
    by_id: HashMap<ObjectId, Entry>,
    by_servant: HashMap<usize, Vec<ObjectId>>,
}

impl ActiveObjectMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn contains(&self, oid: &[u8]) -> bool {
        self.by_id.contains_key(oid)
    }

    pub(crate) fn get(&self, oid: &[u8]) -> Option<Arc<PoaObject>> {
        self.by_id.get(oid).map(|e| e.object.clone())
    }

    /// Insert a new entry; false if the id is taken
    pub(crate) fn insert(&mut self, object: Arc<PoaObject>, servant_key: usize) -> bool {
        let oid = object.oid().clone();
        if self.by_id.contains_key(&oid) {
            return false;
        }
        self.by_servant
            .entry(servant_key)
            .or_default()
            .push(oid.clone());
        self.by_id.insert(oid, Entry { object, servant_key });
        true
    }

    /// Remove the entry for `object`, unless the id has been rebound
    pub(crate) fn remove(&mut self, object: &Arc<PoaObject>) -> bool {
        let oid = object.oid();
        match self.by_id.get(oid) {
            Some(entry) if Arc::ptr_eq(&entry.object, object) => {}
            _ => return false,
        }
        let Some(entry) = self.by_id.remove(oid) else {
            return false;
        };
        if let Some(ids) = self.by_servant.get_mut(&entry.servant_key) {
            ids.retain(|id| id != oid);
            if ids.is_empty() {
                self.by_servant.remove(&entry.servant_key);
            }
        }
        true
    }

    /// Ids of objects incarnated by a servant that still accept calls
    pub(crate) fn live_ids_of(&self, servant_key: usize) -> Vec<ObjectId> {
        self.by_servant
            .get(&servant_key)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.by_id
                            .get(*id)
                            .map(|e| e.object.life() == LifeState::Active)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a servant still has entries of any state
    pub(crate) fn has_servant(&self, servant_key: usize) -> bool {
        self.by_servant.contains_key(&servant_key)
    }

    pub(crate) fn objects(&self) -> Vec<Arc<PoaObject>> {
        self.by_id.values().map(|e| e.object.clone()).collect()
    }
}
