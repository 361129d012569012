//! Activation state of one object
//!
//! ```text
//!  Inactive --activate--> Active --deactivate--> Deactivating (calls running)
//!                           |                         | last call ends
//!                           | deactivate, no calls    v
//!                           +-------------------> Deactivated
//!                                                     | reap
//!                                                     v
//!                                  Destroying --> Destroyed
//! ```
//!
//! Only an Active object accepts calls. Deactivation while calls are in
//! flight is deferred until the use count drops to zero; the adapter then
//! reaps the object exactly once.

use crate::poa::servant::ServantRef;
use crate::poa::{ObjectId, Poa};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Inactive,
    Active,
    Deactivating,
    Deactivated,
    Destroying,
    Destroyed,
}

/// Result of asking an object to deactivate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deactivation {
    /// No call in flight; the caller reaps now
    Ready,
    /// The last running call will trigger the reap
    Deferred,
    /// Deactivation was already requested earlier
    AlreadyRequested,
}

struct ObjectState {
    life: LifeState,
    servant: Option<ServantRef>,
    use_count: usize,
    etherealize: bool,
}

/// An object id bound to a servant inside one adapter
pub(crate) struct PoaObject {
    oid: ObjectId,
    poa: Weak<Poa>,
    state: Mutex<ObjectState>,
    destroyed: Notify,
}

impl PoaObject {
    pub(crate) fn new(oid: ObjectId, poa: Weak<Poa>) -> Arc<Self> {
        Arc::new(Self {
            oid,
            poa,
            state: Mutex::new(ObjectState {
                life: LifeState::Inactive,
                servant: None,
                use_count: 0,
                etherealize: true,
            }),
            destroyed: Notify::new(),
        })
    }

    pub(crate) fn oid(&self) -> &ObjectId {
        &self.oid
    }

    pub(crate) fn life(&self) -> LifeState {
        self.state.lock().life
    }

    pub(crate) fn use_count(&self) -> usize {
        self.state.lock().use_count
    }

    pub(crate) fn activate(&self, servant: ServantRef) -> bool {
        let mut state = self.state.lock();
        if state.life != LifeState::Inactive {
            return false;
        }
        state.life = LifeState::Active;
        state.servant = Some(servant);
        true
    }

    /// Servant of an active object
    pub(crate) fn servant(&self) -> Option<ServantRef> {
        let state = self.state.lock();
        match state.life {
            LifeState::Active | LifeState::Deactivating => state.servant.clone(),
            _ => None,
        }
    }

    /// Start a call; fails unless the object is Active
    pub(crate) fn begin_call(self: &Arc<Self>) -> Option<(ServantRef, UseGuard)> {
        let mut state = self.state.lock();
        if state.life != LifeState::Active {
            return None;
        }
        let servant = state.servant.clone()?;
        state.use_count += 1;
        Some((
            servant,
            UseGuard {
                object: self.clone(),
            },
        ))
    }

    pub(crate) fn deactivate(&self, etherealize: bool) -> Deactivation {
        let mut state = self.state.lock();
        match state.life {
            LifeState::Active => {
                state.etherealize = etherealize;
                if state.use_count == 0 {
                    state.life = LifeState::Deactivated;
                    Deactivation::Ready
                } else {
                    state.life = LifeState::Deactivating;
                    Deactivation::Deferred
                }
            }
            LifeState::Inactive => {
                state.life = LifeState::Deactivated;
                Deactivation::Ready
            }
            _ => Deactivation::AlreadyRequested,
        }
    }

    /// Returns true when this call completed a deferred deactivation
    fn end_call(&self) -> bool {
        let mut state = self.state.lock();
        state.use_count = state.use_count.saturating_sub(1);
        if state.use_count == 0 && state.life == LifeState::Deactivating {
            state.life = LifeState::Deactivated;
            return true;
        }
        false
    }

    /// Take the servant for teardown; only one caller ever gets it
    pub(crate) fn begin_destroy(&self) -> Option<(ServantRef, bool)> {
        let mut state = self.state.lock();
        if state.life != LifeState::Deactivated {
            return None;
        }
        state.life = LifeState::Destroying;
        let etherealize = state.etherealize;
        state.servant.take().map(|s| (s, etherealize))
    }

    pub(crate) fn finish_destroy(&self) {
        self.state.lock().life = LifeState::Destroyed;
        self.destroyed.notify_waiters();
    }

    /// Wait until the object has been torn down
    pub(crate) async fn wait_destroyed(&self) {
        loop {
            let notified = self.destroyed.notified();
            if self.life() == LifeState::Destroyed {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for PoaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PoaObject")
            .field("oid", &self.oid)
            .field("life", &state.life)
            .field("use_count", &state.use_count)
            .finish()
    }
}

/// Keeps an object's use count raised for the length of one call
pub(crate) struct UseGuard {
    object: Arc<PoaObject>,
}

impl Drop for UseGuard {
    fn drop(&mut self) {
        if self.object.end_call() {
            if let Some(poa) = self.object.poa.upgrade() {
                poa.reap(&self.object);
            }
        }
    }
}
