//! POA manager: the request gate shared by a group of adapters
//!
//! ```text
//!            activate              deactivate
//!  HOLDING <----------> ACTIVE -----------------> INACTIVE (final)
//!     ^  hold_requests     |  ^
//!     |                    v  | activate
//!     +---------------- DISCARDING
//! ```
//!
//! HOLDING parks incoming requests until the state changes, DISCARDING
//! rejects them with TRANSIENT and INACTIVE with OBJ_ADAPTER.

use crate::error::{OrbError, Result};
use crate::poa::current;
use crate::poa::Poa;
use giop::{CompletionStatus, SystemException, SystemExceptionKind};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Holding,
    Active,
    Discarding,
    Inactive,
}

pub struct PoaManager {
    state: watch::Sender<ManagerState>,
    adapters: Mutex<Vec<Weak<Poa>>>,
}

impl std::fmt::Debug for PoaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoaManager")
            .field("state", &self.state())
            .finish()
    }
}

impl PoaManager {
    /// A new manager in the HOLDING state
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: watch::channel(ManagerState::Holding).0,
            adapters: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    pub fn activate(&self) -> Result<()> {
        self.transition(ManagerState::Active)
    }

    /// Park new requests. With `wait_for_completion`, also wait for the
    /// calls already running in the managed adapters.
    pub async fn hold_requests(&self, wait_for_completion: bool) -> Result<()> {
        self.transition(ManagerState::Holding)?;
        if wait_for_completion {
            self.wait_idle().await?;
        }
        Ok(())
    }

    /// Reject new requests with TRANSIENT
    pub async fn discard_requests(&self, wait_for_completion: bool) -> Result<()> {
        self.transition(ManagerState::Discarding)?;
        if wait_for_completion {
            self.wait_idle().await?;
        }
        Ok(())
    }

    /// Permanently stop the managed adapters. With `etherealize`, every
    /// active object is deactivated and its servant etherealized.
    pub async fn deactivate(&self, etherealize: bool, wait_for_completion: bool) -> Result<()> {
        if wait_for_completion {
            self.check_not_inside()?;
        }
        if self.state() != ManagerState::Inactive {
            self.state.send_replace(ManagerState::Inactive);
            debug!("POA manager deactivated");
        }
        let adapters = self.adapters();
        if etherealize {
            for poa in &adapters {
                poa.deactivate_all(true);
            }
        }
        if wait_for_completion {
            for poa in &adapters {
                poa.wait_idle().await;
            }
        }
        Ok(())
    }

    fn transition(&self, to: ManagerState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == ManagerState::Inactive {
                result = Err(OrbError::AdapterInactive);
                return false;
            }
            if *state == to {
                return false;
            }
            debug!(from = ?*state, to = ?to, "POA manager state change");
            *state = to;
            true
        });
        result
    }

    fn check_not_inside(&self) -> Result<()> {
        if self.adapters().iter().any(|poa| current::inside(poa)) {
            return Err(OrbError::System(SystemException::new(
                SystemExceptionKind::BadInvOrder,
                CompletionStatus::No,
            )));
        }
        Ok(())
    }

    async fn wait_idle(&self) -> Result<()> {
        self.check_not_inside()?;
        for poa in self.adapters() {
            poa.wait_idle().await;
        }
        Ok(())
    }

    pub(crate) fn register(&self, poa: &Arc<Poa>) {
        let mut adapters = self.adapters.lock();
        adapters.retain(|w| w.strong_count() > 0);
        adapters.push(Arc::downgrade(poa));
    }

    pub(crate) fn unregister(&self, poa: &Poa) {
        self.adapters
            .lock()
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), poa));
    }

    fn adapters(&self) -> Vec<Arc<Poa>> {
        self.adapters.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Let a request through, parking it while the manager holds
    pub(crate) async fn admit(&self) -> std::result::Result<(), SystemException> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| *s != ManagerState::Holding).await {
            Ok(state) => *state,
            Err(_) => ManagerState::Inactive,
        };
        match state {
            ManagerState::Active | ManagerState::Holding => Ok(()),
            ManagerState::Discarding => Err(SystemException::new(
                SystemExceptionKind::Transient,
                CompletionStatus::No,
            )),
            ManagerState::Inactive => Err(SystemException::new(
                SystemExceptionKind::ObjAdapter,
                CompletionStatus::No,
            )),
        }
    }
}
