//! Servant managers: application hooks that supply servants on demand

use crate::exception::Exception;
use crate::poa::servant::ServantRef;
use crate::poa::Poa;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque value a locator hands from `preinvoke` to `postinvoke`
pub type Cookie = Box<dyn Any + Send + Sync>;

/// Incarnates servants for a RETAIN adapter on first use.
///
/// The servant returned by `incarnate` is entered into the active object
/// map; `etherealize` is called once the object is deactivated and its
/// last call has finished.
#[async_trait]
pub trait ServantActivator: Send + Sync + 'static {
    async fn incarnate(&self, oid: &[u8], poa: &Arc<Poa>) -> Result<ServantRef, Exception>;

    fn etherealize(
        &self,
        oid: &[u8],
        poa: &Arc<Poa>,
        servant: ServantRef,
        cleanup_in_progress: bool,
        remaining_activations: bool,
    );
}

/// Supplies a servant for each single request of a NON_RETAIN adapter
#[async_trait]
pub trait ServantLocator: Send + Sync + 'static {
    async fn preinvoke(
        &self,
        oid: &[u8],
        poa: &Arc<Poa>,
        operation: &str,
    ) -> Result<(ServantRef, Cookie), Exception>;

    fn postinvoke(
        &self,
        oid: &[u8],
        poa: &Arc<Poa>,
        operation: &str,
        cookie: Cookie,
        servant: ServantRef,
    );
}

/// Creates child adapters on demand.
///
/// Consulted by `find_poa` with `activate_it` set, and when a request
/// names a persistent adapter that does not exist yet. Returning true
/// means the adapter named `name` now exists under `parent`.
pub trait AdapterActivator: Send + Sync + 'static {
    fn unknown_adapter(&self, parent: &Arc<Poa>, name: &str) -> bool;
}

#[derive(Clone)]
pub enum ServantManager {
    Activator(Arc<dyn ServantActivator>),
    Locator(Arc<dyn ServantLocator>),
}

impl fmt::Debug for ServantManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServantManager::Activator(_) => f.write_str("ServantManager::Activator"),
            ServantManager::Locator(_) => f.write_str("ServantManager::Locator"),
        }
    }
}
