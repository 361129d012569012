//! Per-invocation context visible to servant code

use crate::error::{OrbError, Result};
use crate::poa::servant::ServantRef;
use crate::poa::{ObjectId, Poa};
use std::future::Future;
use std::sync::Arc;

/// What is being invoked on the current task
#[derive(Clone)]
pub(crate) struct InvocationContext {
    pub poa: Arc<Poa>,
    pub oid: ObjectId,
    pub servant: ServantRef,
    pub operation: String,
}

tokio::task_local! {
    static INVOCATION: InvocationContext;
}

/// Run `fut` with `ctx` as the current invocation
pub(crate) async fn scope<F: Future>(ctx: InvocationContext, fut: F) -> F::Output {
    INVOCATION.scope(ctx, fut).await
}

pub(crate) fn current() -> Option<InvocationContext> {
    INVOCATION.try_with(|ctx| ctx.clone()).ok()
}

/// Whether the current task is running a call on `poa`
pub(crate) fn inside(poa: &Poa) -> bool {
    INVOCATION
        .try_with(|ctx| std::ptr::eq(Arc::as_ptr(&ctx.poa), poa))
        .unwrap_or(false)
}

/// The `POACurrent` pseudo-object.
///
/// Inside a servant method it reports the adapter, object id and servant
/// of the call being executed. The context does not follow work spawned
/// onto other tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoaCurrent;

impl PoaCurrent {
    pub fn get_poa(&self) -> Result<Arc<Poa>> {
        current().map(|ctx| ctx.poa).ok_or(OrbError::NoContext)
    }

    pub fn get_object_id(&self) -> Result<ObjectId> {
        current().map(|ctx| ctx.oid).ok_or(OrbError::NoContext)
    }

    pub fn get_servant(&self) -> Result<ServantRef> {
        current().map(|ctx| ctx.servant).ok_or(OrbError::NoContext)
    }

    pub fn get_operation(&self) -> Result<String> {
        current().map(|ctx| ctx.operation).ok_or(OrbError::NoContext)
    }
}
