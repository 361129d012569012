//! Policies
//!
//! A [`Policy`] is an immutable setting fixed when the thing it governs is
//! created: an object adapter takes POA policies, an object reference takes
//! an [`InvocationPolicy`].

use crate::poa::policies::{
    IdAssignmentPolicy, IdUniquenessPolicy, ImplicitActivationPolicy, LifespanPolicy,
    RequestProcessingPolicy, ServantRetentionPolicy, ThreadPolicy,
};
use std::time::Duration;
use tokio::sync::watch;

/// Any policy object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    Thread(ThreadPolicy),
    Lifespan(LifespanPolicy),
    IdUniqueness(IdUniquenessPolicy),
    IdAssignment(IdAssignmentPolicy),
    ImplicitActivation(ImplicitActivationPolicy),
    ServantRetention(ServantRetentionPolicy),
    RequestProcessing(RequestProcessingPolicy),
    Invocation(InvocationPolicy),
}

/// How calls through one object reference behave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationPolicy {
    /// Overrides the ORB request timeout for this reference
    pub timeout: Option<Duration>,
    /// When false, incoming requests for single-threaded adapters wait
    /// while a call through this reference is outstanding
    pub allow_reentrancy: bool,
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            allow_reentrancy: true,
        }
    }
}

impl InvocationPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn non_reentrant(mut self) -> Self {
        self.allow_reentrancy = false;
        self
    }
}

/// Counts outstanding non-reentrant outgoing calls of one ORB
#[derive(Debug)]
pub(crate) struct ReentrancyGate {
    outstanding: watch::Sender<usize>,
}

impl ReentrancyGate {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: watch::channel(0).0,
        }
    }

    /// Close the gate until the returned guard is dropped
    pub(crate) fn block(&self) -> GateGuard<'_> {
        self.outstanding.send_modify(|n| *n += 1);
        GateGuard { gate: self }
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.outstanding.borrow() == 0
    }

    /// Wait until no non-reentrant call is outstanding
    pub(crate) async fn wait_open(&self) {
        let mut rx = self.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

pub(crate) struct GateGuard<'a> {
    gate: &'a ReentrancyGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate
            .outstanding
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
