//! Object references
//!
//! An [`ObjectRef`] names an invocable object: a servant in this process,
//! an object behind a remote IIOP endpoint, or one of the ORB's
//! pseudo-objects. References are counted: `clone` (or
//! [`duplicate`](ObjectRef::duplicate)) adds a holder, dropping (or
//! [`release`](ObjectRef::release)) removes one, and the last release
//! disposes the reference. Disposal runs the registered hooks and closes
//! pooled connections no other reference uses.
//!
//! Calls never return a Rust error. Failures land in the caller's
//! [`Environment`].

use crate::dispatch::{invoke_local, is_a_operation, non_existent_operation};
use crate::error::{OrbError, Result};
use crate::exception::{Environment, Exception, UserException};
use crate::operation::OperationDesc;
use crate::orb::OrbInner;
use crate::poa::{MethodReply, Poa, PoaCurrent, OBJECT_REPO_ID};
use crate::policy::{InvocationPolicy, Policy};
use corba_cdr::{
    decode_value, encode_value, IiopProfile, Ior, ObjectHandle, ObjectResolver, Value,
};
use giop::{
    CompletionStatus, ConnectionLease, Endpoint, Message, MessageWriter, MsgType, ReplyHeader,
    ReplyStatus, RequestHeader, SystemException, SystemExceptionKind, Version,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, trace, warn};

/// LOCATION_FORWARD replies followed before giving up
pub const MAX_FORWARD_HOPS: usize = 5;

fn system(kind: SystemExceptionKind, completed: CompletionStatus) -> Exception {
    Exception::System(SystemException::new(kind, completed))
}

/// Successful outcome of an invocation: the return value, then the
/// `inout` and `out` parameters in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeReply {
    pub result: Value,
    pub out_args: Vec<Value>,
}

impl From<MethodReply> for InvokeReply {
    fn from(reply: MethodReply) -> Self {
        Self {
            result: reply.result,
            out_args: reply.out_args,
        }
    }
}

pub(crate) enum Pseudo {
    Poa(Arc<Poa>),
    Current,
}

type DisposeHook = Box<dyn FnOnce() + Send>;

pub(crate) struct RefInner {
    orb: Weak<OrbInner>,
    ior: RwLock<Ior>,
    /// Key of an object served by this ORB
    local_key: Option<Vec<u8>>,
    pseudo: Option<Pseudo>,
    policy: RwLock<InvocationPolicy>,
    count: AtomicUsize,
    disposed: AtomicBool,
    hooks: Mutex<Vec<DisposeHook>>,
    lease: Mutex<Option<ConnectionLease>>,
}

impl RefInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
        let had_connection = self.lease.lock().take().is_some();
        if had_connection {
            if let Some(orb) = self.orb.upgrade() {
                let closed = orb.pool.close_idle();
                trace!(closed, "closed idle connections after release");
            }
        }
        debug!(type_id = %self.ior.read().type_id, "object reference disposed");
    }
}

/// A counted handle to an object; `None` inside is the nil reference
pub struct ObjectRef {
    inner: Option<Arc<RefInner>>,
}

impl ObjectRef {
    /// The nil reference
    pub fn nil() -> Self {
        Self { inner: None }
    }

    fn from_inner(
        orb: Weak<OrbInner>,
        ior: Ior,
        local_key: Option<Vec<u8>>,
        pseudo: Option<Pseudo>,
    ) -> Self {
        Self {
            inner: Some(Arc::new(RefInner {
                orb,
                ior: RwLock::new(ior),
                local_key,
                pseudo,
                policy: RwLock::new(InvocationPolicy::default()),
                count: AtomicUsize::new(1),
                disposed: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
                lease: Mutex::new(None),
            })),
        }
    }

    pub(crate) fn local(orb: Weak<OrbInner>, ior: Ior, key: Vec<u8>) -> Self {
        Self::from_inner(orb, ior, Some(key), None)
    }

    pub(crate) fn remote(orb: Weak<OrbInner>, ior: Ior) -> Self {
        if ior.is_nil() {
            return Self::nil();
        }
        Self::from_inner(orb, ior, None, None)
    }

    pub(crate) fn pseudo(orb: Weak<OrbInner>, type_id: &str, pseudo: Pseudo) -> Self {
        let ior = Ior {
            type_id: type_id.to_string(),
            profiles: Vec::new(),
        };
        Self::from_inner(orb, ior, None, Some(pseudo))
    }

    pub fn is_nil(&self) -> bool {
        self.inner.is_none()
    }

    /// Another holder of the same reference
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Give up this holder; the last release disposes the reference
    pub fn release(self) {
        drop(self)
    }

    /// Number of live holders; zero for nil
    pub fn ref_count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|i| i.count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Run `hook` when the last holder releases this reference
    pub fn on_dispose(&self, hook: impl FnOnce() + Send + 'static) {
        if let Some(inner) = &self.inner {
            inner.hooks.lock().push(Box::new(hook));
        }
    }

    /// Whether calls are dispatched in this process without marshaling
    pub fn is_local(&self) -> bool {
        self.inner
            .as_ref()
            .map(|i| i.pseudo.is_some() || (i.local_key.is_some() && i.orb.strong_count() > 0))
            .unwrap_or(false)
    }

    /// Most derived repository id known for the target
    pub fn type_id(&self) -> String {
        self.inner
            .as_ref()
            .map(|i| i.ior.read().type_id.clone())
            .unwrap_or_default()
    }

    pub fn object_key(&self) -> Option<Vec<u8>> {
        let inner = self.inner.as_ref()?;
        inner
            .local_key
            .clone()
            .or_else(|| inner.ior.read().object_key())
    }

    /// The interoperable form of this reference.
    ///
    /// References created before the ORB started listening carry no
    /// profile; they gain one here once an endpoint exists.
    pub fn ior(&self) -> Ior {
        let Some(inner) = &self.inner else {
            return Ior::nil();
        };
        if let (Some(key), Some(orb)) = (&inner.local_key, inner.orb.upgrade()) {
            let missing = inner.ior.read().profiles.is_empty();
            if missing {
                let type_id = inner.ior.read().type_id.clone();
                if let Some(ior) = orb.published_ior(&type_id, key) {
                    *inner.ior.write() = ior;
                }
            }
        }
        let ior = inner.ior.read().clone();
        ior
    }

    pub fn set_policy(&self, policy: Policy) -> Result<()> {
        let Policy::Invocation(policy) = policy else {
            return Err(OrbError::InvalidPolicy(
                "only invocation policies apply to object references".into(),
            ));
        };
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| OrbError::BadArgument("nil reference".into()))?;
        *inner.policy.write() = policy;
        Ok(())
    }

    pub fn policy(&self) -> InvocationPolicy {
        self.inner
            .as_ref()
            .map(|i| i.policy.read().clone())
            .unwrap_or_default()
    }

    /// The adapter behind a `RootPOA` style reference
    pub fn as_poa(&self) -> Option<Arc<Poa>> {
        match self.inner.as_ref()?.pseudo.as_ref()? {
            Pseudo::Poa(poa) => Some(poa.clone()),
            Pseudo::Current => None,
        }
    }

    pub fn as_current(&self) -> Option<PoaCurrent> {
        match self.inner.as_ref()?.pseudo.as_ref()? {
            Pseudo::Current => Some(PoaCurrent),
            Pseudo::Poa(_) => None,
        }
    }

    /// Whether two references name the same object
    pub fn is_equivalent(&self, other: &ObjectRef) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => true,
            (Some(_), Some(_)) => {
                self.object_key().is_some()
                    && self.object_key() == other.object_key()
                    && self.ior().iiop().map(|p| (p.host, p.port))
                        == other.ior().iiop().map(|p| (p.host, p.port))
            }
            _ => false,
        }
    }

    /// Wrap as an `objref` value; the value holds its own duplicate
    pub fn to_value(&self) -> Value {
        match &self.inner {
            None => Value::Objref(None),
            Some(_) => Value::Objref(Some(Arc::new(RefHandle(self.clone())))),
        }
    }

    /// Reference held by an `objref` value. Handles that did not come from
    /// an ORB yield a reference that has none attached.
    pub fn from_value(value: &Value) -> Option<ObjectRef> {
        match value {
            Value::Objref(None) => Some(ObjectRef::nil()),
            Value::Objref(Some(handle)) => {
                let ior = handle.ior();
                match handle.clone().into_any().downcast::<RefHandle>() {
                    Ok(handle) => Some(handle.0.clone()),
                    Err(_) => Some(ObjectRef::remote(Weak::new(), ior)),
                }
            }
            _ => None,
        }
    }

    // ---- invocation ----

    /// Invoke `op` with its `in` and `inout` arguments in declaration order.
    ///
    /// Returns `None` and records the exception in `env` on failure. An
    /// environment still holding an earlier exception is refused.
    pub async fn invoke(
        &self,
        op: &OperationDesc,
        args: &[Value],
        env: &mut Environment,
    ) -> Option<InvokeReply> {
        self.invoke_with(op, args, !op.is_oneway(), env).await
    }

    /// Send a request without waiting for, or asking for, a reply
    pub async fn send_oneway(&self, op: &OperationDesc, args: &[Value], env: &mut Environment) {
        self.invoke_with(op, args, false, env).await;
    }

    /// [`invoke`](Self::invoke) for threads outside the async runtime, or
    /// worker threads of a multi-threaded runtime
    pub fn invoke_blocking(
        &self,
        op: &OperationDesc,
        args: &[Value],
        env: &mut Environment,
    ) -> Option<InvokeReply> {
        let Some(orb) = self.inner.as_ref().and_then(|i| i.orb.upgrade()) else {
            return self.fail_early(env);
        };
        let handle = orb.runtime_handle();
        drop(orb);
        let fut = self.invoke(op, args, env);
        match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                warn!("invoke_blocking called on a current-thread runtime");
                drop(fut);
                env.set(SystemException::new(
                    SystemExceptionKind::BadInvOrder,
                    CompletionStatus::No,
                ));
                None
            }
            Ok(_) => tokio::task::block_in_place(|| handle.block_on(fut)),
            Err(_) => handle.block_on(fut),
        }
    }

    fn fail_early(&self, env: &mut Environment) -> Option<InvokeReply> {
        if env.is_exception() {
            return None;
        }
        let kind = if self.is_nil() {
            SystemExceptionKind::InvObjref
        } else {
            SystemExceptionKind::BadInvOrder
        };
        env.set(SystemException::new(kind, CompletionStatus::No));
        None
    }

    async fn invoke_with(
        &self,
        op: &OperationDesc,
        args: &[Value],
        response_expected: bool,
        env: &mut Environment,
    ) -> Option<InvokeReply> {
        if env.is_exception() {
            warn!(
                operation = op.name(),
                "environment still holds {:?}; clear it before reuse",
                env.exception_id()
            );
            return None;
        }
        match self.call(op, args, response_expected).await {
            Ok(reply) => Some(reply),
            Err(ex) => {
                debug!(operation = op.name(), "invocation failed: {}", ex);
                env.set(ex);
                None
            }
        }
    }

    async fn call(
        &self,
        op: &OperationDesc,
        args: &[Value],
        response_expected: bool,
    ) -> std::result::Result<InvokeReply, Exception> {
        let no = CompletionStatus::No;
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| system(SystemExceptionKind::InvObjref, no))?;
        if inner.pseudo.is_some() {
            return Err(system(SystemExceptionKind::NoImplement, no));
        }
        let orb = inner
            .orb
            .upgrade()
            .filter(|orb| !orb.is_shut_down())
            .ok_or_else(|| system(SystemExceptionKind::BadInvOrder, no))?;

        if args.len() != op.input_count() {
            return Err(system(SystemExceptionKind::BadParam, no));
        }
        for (param, value) in op.inputs().zip(args) {
            if param.tc.check_value(value).is_err() {
                debug!(operation = op.name(), param = %param.name, "argument does not match its type");
                return Err(system(SystemExceptionKind::BadParam, no));
            }
        }

        if let Some(key) = &inner.local_key {
            trace!(operation = op.name(), "collocated call");
            return invoke_local(&orb, key, op, args, response_expected).await;
        }

        let policy = inner.policy.read().clone();
        let _gate = (!policy.allow_reentrancy).then(|| orb.gate.block());
        self.call_remote(inner, &orb, op, args, response_expected, &policy)
            .await
    }

    async fn call_remote(
        &self,
        inner: &RefInner,
        orb: &Arc<OrbInner>,
        op: &OperationDesc,
        args: &[Value],
        response_expected: bool,
        policy: &InvocationPolicy,
    ) -> std::result::Result<InvokeReply, Exception> {
        let mut ior = inner.ior.read().clone();
        for _ in 0..=MAX_FORWARD_HOPS {
            let profile = ior
                .iiop()
                .ok_or_else(|| system(SystemExceptionKind::InvObjref, CompletionStatus::No))?;
            let endpoint = Endpoint::from_profile(&profile);
            let lease = orb.pool.get(&endpoint).await?;
            *inner.lease.lock() = Some(lease.clone());

            let version = request_version(orb.config.giop_version, &profile);
            let request_id = lease.next_request_id();
            let message = encode_request(
                version,
                request_id,
                profile.object_key.clone(),
                op,
                args,
                response_expected,
            )
            .map_err(|e| {
                debug!(operation = op.name(), "cannot marshal request: {}", e);
                system(SystemExceptionKind::Marshal, CompletionStatus::No)
            })?;

            let timeout = policy.timeout.or(orb.config.request_timeout);
            trace!(request_id, operation = op.name(), %endpoint, "sending request");
            let Some(pending) = lease
                .send(request_id, message, response_expected, timeout)
                .await?
            else {
                return Ok(InvokeReply::default());
            };
            let reply = pending.wait().await?;

            match decode_reply(orb, op, &reply)? {
                ReplyOutcome::Done(reply) => return Ok(reply),
                ReplyOutcome::Forward(target) => {
                    debug!(operation = op.name(), "request forwarded to {}", target.type_id);
                    *inner.ior.write() = target.clone();
                    ior = target;
                }
            }
        }
        warn!(operation = op.name(), "more than {} forwards", MAX_FORWARD_HOPS);
        Err(system(SystemExceptionKind::Transient, CompletionStatus::No))
    }

    // ---- built-in operations ----

    /// Whether the target implements `repo_id`
    pub async fn is_a(&self, repo_id: &str) -> std::result::Result<bool, Exception> {
        let Some(inner) = &self.inner else {
            return Ok(false);
        };
        if repo_id == OBJECT_REPO_ID || inner.ior.read().type_id == repo_id {
            return Ok(true);
        }
        if inner.pseudo.is_some() {
            return Ok(false);
        }
        let mut env = Environment::new();
        let reply = self
            .invoke(&is_a_operation(), &[Value::String(repo_id.to_string())], &mut env)
            .await;
        match (reply, env.take()) {
            (_, Some(ex)) => Err(ex),
            (Some(reply), None) => Ok(reply.result.as_bool().unwrap_or(false)),
            (None, None) => Ok(false),
        }
    }

    /// Whether the target is known not to exist any more
    pub async fn non_existent(&self) -> std::result::Result<bool, Exception> {
        let Some(inner) = &self.inner else {
            return Ok(true);
        };
        if inner.pseudo.is_some() {
            return Ok(false);
        }
        let mut env = Environment::new();
        let reply = self.invoke(&non_existent_operation(), &[], &mut env).await;
        match (reply, env.take()) {
            (_, Some(Exception::System(ex))) if ex.kind == SystemExceptionKind::ObjectNotExist => {
                Ok(true)
            }
            (_, Some(ex)) => Err(ex),
            (Some(reply), None) => Ok(reply.result.as_bool().unwrap_or(false)),
            (None, None) => Ok(false),
        }
    }
}

fn request_version(preferred: Version, profile: &IiopProfile) -> Version {
    let offered = Version::new(profile.major, profile.minor).unwrap_or(Version::V1_0);
    preferred.min(offered)
}

fn encode_request(
    version: Version,
    request_id: u32,
    key: Vec<u8>,
    op: &OperationDesc,
    args: &[Value],
    response_expected: bool,
) -> giop::Result<Message> {
    let mut w = MessageWriter::new(version, MsgType::Request);
    let mut header = RequestHeader::new(request_id, key, op.name());
    header.response_expected = response_expected;
    header.encode(&mut w)?;
    for (param, value) in op.inputs().zip(args) {
        encode_value(&mut w, &param.tc, value)?;
    }
    w.finish()
}

enum ReplyOutcome {
    Done(InvokeReply),
    Forward(Ior),
}

fn decode_reply(
    orb: &Arc<OrbInner>,
    op: &OperationDesc,
    message: &Message,
) -> std::result::Result<ReplyOutcome, Exception> {
    let marshal = |e: &dyn fmt::Display| {
        debug!(operation = op.name(), "malformed reply: {}", e);
        system(SystemExceptionKind::Marshal, CompletionStatus::Yes)
    };
    let resolver: &dyn ObjectResolver = &**orb;
    let mut r = message.reader();
    let header = ReplyHeader::decode(&mut r, message.version()).map_err(|e| marshal(&e))?;

    match header.status {
        ReplyStatus::NoException => {
            let result = decode_value(&mut r, op.result(), Some(resolver)).map_err(|e| marshal(&e))?;
            let out_args = op
                .outputs()
                .map(|p| decode_value(&mut r, &p.tc, Some(resolver)))
                .collect::<corba_cdr::Result<Vec<_>>>()
                .map_err(|e| marshal(&e))?;
            Ok(ReplyOutcome::Done(InvokeReply { result, out_args }))
        }
        ReplyStatus::UserException => {
            let repo_id = r.read_string().map_err(|e| marshal(&e))?;
            match op.exception(&repo_id) {
                Some(tc) => {
                    let user = UserException::decode_members(tc, &mut r, Some(resolver))
                        .map_err(|e| marshal(&e))?;
                    Err(Exception::User(user))
                }
                None => {
                    warn!(operation = op.name(), exception = %repo_id, "undeclared user exception");
                    Err(system(SystemExceptionKind::Unknown, CompletionStatus::Yes))
                }
            }
        }
        ReplyStatus::SystemException => {
            let ex = SystemException::decode(&mut r).map_err(|e| marshal(&e))?;
            Err(Exception::System(ex))
        }
        ReplyStatus::LocationForward | ReplyStatus::LocationForwardPerm => {
            let ior: Ior = r.read().map_err(|e| marshal(&e))?;
            Ok(ReplyOutcome::Forward(ior))
        }
        ReplyStatus::NeedsAddressingMode => {
            warn!(operation = op.name(), "peer asked for another addressing mode");
            Err(system(SystemExceptionKind::NoImplement, CompletionStatus::No))
        }
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        if let Some(inner) = &self.inner {
            inner.count.fetch_add(1, Ordering::AcqRel);
        }
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            if inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.dispose();
            }
        }
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("ObjectRef(nil)"),
            Some(inner) => f
                .debug_struct("ObjectRef")
                .field("type_id", &inner.ior.read().type_id)
                .field("local", &self.is_local())
                .field("count", &inner.count.load(Ordering::Relaxed))
                .finish(),
        }
    }
}

/// An object reference inside a marshalable value
#[derive(Debug)]
pub(crate) struct RefHandle(pub(crate) ObjectRef);

impl ObjectHandle for RefHandle {
    fn ior(&self) -> Ior {
        self.0.ior()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}
