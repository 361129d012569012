//! Shared fixtures for the integration tests

#![allow(dead_code)]

use matecorba::{
    BasicServant, Endpoint, Environment, Exception, MethodReply, ObjectRef, OperationDesc, Orb,
    OrbConfig, PoaCurrent, ServantClass, ServantRef, SystemExceptionKind, TypeCode, UserException,
    Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::Level;

pub const ECHO_REPO_ID: &str = "IDL:MateCORBA/Test/Echo:1.0";
pub const REFUSED_REPO_ID: &str = "IDL:MateCORBA/Test/Echo/Refused:1.0";

static LOGGING: Once = Once::new();

/// Install a test-friendly subscriber once per test binary
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_test_writer()
            .try_init();
    });
}

/// ORB configuration with a process-unique id
pub fn config(prefix: &str) -> OrbConfig {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    OrbConfig::new().with_orb_id(format!("{}-{}", prefix, n))
}

/// An ORB listening on a loopback port with its root manager active
pub async fn start_server(config: OrbConfig) -> Orb {
    let orb = Orb::new(config).unwrap();
    orb.listen(&Endpoint::new("127.0.0.1", 0)).await.unwrap();
    orb.root_poa().the_poa_manager().activate().unwrap();
    orb
}

/// Re-read `obj` through a second ORB, as a separate client process would
pub fn remote_view(server: &Orb, client: &Orb, obj: &ObjectRef) -> ObjectRef {
    let ior = server.object_to_string(obj).unwrap();
    let remote = client.string_to_object(&ior).unwrap();
    assert!(!remote.is_local());
    remote
}

/// What a servant saw while it ran
#[derive(Debug, Default)]
pub struct Tally {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub finalized: AtomicUsize,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn refused_tc() -> TypeCode {
    TypeCode::exception(REFUSED_REPO_ID, "Refused", [("reason", TypeCode::string(0))])
}

/// `string echo(in string text)`
pub fn echo_op() -> OperationDesc {
    OperationDesc::new("echo")
        .param_in("text", TypeCode::string(0))
        .returns(TypeCode::string(0))
}

/// `unsigned long pause(in unsigned long millis)`, returns the call count
pub fn pause_op() -> OperationDesc {
    OperationDesc::new("pause")
        .param_in("millis", TypeCode::ulong())
        .returns(TypeCode::ulong())
}

/// `string whoami()`, returns the object id of the call as text
pub fn whoami_op() -> OperationDesc {
    OperationDesc::new("whoami").returns(TypeCode::string(0))
}

/// `void refuse(in string reason) raises (Refused)`
pub fn refuse_op() -> OperationDesc {
    OperationDesc::new("refuse")
        .param_in("reason", TypeCode::string(0))
        .raises(refused_tc())
}

/// `void split(in string text, out string head, inout unsigned long count)`
pub fn split_op() -> OperationDesc {
    OperationDesc::new("split")
        .param_in("text", TypeCode::string(0))
        .param_out("head", TypeCode::string(0))
        .param_inout("count", TypeCode::ulong())
}

/// `oneway void ping()`
pub fn ping_op() -> OperationDesc {
    OperationDesc::new("ping").oneway()
}

/// An operation the echo class does not have
pub fn missing_op() -> OperationDesc {
    OperationDesc::new("missing").returns(TypeCode::ulong())
}

/// Declared but without implementation
pub fn unimplemented_op() -> OperationDesc {
    OperationDesc::new("unimplemented")
}

pub fn echo_class(tally: Arc<Tally>) -> Arc<ServantClass> {
    let echo_tally = tally.clone();
    let pause_tally = tally.clone();
    let ping_tally = tally;

    ServantClass::builder(ECHO_REPO_ID)
        .method(echo_op(), move |req| {
            echo_tally.calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let text = req.arg(0).and_then(Value::as_str).unwrap_or_default();
                Ok(MethodReply::value(text))
            }
        })
        .method(pause_op(), move |req| {
            let tally = pause_tally.clone();
            async move {
                tally.enter();
                let millis = req.arg(0).and_then(Value::as_u32).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
                tally.leave();
                Ok(MethodReply::value(tally.calls() as u32))
            }
        })
        .method(whoami_op(), |_req| async move {
            let oid = PoaCurrent
                .get_object_id()
                .map_err(|e| Exception::System(e.to_system_exception()))?;
            Ok(MethodReply::value(String::from_utf8_lossy(&oid).into_owned()))
        })
        .method(refuse_op(), |req| async move {
            let reason = req.arg(0).and_then(Value::as_str).unwrap_or_default();
            let ex = UserException::new(refused_tc(), Value::Struct(vec![Value::from(reason)]))
                .map_err(|e| Exception::System(e.to_system_exception()))?;
            Err(Exception::User(ex))
        })
        .method(split_op(), |req| async move {
            let text = req.arg(0).and_then(Value::as_str).unwrap_or_default();
            let count = req.arg(1).and_then(Value::as_u32).unwrap_or(0);
            let head = text.split_whitespace().next().unwrap_or_default().to_string();
            Ok(MethodReply::void()
                .with_out(head)
                .with_out(count + text.split_whitespace().count() as u32))
        })
        .method(ping_op(), move |_req| {
            ping_tally.calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(MethodReply::void()) }
        })
        .declare(unimplemented_op())
        .build()
}

/// An echo servant whose finalizer is counted by `tally`
pub fn echo_servant(tally: &Arc<Tally>) -> ServantRef {
    let finalized = tally.clone();
    BasicServant::with_finalizer(echo_class(tally.clone()), move || {
        finalized.finalized.fetch_add(1, Ordering::SeqCst);
    })
}

/// Call `echo` and return its result
pub async fn echo(obj: &ObjectRef, text: &str) -> Result<String, Exception> {
    let mut env = Environment::new();
    match obj.invoke(&echo_op(), &[Value::from(text)], &mut env).await {
        Some(reply) => Ok(reply.result.as_str().unwrap_or_default().to_string()),
        None => Err(env.take().unwrap()),
    }
}

/// Call `whoami` and return the object id it saw
pub async fn whoami(obj: &ObjectRef) -> Result<String, Exception> {
    let mut env = Environment::new();
    match obj.invoke(&whoami_op(), &[], &mut env).await {
        Some(reply) => Ok(reply.result.as_str().unwrap_or_default().to_string()),
        None => Err(env.take().unwrap()),
    }
}

/// Call `pause` and return the servant's call count
pub async fn pause(obj: &ObjectRef, millis: u32) -> Result<u32, Exception> {
    let mut env = Environment::new();
    match obj.invoke(&pause_op(), &[Value::from(millis)], &mut env).await {
        Some(reply) => Ok(reply.result.as_u32().unwrap_or_default()),
        None => Err(env.take().unwrap()),
    }
}

/// The system exception kind of a failed call
pub fn system_kind(result: Result<impl std::fmt::Debug, Exception>) -> SystemExceptionKind {
    match result {
        Err(Exception::System(ex)) => ex.kind,
        other => panic!("expected a system exception, got {:?}", other),
    }
}

/// Poll `condition` until it holds or `limit` passes
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
