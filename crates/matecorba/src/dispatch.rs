//! Request dispatch
//!
//! Remote requests arrive through [`OrbRequestHandler`] with their
//! arguments still marshaled; collocated calls arrive from
//! [`ObjectRef::invoke`](crate::ObjectRef::invoke) with argument values.
//! Both go through the same [`dispatch`] path so adapter states, servant
//! lookup failures and exception screening behave identically.
//!
//! ```text
//! object key -> adapter -> manager gate -> servant -> method table
//!            -> arguments (allocator blocks) -> method -> reply
//! ```

use crate::exception::Exception;
use crate::objref::InvokeReply;
use crate::operation::OperationDesc;
use crate::orb::OrbInner;
use crate::poa::{scope, MethodReply, ObjectKey, ServerRequest};
use async_trait::async_trait;
use corba_cdr::{decode_value, encode_value, Block, CdrReader, ObjectResolver, TypeCode, Value};
use giop::{
    cdr_error_exception, system_exception_reply, CompletionStatus, IncomingRequest,
    LocateReplyHeader, LocateRequestHeader, LocateStatus, Message, MessageWriter, MsgType,
    ReplyHeader, ReplyStatus, RequestHandler, SystemException, SystemExceptionKind, Version,
};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

pub(crate) const IS_A: &str = "_is_a";
pub(crate) const NON_EXISTENT: &str = "_non_existent";

fn system(kind: SystemExceptionKind, completed: CompletionStatus) -> Exception {
    Exception::System(SystemException::new(kind, completed))
}

/// `boolean _is_a(in string logical_type_id)`
pub(crate) fn is_a_operation() -> OperationDesc {
    OperationDesc::new(IS_A)
        .param_in("logical_type_id", TypeCode::string(0))
        .returns(TypeCode::boolean())
}

/// `boolean _non_existent()`
pub(crate) fn non_existent_operation() -> OperationDesc {
    OperationDesc::new(NON_EXISTENT).returns(TypeCode::boolean())
}

/// Where the arguments of a request come from
pub(crate) enum Arguments<'a> {
    /// Marshaled request body
    Wire(CdrReader<'a>),
    /// Caller's values; copied before the servant sees them
    Local(&'a [Value]),
}

/// A request the servant has answered.
///
/// Argument blocks stay allocated until this is dropped, after the reply
/// has been marshaled.
pub(crate) struct Completed {
    pub desc: Arc<OperationDesc>,
    pub reply: MethodReply,
    request: Option<Arc<ServerRequest>>,
}

impl Drop for Completed {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            release_args(request);
        }
    }
}

fn release_args(request: Arc<ServerRequest>) {
    match Arc::try_unwrap(request) {
        Ok(request) => {
            for block in request.into_blocks() {
                if let Err(e) = block.free() {
                    warn!("freeing argument failed: {}", e);
                }
            }
        }
        // the servant kept the request; its blocks go when the servant lets go
        Err(request) => trace!(operation = request.operation(), "request retained by servant"),
    }
}

fn free_blocks(blocks: Vec<Block>) {
    for block in blocks {
        if let Err(e) = block.free() {
            warn!("freeing argument failed: {}", e);
        }
    }
}

/// Run one request through the adapter tree
pub(crate) async fn dispatch(
    orb: &Arc<OrbInner>,
    key: &[u8],
    operation: &str,
    args: Arguments<'_>,
) -> Result<Completed, Exception> {
    match dispatch_inner(orb, key, operation, args).await {
        Err(Exception::System(ex))
            if operation == NON_EXISTENT && ex.kind == SystemExceptionKind::ObjectNotExist =>
        {
            Ok(Completed {
                desc: Arc::new(non_existent_operation()),
                reply: MethodReply::value(true),
                request: None,
            })
        }
        other => other,
    }
}

async fn dispatch_inner(
    orb: &Arc<OrbInner>,
    key: &[u8],
    operation: &str,
    args: Arguments<'_>,
) -> Result<Completed, Exception> {
    let no = CompletionStatus::No;
    let key = ObjectKey::decode(key).ok_or_else(|| {
        debug!(operation, "object key not issued by this ORB");
        system(SystemExceptionKind::ObjectNotExist, no)
    })?;
    let poa = orb.find_adapter(&key.adapter).ok_or_else(|| {
        debug!(operation, adapter = ?key.adapter, "no such adapter");
        system(SystemExceptionKind::ObjectNotExist, no)
    })?;

    let invocation = poa.prepare(&key.oid, operation).await?;
    let class = invocation.servant.class();

    let (desc, implementation) = match operation {
        IS_A => (Arc::new(is_a_operation()), None),
        NON_EXISTENT => (Arc::new(non_existent_operation()), None),
        _ => {
            let entry = class.method(operation).ok_or_else(|| {
                debug!(operation, class = class.repo_id(), "unknown operation");
                system(SystemExceptionKind::BadOperation, no)
            })?;
            let implementation = entry.implementation().cloned().ok_or_else(|| {
                debug!(operation, class = class.repo_id(), "operation not implemented");
                system(SystemExceptionKind::NoImplement, no)
            })?;
            (entry.desc().clone(), Some(implementation))
        }
    };

    let blocks = unmarshal_args(orb, &desc, args)?;

    let Some(implementation) = implementation else {
        let reply = if operation == IS_A {
            let repo_id = blocks
                .first()
                .and_then(Block::value)
                .and_then(Value::as_str)
                .unwrap_or_default();
            MethodReply::value(class.is_a(repo_id))
        } else {
            MethodReply::value(false)
        };
        free_blocks(blocks);
        return Ok(Completed {
            desc,
            reply,
            request: None,
        });
    };

    trace!(operation, oid = ?key.oid, "invoking servant");
    let request = Arc::new(ServerRequest::new(operation, key.oid.clone(), blocks));
    let result = scope(invocation.context(), implementation(request.clone())).await;
    drop(invocation);

    let reply = match result {
        Ok(reply) => reply,
        Err(Exception::User(user)) if desc.exception(user.repo_id()).is_none() => {
            warn!(operation, exception = user.repo_id(), "servant raised an undeclared exception");
            release_args(request);
            return Err(system(SystemExceptionKind::Unknown, CompletionStatus::Yes));
        }
        Err(ex) => {
            release_args(request);
            return Err(ex);
        }
    };

    if let Err(reason) = check_reply(&desc, &reply) {
        error!(operation, "servant returned a malformed reply: {}", reason);
        release_args(request);
        return Err(system(SystemExceptionKind::Marshal, CompletionStatus::Yes));
    }

    Ok(Completed {
        desc,
        reply,
        request: Some(request),
    })
}

fn unmarshal_args(
    orb: &Arc<OrbInner>,
    desc: &OperationDesc,
    args: Arguments<'_>,
) -> Result<Vec<Block>, Exception> {
    let no = CompletionStatus::No;
    match args {
        Arguments::Wire(mut r) => {
            let resolver: &dyn ObjectResolver = &**orb;
            desc.inputs()
                .map(|p| {
                    let value = decode_value(&mut r, &p.tc, Some(resolver))?;
                    orb.allocator.alloc_value(&p.tc, value)
                })
                .collect::<corba_cdr::Result<Vec<_>>>()
                .map_err(|e| {
                    debug!(operation = desc.name(), "bad request arguments: {}", e);
                    Exception::System(cdr_error_exception(&e, no))
                })
        }
        Arguments::Local(values) => {
            if values.len() != desc.input_count() {
                return Err(system(SystemExceptionKind::BadParam, no));
            }
            desc.inputs()
                .zip(values)
                .map(|(p, v)| orb.allocator.alloc_value(&p.tc, p.tc.copy_value(v)?))
                .collect::<corba_cdr::Result<Vec<_>>>()
                .map_err(|e| {
                    debug!(operation = desc.name(), "bad local arguments: {}", e);
                    system(SystemExceptionKind::BadParam, no)
                })
        }
    }
}

fn check_reply(desc: &OperationDesc, reply: &MethodReply) -> corba_cdr::Result<()> {
    desc.result().check_value(&reply.result)?;
    let outputs: Vec<_> = desc.outputs().collect();
    if outputs.len() != reply.out_args.len() {
        return Err(corba_cdr::CdrError::Internal(format!(
            "{} output values for {} out parameters",
            reply.out_args.len(),
            outputs.len()
        )));
    }
    for (param, value) in outputs.iter().zip(&reply.out_args) {
        param.tc.check_value(value)?;
    }
    Ok(())
}

/// Collocated call: same dispatch path, no marshaling
pub(crate) async fn invoke_local(
    orb: &Arc<OrbInner>,
    key: &[u8],
    op: &OperationDesc,
    args: &[Value],
    response_expected: bool,
) -> Result<InvokeReply, Exception> {
    if !response_expected {
        let orb = orb.clone();
        let key = key.to_vec();
        let operation = op.name().to_string();
        let args = args.to_vec();
        tokio::spawn(async move {
            if let Err(e) = dispatch(&orb, &key, &operation, Arguments::Local(&args)).await {
                debug!(operation = %operation, "oneway call failed: {}", e);
            }
        });
        return Ok(InvokeReply::default());
    }

    let mut completed = dispatch(orb, key, op.name(), Arguments::Local(args)).await?;
    Ok(std::mem::take(&mut completed.reply).into())
}

fn encode_reply(
    version: Version,
    request_id: u32,
    outcome: &Result<Completed, Exception>,
) -> giop::Result<Message> {
    let mut w = MessageWriter::new(version, MsgType::Reply);
    match outcome {
        Ok(completed) => {
            ReplyHeader::new(request_id, ReplyStatus::NoException).encode(&mut w)?;
            encode_value(&mut w, completed.desc.result(), &completed.reply.result)?;
            for (param, value) in completed.desc.outputs().zip(&completed.reply.out_args) {
                encode_value(&mut w, &param.tc, value)?;
            }
        }
        Err(Exception::User(user)) => {
            ReplyHeader::new(request_id, ReplyStatus::UserException).encode(&mut w)?;
            user.encode(&mut w)?;
        }
        Err(Exception::System(ex)) => {
            ReplyHeader::new(request_id, ReplyStatus::SystemException).encode(&mut w)?;
            w.write(ex)?;
        }
    }
    w.finish()
}

/// Serves GIOP requests from the ORB's object adapters
pub(crate) struct OrbRequestHandler {
    orb: Weak<OrbInner>,
}

impl OrbRequestHandler {
    pub(crate) fn new(orb: Weak<OrbInner>) -> Self {
        Self { orb }
    }
}

#[async_trait]
impl RequestHandler for OrbRequestHandler {
    async fn handle_request(&self, request: IncomingRequest) -> Option<Message> {
        let version = request.version();
        let request_id = request.header.request_id;
        let operation = request.header.operation.as_str();
        debug!(request_id, operation, peer = %request.peer, "dispatching request");

        let outcome = match (self.orb.upgrade(), request.header.object_key()) {
            (Some(orb), Some(key)) => {
                dispatch(&orb, &key, operation, Arguments::Wire(request.body_reader())).await
            }
            (Some(_), None) => Err(system(SystemExceptionKind::ObjectNotExist, CompletionStatus::No)),
            (None, _) => Err(system(SystemExceptionKind::Transient, CompletionStatus::No)),
        };

        if !request.header.response_expected {
            if let Err(e) = &outcome {
                debug!(request_id, operation, "oneway request failed: {}", e);
            }
            return None;
        }

        let completed = if outcome.is_ok() {
            CompletionStatus::Yes
        } else {
            CompletionStatus::No
        };
        let reply = encode_reply(version, request_id, &outcome);
        drop(outcome);
        match reply {
            Ok(message) => Some(message),
            Err(e) => {
                error!(request_id, operation, "failed to marshal reply: {}", e);
                let ex = SystemException::new(SystemExceptionKind::Marshal, completed);
                system_exception_reply(version, request_id, &ex).ok()
            }
        }
    }

    async fn handle_locate(&self, version: Version, request: LocateRequestHeader) -> Message {
        let here = self
            .orb
            .upgrade()
            .zip(request.target.object_key())
            .and_then(|(orb, key)| {
                let key = ObjectKey::decode(&key)?;
                let poa = orb.find_adapter(&key.adapter)?;
                Some(poa.locate(&key.oid))
            })
            .unwrap_or(false);
        let status = if here {
            LocateStatus::ObjectHere
        } else {
            LocateStatus::UnknownObject
        };
        trace!(request_id = request.request_id, ?status, "locate request");

        let mut w = MessageWriter::new(version, MsgType::LocateReply);
        let header = LocateReplyHeader {
            request_id: request.request_id,
            status,
        };
        match header.encode(&mut w).and_then(|_| w.finish()) {
            Ok(message) => message,
            Err(e) => {
                error!("failed to build locate reply: {}", e);
                Message::header_only(version, MsgType::MessageError)
            }
        }
    }
}
