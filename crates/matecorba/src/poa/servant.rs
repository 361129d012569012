//! Servants and their method tables
//!
//! A servant is the local implementation behind one or more object ids.
//! Each servant exposes a [`ServantClass`]: the repository ids it
//! implements and a method table mapping operation names to handlers.
//!
//! ```ignore
//! let class = ServantClass::builder("IDL:Demo/Echo:1.0")
//!     .method(
//!         OperationDesc::new("echo")
//!             .param_in("text", TypeCode::string(0))
//!             .returns(TypeCode::string(0)),
//!         |req| async move { Ok(MethodReply::value(req.arg(0).cloned().unwrap_or_default())) },
//!     )
//!     .build();
//! let servant = BasicServant::new(class);
//! ```

use crate::exception::Exception;
use crate::operation::OperationDesc;
use crate::poa::ObjectId;
use corba_cdr::{Block, Value};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Repository id every object implements
pub const OBJECT_REPO_ID: &str = "IDL:omg.org/CORBA/Object:1.0";

/// Outcome of one method call
pub type MethodResult = std::result::Result<MethodReply, Exception>;

/// Implementation of one operation
pub type MethodFn = Arc<dyn Fn(Arc<ServerRequest>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// The local implementation of an object
pub trait Servant: Send + Sync + 'static {
    /// Method table of this servant
    fn class(&self) -> Arc<ServantClass>;

    /// Called once the servant's object has been etherealized
    fn finalize(&self) {}
}

pub type ServantRef = Arc<dyn Servant>;

/// Identity of a servant, independent of the trait object's vtable
pub(crate) fn servant_key(servant: &ServantRef) -> usize {
    Arc::as_ptr(servant) as *const () as usize
}

pub(crate) fn same_servant(a: &ServantRef, b: &ServantRef) -> bool {
    servant_key(a) == servant_key(b)
}

/// One method table entry
#[derive(Clone)]
pub struct MethodEntry {
    desc: Arc<OperationDesc>,
    implementation: Option<MethodFn>,
}

impl MethodEntry {
    pub fn desc(&self) -> &Arc<OperationDesc> {
        &self.desc
    }

    pub fn implementation(&self) -> Option<&MethodFn> {
        self.implementation.as_ref()
    }
}

/// Repository ids and method table shared by the servants of one class
pub struct ServantClass {
    repo_id: String,
    bases: Vec<String>,
    methods: HashMap<String, MethodEntry>,
}

impl ServantClass {
    pub fn builder(repo_id: impl Into<String>) -> ServantClassBuilder {
        ServantClassBuilder {
            class: ServantClass {
                repo_id: repo_id.into(),
                bases: Vec::new(),
                methods: HashMap::new(),
            },
        }
    }

    /// Most derived repository id
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Whether objects of this class implement `repo_id`
    pub fn is_a(&self, repo_id: &str) -> bool {
        repo_id == self.repo_id || repo_id == OBJECT_REPO_ID || self.bases.iter().any(|b| b == repo_id)
    }

    pub fn method(&self, operation: &str) -> Option<&MethodEntry> {
        self.methods.get(operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

impl fmt::Debug for ServantClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<_> = self.operations().collect();
        ops.sort_unstable();
        f.debug_struct("ServantClass")
            .field("repo_id", &self.repo_id)
            .field("bases", &self.bases)
            .field("operations", &ops)
            .finish()
    }
}

pub struct ServantClassBuilder {
    class: ServantClass,
}

impl ServantClassBuilder {
    /// Add an inherited interface
    pub fn inherits(mut self, repo_id: impl Into<String>) -> Self {
        self.class.bases.push(repo_id.into());
        self
    }

    /// Register an operation and its implementation
    pub fn method<F, Fut>(mut self, desc: OperationDesc, handler: F) -> Self
    where
        F: Fn(Arc<ServerRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        let implementation: MethodFn = Arc::new(move |req| Box::pin(handler(req)));
        self.class.methods.insert(
            desc.name().to_string(),
            MethodEntry {
                desc: Arc::new(desc),
                implementation: Some(implementation),
            },
        );
        self
    }

    /// Declare an operation without an implementation; calling it raises
    /// NO_IMPLEMENT
    pub fn declare(mut self, desc: OperationDesc) -> Self {
        self.class.methods.insert(
            desc.name().to_string(),
            MethodEntry {
                desc: Arc::new(desc),
                implementation: None,
            },
        );
        self
    }

    pub fn build(self) -> Arc<ServantClass> {
        Arc::new(self.class)
    }
}

type Finalizer = Box<dyn FnOnce() + Send>;

/// A servant that is nothing but its class, with an optional finalizer
pub struct BasicServant {
    class: Arc<ServantClass>,
    finalizer: Mutex<Option<Finalizer>>,
}

impl BasicServant {
    pub fn new(class: Arc<ServantClass>) -> Arc<Self> {
        Arc::new(Self {
            class,
            finalizer: Mutex::new(None),
        })
    }

    pub fn with_finalizer(class: Arc<ServantClass>, finalizer: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            class,
            finalizer: Mutex::new(Some(Box::new(finalizer))),
        })
    }
}

impl Servant for BasicServant {
    fn class(&self) -> Arc<ServantClass> {
        self.class.clone()
    }

    fn finalize(&self) {
        if let Some(finalizer) = self.finalizer.lock().take() {
            finalizer();
        }
    }
}

/// One request as seen by a method implementation.
///
/// Arguments are the `in` and `inout` parameters in declaration order,
/// held in allocator blocks that are freed when the request completes.
pub struct ServerRequest {
    operation: String,
    object_id: ObjectId,
    args: Vec<Block>,
}

impl ServerRequest {
    pub(crate) fn new(operation: impl Into<String>, object_id: ObjectId, args: Vec<Block>) -> Self {
        Self {
            operation: operation.into(),
            object_id,
            args,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn object_id(&self) -> &[u8] {
        &self.object_id
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).and_then(Block::value)
    }

    pub fn args(&self) -> impl Iterator<Item = &Value> {
        self.args.iter().filter_map(Block::value)
    }

    pub(crate) fn into_blocks(self) -> Vec<Block> {
        self.args
    }
}

impl fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRequest")
            .field("operation", &self.operation)
            .field("object_id", &self.object_id)
            .field("args", &self.args.len())
            .finish()
    }
}

/// Successful result of a method: return value, then `inout` and `out`
/// parameters in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodReply {
    pub result: Value,
    pub out_args: Vec<Value>,
}

impl MethodReply {
    pub fn void() -> Self {
        Self::default()
    }

    pub fn value(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            out_args: Vec::new(),
        }
    }

    pub fn with_out(mut self, value: impl Into<Value>) -> Self {
        self.out_args.push(value.into());
        self
    }
}
