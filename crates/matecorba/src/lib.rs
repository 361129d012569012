//! MateCORBA object request broker core
//!
//! This crate ties the CDR and GIOP layers together into a working ORB:
//! object references that invoke either over IIOP or directly in process,
//! and the Portable Object Adapter that routes incoming requests to
//! servants.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ORB core (this crate)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ObjectRef            │  Orb               │  POA tree      │
//! │  - ref counting       │  - init/shutdown   │  - policies    │
//! │  - local/remote call  │  - initial refs    │  - managers    │
//! │  - LOCATION_FORWARD   │  - IOR strings     │  - servants    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dispatcher: object key -> adapter -> servant -> method     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  giop: messages, fragments, connections, server             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  corba-cdr: CDR streams, TypeCodes, values, allocator       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`orb`]: ORB lifecycle, initial references and the server side
//! - [`objref`]: object references and invocation
//! - [`poa`]: object adapters, managers, servants and servant managers
//! - [`exception`]: user exceptions and the per-call [`Environment`]
//! - [`operation`]: operation signatures driving marshaling
//! - [`policy`]: policy objects

pub mod config;
pub mod error;
pub mod exception;
pub mod objref;
pub mod operation;
pub mod orb;
pub mod poa;
pub mod policy;

mod dispatch;

pub use config::{OrbConfig, DEFAULT_ORB_ID};
pub use error::{OrbError, Result};
pub use exception::{Environment, Exception, ExceptionMajor, UserException};
pub use objref::{InvokeReply, ObjectRef, MAX_FORWARD_HOPS};
pub use operation::{OperationDesc, ParamDesc, ParamMode};
pub use orb::{orb_init, Orb, POA_CURRENT_REPO_ID, POA_REPO_ID};
pub use poa::{
    object_id_to_string, string_to_object_id, AdapterActivator, BasicServant, ManagerState,
    MethodReply, MethodResult, ObjectId, Poa, PoaCurrent, PoaManager, PoaPolicies, Servant,
    ServantActivator, ServantClass, ServantLocator, ServantManager, ServantRef, ServerRequest,
};
pub use policy::{InvocationPolicy, Policy};

pub use corba_cdr::{Allocator, Any, Ior, TcKind, TypeCode, Value};
pub use giop::{CompletionStatus, Endpoint, SystemException, SystemExceptionKind, Version};
