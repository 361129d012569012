//! Error types for the ORB core

use corba_cdr::CdrError;
use giop::{CompletionStatus, GiopError, SystemException, SystemExceptionKind};
use thiserror::Error;

/// Local API failures of the ORB and its object adapters.
///
/// Request-level failures never surface as `OrbError`; they travel in an
/// [`Environment`](crate::Environment).
#[derive(Debug, Error)]
pub enum OrbError {
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("operation needs the {0} policy")]
    WrongPolicy(&'static str),

    #[error("object already active")]
    ObjectAlreadyActive,

    #[error("servant already active")]
    ServantAlreadyActive,

    #[error("object not active")]
    ObjectNotActive,

    #[error("servant not active")]
    ServantNotActive,

    #[error("no servant registered")]
    NoServant,

    #[error("reference does not belong to this adapter")]
    WrongAdapter,

    #[error("adapter already exists: {0}")]
    AdapterAlreadyExists(String),

    #[error("no such adapter: {0}")]
    AdapterNonExistent(String),

    #[error("adapter has been destroyed")]
    AdapterDestroyed,

    #[error("adapter manager is inactive")]
    AdapterInactive,

    #[error("invalid initial reference name: {0}")]
    InvalidName(String),

    #[error("not inside a servant invocation")]
    NoContext,

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("ORB has been shut down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CDR error: {0}")]
    Cdr(#[from] CdrError),

    #[error("GIOP error: {0}")]
    Giop(#[from] GiopError),

    #[error("system exception: {0}")]
    System(#[from] SystemException),
}

impl OrbError {
    /// The system exception a remote caller sees for this failure
    pub fn to_system_exception(&self) -> SystemException {
        use SystemExceptionKind as K;
        let no = CompletionStatus::No;
        match self {
            OrbError::ObjectNotActive | OrbError::AdapterNonExistent(_) => {
                SystemException::new(K::ObjectNotExist, no)
            }
            OrbError::AdapterDestroyed | OrbError::AdapterInactive | OrbError::NoServant => {
                SystemException::new(K::ObjAdapter, no)
            }
            OrbError::Shutdown => SystemException::new(K::BadInvOrder, no),
            OrbError::Cdr(e) => giop::cdr_error_exception(e, no),
            OrbError::Giop(e) => e.to_system_exception(),
            OrbError::Io(_) => SystemException::new(K::CommFailure, CompletionStatus::Maybe),
            OrbError::System(ex) => *ex,
            OrbError::BadArgument(_) | OrbError::InvalidName(_) => {
                SystemException::new(K::BadParam, no)
            }
            _ => SystemException::new(K::ObjAdapter, no),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrbError>;
