//! Error types for GIOP

use crate::exception::{cdr_error_exception, CompletionStatus, SystemException, SystemExceptionKind};
use corba_cdr::CdrError;
use thiserror::Error;

/// GIOP framing and transport errors
#[derive(Debug, Error)]
pub enum GiopError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CDR error: {0}")]
    Cdr(#[from] CdrError),

    #[error("bad GIOP magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported GIOP version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        size: usize,
        max: usize,
        request_id: Option<u32>,
    },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("fragment error: {0}")]
    Fragment(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("system exception: {0}")]
    System(SystemException),
}

impl GiopError {
    /// The system exception a caller sees for this failure
    pub fn to_system_exception(&self) -> SystemException {
        use SystemExceptionKind as K;
        match self {
            GiopError::Io(_) => SystemException::new(K::CommFailure, CompletionStatus::Maybe),
            GiopError::Cdr(e) => cdr_error_exception(e, CompletionStatus::Maybe),
            GiopError::BadMagic(_)
            | GiopError::InvalidMessageType(_)
            | GiopError::Fragment(_)
            | GiopError::Protocol(_) => SystemException::new(K::Marshal, CompletionStatus::Maybe),
            GiopError::UnsupportedVersion(..) => {
                SystemException::new(K::NoImplement, CompletionStatus::No)
            }
            GiopError::MessageTooLarge { .. } => {
                SystemException::new(K::ImpLimit, CompletionStatus::No)
            }
            GiopError::ConnectionClosed => {
                SystemException::new(K::CommFailure, CompletionStatus::Maybe)
            }
            GiopError::Timeout => SystemException::new(K::Timeout, CompletionStatus::Maybe),
            GiopError::InvalidConfig(_) => SystemException::new(K::BadParam, CompletionStatus::No),
            GiopError::System(ex) => *ex,
        }
    }
}

impl From<SystemException> for GiopError {
    fn from(ex: SystemException) -> Self {
        GiopError::System(ex)
    }
}

pub type Result<T> = std::result::Result<T, GiopError>;
