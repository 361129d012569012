//! CORBA system exceptions
//!
//! A system exception travels in a SYSTEM_EXCEPTION reply as:
//!
//! ```text
//! +-----------------+--------------+--------------------+
//! | string          | ulong        | ulong              |
//! | repository id   | minor code   | completion status  |
//! +-----------------+--------------+--------------------+
//! ```

use corba_cdr::{CdrDecode, CdrEncode, CdrError, CdrReader, CdrWriter};
use std::fmt;

/// Whether the target finished the operation before the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CompletionStatus {
    Yes = 0,
    No = 1,
    Maybe = 2,
}

impl CompletionStatus {
    pub fn from_u32(value: u32) -> corba_cdr::Result<Self> {
        match value {
            0 => Ok(CompletionStatus::Yes),
            1 => Ok(CompletionStatus::No),
            2 => Ok(CompletionStatus::Maybe),
            other => Err(CdrError::InvalidEnumValue {
                value: other,
                count: 3,
            }),
        }
    }
}

macro_rules! system_exceptions {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Standard system exception kinds
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SystemExceptionKind {
            $($variant),*
        }

        impl SystemExceptionKind {
            /// Short IDL name, e.g. `COMM_FAILURE`
            pub fn name(self) -> &'static str {
                match self {
                    $(SystemExceptionKind::$variant => $name),*
                }
            }

            /// Repository id, e.g. `IDL:omg.org/CORBA/COMM_FAILURE:1.0`
            pub fn repo_id(self) -> String {
                format!("IDL:omg.org/CORBA/{}:1.0", self.name())
            }

            pub fn from_repo_id(id: &str) -> Option<Self> {
                let name = id.strip_prefix("IDL:omg.org/CORBA/")?.strip_suffix(":1.0")?;
                match name {
                    $($name => Some(SystemExceptionKind::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

system_exceptions! {
    Unknown => "UNKNOWN",
    BadParam => "BAD_PARAM",
    NoMemory => "NO_MEMORY",
    ImpLimit => "IMP_LIMIT",
    CommFailure => "COMM_FAILURE",
    InvObjref => "INV_OBJREF",
    NoPermission => "NO_PERMISSION",
    Internal => "INTERNAL",
    Marshal => "MARSHAL",
    Initialize => "INITIALIZE",
    NoImplement => "NO_IMPLEMENT",
    BadTypeCode => "BAD_TYPECODE",
    BadOperation => "BAD_OPERATION",
    NoResources => "NO_RESOURCES",
    NoResponse => "NO_RESPONSE",
    BadInvOrder => "BAD_INV_ORDER",
    Transient => "TRANSIENT",
    ObjAdapter => "OBJ_ADAPTER",
    DataConversion => "DATA_CONVERSION",
    ObjectNotExist => "OBJECT_NOT_EXIST",
    Timeout => "TIMEOUT",
}

impl fmt::Display for SystemExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised system exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemException {
    pub kind: SystemExceptionKind,
    pub minor: u32,
    pub completed: CompletionStatus,
}

impl SystemException {
    pub fn new(kind: SystemExceptionKind, completed: CompletionStatus) -> Self {
        Self {
            kind,
            minor: 0,
            completed,
        }
    }

    pub fn with_minor(mut self, minor: u32) -> Self {
        self.minor = minor;
        self
    }

    pub fn repo_id(&self) -> String {
        self.kind.repo_id()
    }

    /// Decode the body of a SYSTEM_EXCEPTION reply. Unknown repository
    /// ids decode as `UNKNOWN`.
    pub fn decode(r: &mut CdrReader<'_>) -> corba_cdr::Result<Self> {
        let id = r.read_string()?;
        let minor = r.read_ulong()?;
        let completed = CompletionStatus::from_u32(r.read_ulong()?)?;
        Ok(Self {
            kind: SystemExceptionKind::from_repo_id(&id).unwrap_or(SystemExceptionKind::Unknown),
            minor,
            completed,
        })
    }
}

impl fmt::Display for SystemException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor {}, completed {:?})",
            self.kind, self.minor, self.completed
        )
    }
}

impl std::error::Error for SystemException {}

impl CdrEncode for SystemException {
    fn cdr_encode(&self, w: &mut CdrWriter) -> corba_cdr::Result<()> {
        w.write_string(&self.repo_id())?;
        w.write_ulong(self.minor);
        w.write_ulong(self.completed as u32);
        Ok(())
    }
}

impl CdrDecode for SystemException {
    fn cdr_decode(r: &mut CdrReader<'_>) -> corba_cdr::Result<Self> {
        SystemException::decode(r)
    }
}

/// Map a marshaling failure to the exception reported for it
pub fn cdr_error_exception(err: &CdrError, completed: CompletionStatus) -> SystemException {
    let kind = match err {
        CdrError::BadTypeCodeKind(_) | CdrError::BadIndirection { .. } => {
            SystemExceptionKind::BadTypeCode
        }
        CdrError::Utf8Error(_) | CdrError::Utf16Error(_) => SystemExceptionKind::DataConversion,
        CdrError::InvalidIor(_) => SystemExceptionKind::InvObjref,
        CdrError::Internal(_) => SystemExceptionKind::Internal,
        CdrError::NestingTooDeep(_) => SystemExceptionKind::ImpLimit,
        _ => SystemExceptionKind::Marshal,
    };
    SystemException::new(kind, completed)
}
