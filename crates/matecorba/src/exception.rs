//! Exceptions and the per-invocation Environment
//!
//! Every invocation reports failure through an [`Environment`], which holds
//! at most one exception:
//!
//! ```text
//!   NO_EXCEPTION --set--> USER_EXCEPTION(repo id, members)
//!        ^       \
//!        |        +-set-> SYSTEM_EXCEPTION(kind, minor, completed)
//!        +--- clear ---------------------------+
//! ```
//!
//! An environment that already carries an exception must be cleared before
//! it is used for another call.

use crate::error::{OrbError, Result};
use corba_cdr::{decode_value, encode_value, CdrReader, CdrWriter, ObjectResolver, TcKind, TypeCode, Value};
use giop::SystemException;
use std::fmt;

/// A user-defined exception raised by an operation
#[derive(Debug, Clone, PartialEq)]
pub struct UserException {
    tc: TypeCode,
    members: Value,
}

impl UserException {
    /// Build an exception of type `tc` (an `except` TypeCode) from its
    /// members, given as a `Value::Struct`
    pub fn new(tc: TypeCode, members: Value) -> Result<Self> {
        if tc.kind() != TcKind::Except {
            return Err(OrbError::BadArgument(format!("{} is not an exception type", tc)));
        }
        tc.check_value(&members)?;
        Ok(Self { tc, members })
    }

    /// An exception of type `tc` with default members
    pub fn empty(tc: TypeCode) -> Result<Self> {
        let members = tc.default_value()?;
        Self::new(tc, members)
    }

    pub fn repo_id(&self) -> &str {
        self.tc.id().unwrap_or_default()
    }

    pub fn type_code(&self) -> &TypeCode {
        &self.tc
    }

    pub fn members(&self) -> &Value {
        &self.members
    }

    /// Member value by name
    pub fn member(&self, name: &str) -> Option<&Value> {
        let index = (0..self.tc.member_count()).find(|&i| self.tc.member_name(i) == Some(name))?;
        self.members.as_slice()?.get(index)
    }

    /// Marshal as the body of a USER_EXCEPTION reply
    pub(crate) fn encode(&self, w: &mut CdrWriter) -> corba_cdr::Result<()> {
        w.write_string(self.repo_id())?;
        encode_value(w, &self.tc, &self.members)
    }

    /// Unmarshal the members once the repository id has been matched
    pub(crate) fn decode_members(
        tc: &TypeCode,
        r: &mut CdrReader<'_>,
        resolver: Option<&dyn ObjectResolver>,
    ) -> corba_cdr::Result<Self> {
        let members = decode_value(r, tc, resolver)?;
        Ok(Self {
            tc: tc.clone(),
            members,
        })
    }
}

impl fmt::Display for UserException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repo_id())
    }
}

/// Any exception an invocation can end with
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    User(UserException),
    System(SystemException),
}

impl Exception {
    pub fn repo_id(&self) -> String {
        match self {
            Exception::User(u) => u.repo_id().to_string(),
            Exception::System(s) => s.repo_id(),
        }
    }

    pub fn as_system(&self) -> Option<&SystemException> {
        match self {
            Exception::System(s) => Some(s),
            Exception::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserException> {
        match self {
            Exception::User(u) => Some(u),
            Exception::System(_) => None,
        }
    }
}

impl From<SystemException> for Exception {
    fn from(ex: SystemException) -> Self {
        Exception::System(ex)
    }
}

impl From<UserException> for Exception {
    fn from(ex: UserException) -> Self {
        Exception::User(ex)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::User(u) => write!(f, "user exception {}", u),
            Exception::System(s) => write!(f, "system exception {}", s),
        }
    }
}

impl std::error::Error for Exception {}

/// Exception category held by an [`Environment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionMajor {
    NoException,
    UserException,
    SystemException,
}

/// Result channel of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    exception: Option<Exception>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn major(&self) -> ExceptionMajor {
        match &self.exception {
            None => ExceptionMajor::NoException,
            Some(Exception::User(_)) => ExceptionMajor::UserException,
            Some(Exception::System(_)) => ExceptionMajor::SystemException,
        }
    }

    pub fn exception(&self) -> Option<&Exception> {
        self.exception.as_ref()
    }

    pub fn system_exception(&self) -> Option<&SystemException> {
        self.exception.as_ref().and_then(Exception::as_system)
    }

    pub fn user_exception(&self) -> Option<&UserException> {
        self.exception.as_ref().and_then(Exception::as_user)
    }

    /// Repository id of the held exception
    pub fn exception_id(&self) -> Option<String> {
        self.exception.as_ref().map(Exception::repo_id)
    }

    /// Store an exception, replacing any previous one
    pub fn set(&mut self, exception: impl Into<Exception>) {
        self.exception = Some(exception.into());
    }

    /// Reset to NO_EXCEPTION
    pub fn clear(&mut self) {
        self.exception = None;
    }

    /// Take the exception out, leaving the environment clear
    pub fn take(&mut self) -> Option<Exception> {
        self.exception.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use giop::{CompletionStatus, SystemExceptionKind};

    fn not_found() -> TypeCode {
        TypeCode::exception(
            "IDL:Test/NotFound:1.0",
            "NotFound",
            [("key", TypeCode::string(0)), ("tries", TypeCode::long())],
        )
    }

    #[test]
    fn test_environment_holds_one_exception() {
        let mut env = Environment::new();
        assert_eq!(env.major(), ExceptionMajor::NoException);

        env.set(SystemException::new(
            SystemExceptionKind::Transient,
            CompletionStatus::No,
        ));
        assert!(env.is_exception());
        assert_eq!(env.major(), ExceptionMajor::SystemException);
        assert_eq!(
            env.exception_id().as_deref(),
            Some("IDL:omg.org/CORBA/TRANSIENT:1.0")
        );

        let user = UserException::empty(not_found()).unwrap();
        env.set(user);
        assert_eq!(env.major(), ExceptionMajor::UserException);
        assert!(env.system_exception().is_none());

        env.clear();
        assert!(!env.is_exception());
    }

    #[test]
    fn test_user_exception_members() {
        let ex = UserException::new(
            not_found(),
            Value::Struct(vec![Value::from("k1"), Value::Long(3)]),
        )
        .unwrap();
        assert_eq!(ex.repo_id(), "IDL:Test/NotFound:1.0");
        assert_eq!(ex.member("tries"), Some(&Value::Long(3)));
        assert!(ex.member("missing").is_none());
    }

    #[test]
    fn test_user_exception_rejects_non_exception_type() {
        assert!(UserException::new(TypeCode::long(), Value::Long(1)).is_err());
        assert!(UserException::new(not_found(), Value::Struct(vec![])).is_err());
    }
}
