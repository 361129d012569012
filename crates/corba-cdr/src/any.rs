//! Self-describing values

use crate::decode::CdrReader;
use crate::encode::{CdrEncode, CdrWriter};
use crate::error::Result;
use crate::marshal;
use crate::typecode::TypeCode;
use crate::value::{FreeReport, ObjectResolver, Value};
use std::fmt;
use std::sync::Arc;

/// A value paired with the TypeCode that describes it.
///
/// An owning `Any` releases its value when destroyed; a borrowed one
/// shares the value with whoever lent it and leaves it alone.
pub struct Any {
    tc: TypeCode,
    value: Arc<Value>,
    release: bool,
}

impl Any {
    /// Owning `Any`, after checking the value against `tc`
    pub fn new(tc: TypeCode, value: Value) -> Result<Self> {
        tc.check_value(&value)?;
        Ok(Self::from_parts(tc, value))
    }

    /// Non-owning `Any` over a shared value
    pub fn borrowed(tc: TypeCode, value: Arc<Value>) -> Result<Self> {
        tc.check_value(&value)?;
        Ok(Self {
            tc,
            value,
            release: false,
        })
    }

    /// The `Any` holding nothing, typed `null`
    pub fn null() -> Self {
        Self::from_parts(TypeCode::null(), Value::Null)
    }

    pub(crate) fn from_parts(tc: TypeCode, value: Value) -> Self {
        Self {
            tc,
            value: Arc::new(value),
            release: true,
        }
    }

    pub fn type_code(&self) -> &TypeCode {
        &self.tc
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether destroying this `Any` releases the value
    pub fn releases(&self) -> bool {
        self.release
    }

    pub fn into_value(self) -> Value {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Release the contents. Borrowed values are left untouched.
    pub fn destroy(self) -> Result<FreeReport> {
        if !self.release {
            return Ok(FreeReport::default());
        }
        match Arc::try_unwrap(self.value) {
            Ok(value) => self.tc.free_value(value),
            // still referenced elsewhere; the last holder frees it
            Err(_) => Ok(FreeReport::default()),
        }
    }

    pub fn encode(&self, w: &mut CdrWriter) -> Result<()> {
        marshal::encode_any(w, self)
    }

    pub fn decode(r: &mut CdrReader<'_>, resolver: Option<&dyn ObjectResolver>) -> Result<Self> {
        marshal::decode_any(r, resolver)
    }
}

impl Clone for Any {
    /// Deep copy; the copy always owns its value
    fn clone(&self) -> Self {
        let value = self
            .tc
            .copy_value(&self.value)
            .unwrap_or_else(|_| (*self.value).clone());
        Self::from_parts(self.tc.clone(), value)
    }
}

impl PartialEq for Any {
    fn eq(&self, other: &Self) -> bool {
        self.tc.equal(&other.tc) && self.value == other.value
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Any")
            .field("tc", &self.tc)
            .field("value", &self.value)
            .field("release", &self.release)
            .finish()
    }
}

impl Default for Any {
    fn default() -> Self {
        Self::null()
    }
}

impl CdrEncode for Any {
    fn cdr_encode(&self, w: &mut CdrWriter) -> Result<()> {
        self.encode(w)
    }
}
