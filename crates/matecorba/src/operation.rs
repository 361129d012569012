//! Operation signatures
//!
//! An [`OperationDesc`] carries what the marshaling layer needs to know
//! about one IDL operation: its parameters with their directions, the
//! result type and the user exceptions it may raise. Requests carry the
//! `in` and `inout` parameters; replies carry the result followed by the
//! `inout` and `out` parameters, each in declaration order.

use corba_cdr::TypeCode;

/// Direction of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    In,
    Out,
    InOut,
}

impl ParamMode {
    /// Sent with the request
    pub fn is_input(self) -> bool {
        matches!(self, ParamMode::In | ParamMode::InOut)
    }

    /// Returned with the reply
    pub fn is_output(self) -> bool {
        matches!(self, ParamMode::Out | ParamMode::InOut)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDesc {
    pub name: String,
    pub tc: TypeCode,
    pub mode: ParamMode,
}

/// Signature of one operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDesc {
    name: String,
    params: Vec<ParamDesc>,
    result: TypeCode,
    exceptions: Vec<TypeCode>,
    oneway: bool,
}

impl OperationDesc {
    /// A `void name()` operation; add parameters with the builder methods
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            result: TypeCode::void(),
            exceptions: Vec::new(),
            oneway: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, tc: TypeCode, mode: ParamMode) -> Self {
        self.params.push(ParamDesc {
            name: name.into(),
            tc,
            mode,
        });
        self
    }

    pub fn param_in(self, name: impl Into<String>, tc: TypeCode) -> Self {
        self.param(name, tc, ParamMode::In)
    }

    pub fn param_out(self, name: impl Into<String>, tc: TypeCode) -> Self {
        self.param(name, tc, ParamMode::Out)
    }

    pub fn param_inout(self, name: impl Into<String>, tc: TypeCode) -> Self {
        self.param(name, tc, ParamMode::InOut)
    }

    pub fn returns(mut self, tc: TypeCode) -> Self {
        self.result = tc;
        self
    }

    /// Declare a user exception (an `except` TypeCode)
    pub fn raises(mut self, tc: TypeCode) -> Self {
        self.exceptions.push(tc);
        self
    }

    /// No reply is sent; the operation must have no outputs
    pub fn oneway(mut self) -> Self {
        self.oneway = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamDesc] {
        &self.params
    }

    pub fn result(&self) -> &TypeCode {
        &self.result
    }

    pub fn exceptions(&self) -> &[TypeCode] {
        &self.exceptions
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParamDesc> {
        self.params.iter().filter(|p| p.mode.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParamDesc> {
        self.params.iter().filter(|p| p.mode.is_output())
    }

    pub fn input_count(&self) -> usize {
        self.inputs().count()
    }

    /// Declared exception type with this repository id
    pub fn exception(&self, repo_id: &str) -> Option<&TypeCode> {
        self.exceptions.iter().find(|tc| tc.id() == Some(repo_id))
    }
}
