//! Wire protocol types.
//!
//! A request frame names an operation, carries its arguments and an optional
//! call id. Frames without an id are fire-and-forget notifications: the server
//! runs them but never answers. Every response echoes the call id and carries
//! either a result value or an [`RpcError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::Arguments;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const UNKNOWN_OPERATION: i32 = -32601;
pub const INVALID_ARGUMENTS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const APPLICATION_ERROR: i32 = -32000;
pub const MODULE_NOT_ASSIGNED: i32 = -32001;

/// Reserved operation answered by the server itself with the exposed surface.
pub const DESCRIBE_OPERATION: &str = "_describe";

/// Call identifier, echoed back in the matching response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallId::Number(n) => write!(f, "{n}"),
            CallId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for CallId {
    fn from(n: u64) -> Self {
        CallId::Number(n)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId::String(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId::String(s.to_string())
    }
}

/// Request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub operation: String,
    #[serde(default)]
    pub args: Arguments,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CallId>,
}

impl Request {
    #[must_use]
    pub fn new(operation: impl Into<String>, args: Arguments, id: CallId) -> Self {
        Self {
            operation: operation.into(),
            args,
            id: Some(id),
        }
    }

    #[must_use]
    pub fn notification(operation: impl Into<String>, args: Arguments) -> Self {
        Self {
            operation: operation.into(),
            args,
            id: None,
        }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

/// Response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: CallId,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    #[must_use]
    pub fn success(id: CallId, result: Value) -> Self {
        Self {
            id,
            status: Status::Ok,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: CallId, error: RpcError) -> Self {
        Self {
            id,
            status: Status::Error,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse the frame into the call outcome.
    ///
    /// An `ok` frame without a result decodes as `null`; an `error` frame
    /// without an error object is reported as an internal error.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.status {
            Status::Ok => Ok(self.result.unwrap_or(Value::Null)),
            Status::Error => Err(self
                .error
                .unwrap_or_else(|| RpcError::internal_error("error response without payload"))),
        }
    }
}

/// Category of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    Parse,
    InvalidRequest,
    UnknownOperation,
    InvalidArguments,
    Application,
    ModuleNotAssigned,
    Internal,
}

impl RemoteErrorKind {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            RemoteErrorKind::Parse => PARSE_ERROR,
            RemoteErrorKind::InvalidRequest => INVALID_REQUEST,
            RemoteErrorKind::UnknownOperation => UNKNOWN_OPERATION,
            RemoteErrorKind::InvalidArguments => INVALID_ARGUMENTS,
            RemoteErrorKind::Application => APPLICATION_ERROR,
            RemoteErrorKind::ModuleNotAssigned => MODULE_NOT_ASSIGNED,
            RemoteErrorKind::Internal => INTERNAL_ERROR,
        }
    }

    /// Dispatch errors are raised by the server before the module is reached.
    #[must_use]
    pub fn is_dispatch(self) -> bool {
        matches!(
            self,
            RemoteErrorKind::UnknownOperation | RemoteErrorKind::InvalidArguments
        )
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RemoteErrorKind::Parse => "parse error",
            RemoteErrorKind::InvalidRequest => "invalid request",
            RemoteErrorKind::UnknownOperation => "unknown operation",
            RemoteErrorKind::InvalidArguments => "invalid arguments",
            RemoteErrorKind::Application => "application error",
            RemoteErrorKind::ModuleNotAssigned => "module not assigned",
            RemoteErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Error payload of a response frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub kind: RemoteErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl RpcError {
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code(),
            kind,
            message: message.into(),
            operation: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Parse, message)
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidRequest, message)
    }

    #[must_use]
    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(
            RemoteErrorKind::UnknownOperation,
            format!("Operation not exposed: {operation}"),
        )
        .with_operation(operation)
    }

    #[must_use]
    pub fn invalid_arguments(operation: &str, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidArguments, message).with_operation(operation)
    }

    #[must_use]
    pub fn application(operation: &str, message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Application, message).with_operation(operation)
    }

    #[must_use]
    pub fn module_not_assigned() -> Self {
        Self::new(
            RemoteErrorKind::ModuleNotAssigned,
            "No module assigned to service",
        )
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Internal, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operation {
            Some(op) => write!(f, "{} in '{}': {}", self.kind, op, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for RpcError {}

/// Any frame that can travel over a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Payload of the `_describe` operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    pub module_type: String,
    pub operations: Vec<crate::operation::OperationInfo>,
}

impl ServiceDescription {
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&crate::operation::OperationInfo> {
        self.operations.iter().find(|op| op.name == name)
    }
}
