//! Error types for hosting services.

use std::net::SocketAddr;

use labnet_rpc::{CodecError, RpcError};

/// Errors that can occur while hosting a service
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listening socket failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server already listening on {0}")]
    AlreadyStarted(SocketAddr),

    #[error("Server not started")]
    NotStarted,

    /// Port probing gave up
    #[error("No free port in {min_port}..={max_port} after {attempts} attempt(s)")]
    PortsExhausted {
        attempts: u32,
        min_port: u16,
        max_port: u16,
    },

    /// A module was assigned to a service that already has one
    #[error("Service '{module_type}' already has a module assigned")]
    Reassignment { module_type: &'static str },

    #[error("No module assigned")]
    ModuleNotAssigned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<ServerError> for RpcError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::ModuleNotAssigned => RpcError::module_not_assigned(),
            ServerError::Codec(CodecError::Json(e)) | ServerError::Json(e) => {
                RpcError::parse_error(e.to_string())
            }
            other => RpcError::internal_error(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
