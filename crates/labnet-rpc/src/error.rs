//! Error types for the labnet-rpc crate.
//!
//! [`ClientError`] keeps local transport failures (connect, codec, timeout)
//! apart from failures reported by the remote server, so callers can decide
//! whether reconnecting makes sense.

use std::time::Duration;

use crate::protocol::{RemoteErrorKind, RpcError};
use crate::transport::CodecError;

/// Errors that can occur with the RPC client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote {0}")]
    Remote(#[from] RpcError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Call to '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Unexpected response")]
    UnexpectedResponse,

    #[error("Contract mismatch for '{expected_type}': {detail}")]
    ContractMismatch {
        expected_type: String,
        detail: String,
    },
}

impl ClientError {
    /// True for failures on this side of the wire.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::Io(_)
                | ClientError::Codec(_)
                | ClientError::ConnectionClosed
                | ClientError::Timeout { .. }
        )
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    #[must_use]
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            ClientError::Remote(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        self.remote().map(|err| err.kind)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
