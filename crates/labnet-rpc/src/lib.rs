//! Wire protocol and call-forwarding client for labnet services.
//!
//! A labnet server hosts one instrument module and exposes a fixed set of
//! operations over TCP. This crate holds everything both ends of that
//! connection share.
//!
//! # Architecture
//!
//! - [`protocol`]: request/response frames, call ids and remote error kinds
//! - [`operation`]: operation declarations and argument binding
//! - [`transport`]: length-prefixed codec for message framing
//! - [`client`]: [`RpcClient`], one connection to one server
//! - [`contract`]: typed client contracts checked at bind time
//! - [`logger`]: the [`Logger`] capability and its implementations
//! - [`error`]: [`ClientError`] and the `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use labnet_rpc::{Arguments, ClientOptions, RpcClient};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), labnet_rpc::ClientError> {
//! let client = RpcClient::connect("127.0.0.1", 5001, ClientOptions::default()).await?;
//! let wavelength: f64 = client
//!     .call_as("get_wavelength", Arguments::positional([json!(1), json!("nm")]))
//!     .await?;
//! println!("{wavelength} nm");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod contract;
pub mod error;
pub mod logger;
pub mod operation;
pub mod protocol;
pub mod transport;

pub use client::{ClientOptions, DEFAULT_CALL_TIMEOUT, RpcClient};
pub use contract::{Contract, bind, verify};
pub use error::{ClientError, Result};
pub use logger::{LogHandler, Logger, RemoteLogger, TracingLogger};
pub use operation::{ArgumentError, Arguments, BoundArgs, Operation, OperationInfo};
pub use protocol::{
    APPLICATION_ERROR, CallId, DESCRIBE_OPERATION, INTERNAL_ERROR, INVALID_ARGUMENTS,
    INVALID_REQUEST, MODULE_NOT_ASSIGNED, Message, PARSE_ERROR, RemoteErrorKind, Request,
    Response, RpcError, ServiceDescription, Status, UNKNOWN_OPERATION,
};
pub use transport::{CodecError, FrameCodec, MAX_FRAME_SIZE};
