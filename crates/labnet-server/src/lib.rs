//! Hosting for labnet instrument modules.
//!
//! A hardware-hosting process wraps its driver object in a [`ServiceHost`]
//! and hands it to a [`Server`], which listens on TCP and dispatches wire
//! calls into the module.
//!
//! ```no_run
//! # use labnet_server::{Server, Service, ServiceHost};
//! # async fn example<S: Service>(service: S, module: S::Module) -> labnet_server::Result<()> {
//! let mut host = ServiceHost::new(service);
//! host.assign_module(module)?;
//!
//! let mut server = Server::new("wavemeter1", host);
//! let addr = server.start("127.0.0.1", 0).await?;
//! println!("listening on {addr}");
//!
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod server;
pub mod service;

pub use error::{Result, ServerError};
pub use server::{ConnectionId, PortProbe, Server};
pub use service::{CallPolicy, ModuleError, Service, ServiceHost};
