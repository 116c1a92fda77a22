//! TCP server hosting one service.
//!
//! Each accepted connection runs in its own task, so a slow call never blocks
//! new connections. Frames on one connection are handled in arrival order,
//! which keeps a single client's calls in issue order. Calls from different
//! connections meet at the host's call lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use labnet_rpc::{
    CallId, DESCRIBE_OPERATION, FrameCodec, Logger, Message, Request, Response, RpcError,
};
use rand::Rng;
use serde_json::{Map, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, ServerError};
use crate::service::{Service, ServiceHost};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bounded random port search used by [`Server::start_probing`]
#[derive(Debug, Clone)]
pub struct PortProbe {
    pub min_port: u16,
    pub max_port: u16,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PortProbe {
    fn default() -> Self {
        Self {
            min_port: 1024,
            max_port: 9999,
            max_attempts: 50,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl PortProbe {
    #[must_use]
    pub fn range(min_port: u16, max_port: u16) -> Self {
        Self {
            min_port: min_port.min(max_port),
            max_port: max_port.max(min_port),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before retry `attempt` (1-based): doubles each time, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Short id tagging one connection in logs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..8].to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Binds a [`ServiceHost`] to a network address.
pub struct Server<S: Service> {
    name: Arc<str>,
    host: Arc<ServiceHost<S>>,
    running: Option<Running>,
}

impl<S: Service> Server<S> {
    /// `name` is the logical module name used to tag log records.
    pub fn new(name: impl Into<String>, host: ServiceHost<S>) -> Self {
        Self {
            name: Arc::from(name.into()),
            host: Arc::new(host),
            running: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn host(&self) -> &ServiceHost<S> {
        &self.host
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind `host:port` and start accepting connections. Port 0 picks an
    /// ephemeral port; the bound port is published through the logger.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address is unavailable (no retry),
    /// or `ServerError::AlreadyStarted` if this server is already listening.
    pub async fn start(&mut self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyStarted(running.addr));
        }

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;

        self.serve(listener)
    }

    /// Bind a random free port from `probe`, retrying with backoff.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::PortsExhausted` once `probe.max_attempts` ports
    /// were in use, or `ServerError::Bind` for any other bind failure.
    pub async fn start_probing(&mut self, host: &str, probe: &PortProbe) -> Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyStarted(running.addr));
        }

        for attempt in 1..=probe.max_attempts {
            let port = rand::rng().random_range(probe.min_port..=probe.max_port);

            match TcpListener::bind((host, port)).await {
                Ok(listener) => return self.serve(listener),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    self.host.log().warn(&format!(
                        "Failed to bind port {port} (attempt {attempt}/{})",
                        probe.max_attempts
                    ));
                    if attempt < probe.max_attempts {
                        tokio::time::sleep(probe.delay_for(attempt)).await;
                    }
                }
                Err(source) => {
                    return Err(ServerError::Bind {
                        addr: format!("{host}:{port}"),
                        source,
                    });
                }
            }
        }

        Err(ServerError::PortsExhausted {
            attempts: probe.max_attempts,
            min_port: probe.min_port,
            max_port: probe.max_port,
        })
    }

    fn serve(&mut self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            self.host.clone(),
            self.name.clone(),
            shutdown.clone(),
        ));

        self.running = Some(Running {
            addr,
            shutdown,
            task,
        });

        if !self.host.has_module() {
            warn!("[{}] Serving without an assigned module", self.name);
        }

        info!("[{}] Server listening on {}", self.name, addr);
        let mut data = Map::new();
        data.insert("port".to_string(), Value::from(addr.port()));
        self.host.log().update_data(&data);

        Ok(addr)
    }

    /// Stop accepting, drop every open connection and release the address.
    ///
    /// In-flight calls are abandoned; their clients see the connection close.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::NotStarted` if the server is not listening.
    pub async fn shutdown(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(ServerError::NotStarted)?;
        running.shutdown.cancel();
        if let Err(e) = running.task.await {
            error!("[{}] Accept loop ended abnormally: {}", self.name, e);
        }
        info!("[{}] Server on {} stopped", self.name, running.addr);
        Ok(())
    }
}

impl<S: Service> Drop for Server<S> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.cancel();
        }
    }
}

async fn accept_loop<S: Service>(
    listener: TcpListener,
    host: Arc<ServiceHost<S>>,
    name: Arc<str>,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = ConnectionId::new();
                    debug!("[{}] Accepted connection {} from {}", name, id, peer);
                    let host = host.clone();
                    let name = name.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, &host, &name, &id).await {
                            warn!("[{}] Connection {} error: {}", name, id, e);
                        }
                        debug!("[{}] Connection {} closed", name, id);
                    });
                }
                Err(e) => {
                    error!("[{}] Accept error: {}", name, e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!("[{}] Connection task panicked: {}", name, e);
                }
            }
        }
    }

    drop(listener);
    debug!(
        "[{}] Closing {} open connection(s)",
        name,
        connections.len()
    );
    connections.shutdown().await;
}

async fn handle_connection<S: Service>(
    stream: TcpStream,
    host: &ServiceHost<S>,
    name: &str,
    id: &ConnectionId,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let framed = Framed::new(stream, FrameCodec::new());
    let (mut sink, mut frames) = framed.split();

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Request(request)) => {
                if let Some(response) = dispatch(host, name, id, request).await {
                    sink.send(Message::Response(response)).await?;
                }
            }
            Ok(Message::Response(response)) => {
                warn!(
                    "[{}] Connection {} sent a response frame (id={}), ignoring",
                    name, id, response.id
                );
            }
            Err(e) => {
                // Framed ends the stream after any decode error, so report and close
                let error: RpcError = ServerError::from(e).into();
                warn!("[{}] Connection {} malformed frame: {}", name, id, error);
                let _ = sink
                    .send(Message::Response(Response::error(CallId::Number(0), error)))
                    .await;
                break;
            }
        }
    }

    Ok(())
}

async fn dispatch<S: Service>(
    host: &ServiceHost<S>,
    name: &str,
    id: &ConnectionId,
    request: Request,
) -> Option<Response> {
    let Request {
        operation,
        args,
        id: call_id,
    } = request;

    trace!("[{}] {} <- {} ({:?})", name, id, operation, call_id);

    let outcome = if operation == DESCRIBE_OPERATION {
        serde_json::to_value(host.describe())
            .map_err(|e| RpcError::from(ServerError::Json(e)))
    } else {
        host.call(&operation, args).await
    };

    match call_id {
        Some(call_id) => Some(match outcome {
            Ok(value) => Response::success(call_id, value),
            Err(error) => {
                debug!("[{}] {} '{}' failed: {}", name, id, operation, error);
                Response::error(call_id, error)
            }
        }),
        None => {
            if let Err(error) = outcome {
                debug!(
                    "[{}] {} notification '{}' failed: {}",
                    name, id, operation, error
                );
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_delay_doubles_and_caps() {
        let probe = PortProbe {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..PortProbe::default()
        };
        assert_eq!(probe.delay_for(1), Duration::from_millis(10));
        assert_eq!(probe.delay_for(2), Duration::from_millis(20));
        assert_eq!(probe.delay_for(3), Duration::from_millis(40));
        assert_eq!(probe.delay_for(4), Duration::from_millis(50));
        assert_eq!(probe.delay_for(40), Duration::from_millis(50));
    }

    #[test]
    fn test_probe_range_normalizes_bounds() {
        let probe = PortProbe::range(9000, 8000);
        assert_eq!(probe.min_port, 8000);
        assert_eq!(probe.max_port, 9000);
        assert_eq!(PortProbe::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_connection_id_is_short_and_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_eq!(a.to_string().len(), 8);
        assert_ne!(a, b);
    }
}
