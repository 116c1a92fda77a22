//! Call-forwarding client.
//!
//! An [`RpcClient`] is bound to one server address. Each call is written to a
//! single connection and awaited until its response arrives or the call
//! timeout fires. Calls are never retried and the client never reconnects.
//!
//! There is no mid-flight cancellation: a call that timed out keeps running on
//! the server, and its late response is discarded by call id instead of being
//! handed to a later call.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};
use crate::operation::Arguments;
use crate::protocol::{CallId, DESCRIBE_OPERATION, Message, Request, Response, ServiceDescription};
use crate::transport::FrameCodec;

/// Default bound on a single call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Message>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;

/// Call waiting for its response
type PendingCall = oneshot::Sender<Result<Response>>;
type PendingCalls = Arc<Mutex<HashMap<CallId, PendingCall>>>;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

struct Inner {
    peer: SocketAddr,
    sender: Mutex<FrameSink>,
    pending: PendingCalls,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Client handle for one remote server.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("peer", &self.inner.peer)
            .field("timeout", &self.inner.timeout)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connect to a server with a single attempt.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if nothing is listening at the address.
    pub async fn connect(host: &str, port: u16, options: ClientOptions) -> Result<Self> {
        let stream =
            TcpStream::connect((host, port))
                .await
                .map_err(|source| ClientError::Connect {
                    addr: format!("{host}:{port}"),
                    source,
                })?;
        Self::from_stream(stream, options)
    }

    /// Connect to an already resolved socket address.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if nothing is listening at the address.
    pub async fn connect_addr(addr: SocketAddr, options: ClientOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Self::from_stream(stream, options)
    }

    fn from_stream(stream: TcpStream, options: ClientOptions) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let framed = Framed::new(stream, FrameCodec::new());
        let (sink, stream) = framed.split();

        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_responses(
            stream,
            pending.clone(),
            closed.clone(),
            peer,
        ));

        debug!("[{}] Client connected", peer);

        Ok(Self {
            inner: Arc::new(Inner {
                peer,
                sender: Mutex::new(sink),
                pending,
                closed,
                next_id: AtomicU64::new(1),
                timeout: options.timeout,
                reader,
            }),
        })
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Call an operation with the client's default timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Remote` for failures reported by the server and a
    /// transport error (`Timeout`, `ConnectionClosed`, `Codec`) otherwise.
    pub async fn call(&self, operation: &str, args: Arguments) -> Result<Value> {
        self.call_with_timeout(operation, args, self.inner.timeout)
            .await
    }

    /// Call an operation with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn call_with_timeout(
        &self,
        operation: &str,
        args: Arguments,
        timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let id = CallId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(operation, args, id.clone());

        trace!("[{}] -> {} (id={})", self.inner.peer, operation, id);

        // Deadline covers registering, sending and the reply
        let exchange = async {
            let (tx, rx) = oneshot::channel();
            {
                let mut pending = self.inner.pending.lock().await;
                // The reader marks the client closed before draining this map
                if self.is_closed() {
                    return Err(ClientError::ConnectionClosed);
                }
                pending.insert(id.clone(), tx);
            }
            {
                let mut sender = self.inner.sender.lock().await;
                sender.send(Message::Request(request)).await?;
            }
            rx.await.map_err(|_| ClientError::ConnectionClosed)?
        };

        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.inner.pending.lock().await.remove(&id);
                return Err(e);
            }
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                warn!(
                    "[{}] Call '{}' (id={}) timed out after {:?}",
                    self.inner.peer, operation, id, timeout
                );
                return Err(ClientError::Timeout {
                    operation: operation.to_string(),
                    timeout,
                });
            }
        };

        Ok(response.into_outcome()?)
    }

    /// Call an operation and decode the result.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`]; also `ClientError::Json` if the result does not decode.
    pub async fn call_as<T: DeserializeOwned>(&self, operation: &str, args: Arguments) -> Result<T> {
        let value = self.call(operation, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn notify(&self, operation: &str, args: Arguments) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let request = Request::notification(operation, args);
        let mut sender = self.inner.sender.lock().await;
        sender.send(Message::Request(request)).await?;
        Ok(())
    }

    /// Fetch the server's module type and exposed operations.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call_as`].
    pub async fn describe(&self) -> Result<ServiceDescription> {
        self.call_as(DESCRIBE_OPERATION, Arguments::none()).await
    }

    /// Close the connection. Pending and later calls fail with `ConnectionClosed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut sender = self.inner.sender.lock().await;
            if let Err(e) = sender.close().await {
                debug!("[{}] Error while closing connection: {}", self.inner.peer, e);
            }
        }
        self.inner.reader.abort();
        fail_pending(&self.inner.pending).await;
        debug!("[{}] Client closed", self.inner.peer);
    }
}

async fn read_responses(
    mut stream: FrameStream,
    pending: PendingCalls,
    closed: Arc<AtomicBool>,
    peer: SocketAddr,
) {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Response(resp)) => {
                let tx = pending.lock().await.remove(&resp.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(resp));
                    }
                    None => debug!(
                        "[{}] Discarding response for unknown or expired call {}",
                        peer, resp.id
                    ),
                }
            }
            Ok(Message::Request(req)) => {
                warn!(
                    "[{}] Ignoring unexpected request frame '{}'",
                    peer, req.operation
                );
            }
            Err(e) => {
                warn!("[{}] Read error: {}", peer, e);
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    fail_pending(&pending).await;
    debug!("[{}] Connection closed by server", peer);
}

async fn fail_pending(pending: &PendingCalls) {
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(ClientError::ConnectionClosed));
    }
}
