//! Logger capability shared by services, servers and scripts.
//!
//! Logging is a side channel: none of these methods return errors, and a
//! logger that cannot deliver a record reports that to `tracing` only.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::RpcClient;
use crate::operation::Arguments;

/// Diagnostic sink with three severities plus key/value publication.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);

    /// Publish metadata such as a bound port.
    fn update_data(&self, data: &Map<String, Value>) {
        self.info(&format!("update_data {}", Value::Object(data.clone())));
    }
}

/// Logger writing to `tracing`, tagging every record.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    tag: String,
}

impl TracingLogger {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Logger for TracingLogger {
    fn info(&self, msg: &str) {
        info!("[{}] {}", self.tag, msg);
    }

    fn warn(&self, msg: &str) {
        warn!("[{}] {}", self.tag, msg);
    }

    fn error(&self, msg: &str) {
        error!("[{}] {}", self.tag, msg);
    }

    fn update_data(&self, data: &Map<String, Value>) {
        let data = Value::Object(data.clone());
        info!("[{}] data {}", self.tag, data);
    }
}

#[derive(Debug)]
enum LogRecord {
    Message { level: &'static str, text: String },
    Data(Map<String, Value>),
}

/// Logger forwarding records to a remote log service.
///
/// Records are queued and sent as notifications (`info`, `warn`, `error`,
/// `update_data`) by a background task, so logging never blocks on the network.
#[derive(Debug, Clone)]
pub struct RemoteLogger {
    tag: String,
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl RemoteLogger {
    /// Start forwarding to `client`. Must be called within a tokio runtime.
    pub fn new(client: RpcClient, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_records(client, tag.clone(), rx));
        Self { tag, tx }
    }

    fn send(&self, record: LogRecord) {
        if self.tx.send(record).is_err() {
            warn!("[{}] Log forwarder stopped, record dropped", self.tag);
        }
    }

    fn message(&self, level: &'static str, msg: &str) {
        self.send(LogRecord::Message {
            level,
            text: format!("[{}] {}", self.tag, msg),
        });
    }
}

impl Logger for RemoteLogger {
    fn info(&self, msg: &str) {
        self.message("info", msg);
    }

    fn warn(&self, msg: &str) {
        self.message("warn", msg);
    }

    fn error(&self, msg: &str) {
        self.message("error", msg);
    }

    fn update_data(&self, data: &Map<String, Value>) {
        self.send(LogRecord::Data(data.clone()));
    }
}

async fn forward_records(
    client: RpcClient,
    tag: String,
    mut rx: mpsc::UnboundedReceiver<LogRecord>,
) {
    while let Some(record) = rx.recv().await {
        let (operation, args) = match record {
            LogRecord::Message { level, text } => (level, Arguments::positional([Value::String(text)])),
            LogRecord::Data(data) => ("update_data", Arguments::positional([Value::Object(data)])),
        };
        if let Err(e) = client.notify(operation, args).await {
            warn!("[{}] Failed to forward '{}' record: {}", tag, operation, e);
            if client.is_closed() {
                break;
            }
        }
    }
    debug!("[{}] Log forwarder finished", tag);
}

/// Optional logger with a `tracing` fallback.
#[derive(Clone, Default)]
pub struct LogHandler {
    logger: Option<Arc<dyn Logger>>,
}

impl std::fmt::Debug for LogHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandler")
            .field("assigned", &self.logger.is_some())
            .finish()
    }
}

impl LogHandler {
    #[must_use]
    pub fn new(logger: Option<Arc<dyn Logger>>) -> Self {
        Self { logger }
    }

    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.logger.is_some()
    }

    pub fn set(&mut self, logger: Arc<dyn Logger>) {
        self.logger = Some(logger);
    }
}

impl From<Arc<dyn Logger>> for LogHandler {
    fn from(logger: Arc<dyn Logger>) -> Self {
        Self::new(Some(logger))
    }
}

impl Logger for LogHandler {
    fn info(&self, msg: &str) {
        match &self.logger {
            Some(logger) => logger.info(msg),
            None => info!("{}", msg),
        }
    }

    fn warn(&self, msg: &str) {
        match &self.logger {
            Some(logger) => logger.warn(msg),
            None => warn!("{}", msg),
        }
    }

    fn error(&self, msg: &str) {
        match &self.logger {
            Some(logger) => logger.error(msg),
            None => error!("{}", msg),
        }
    }

    fn update_data(&self, data: &Map<String, Value>) {
        match &self.logger {
            Some(logger) => logger.update_data(data),
            None => {
                let data = Value::Object(data.clone());
                info!("data {}", data);
            }
        }
    }
}
