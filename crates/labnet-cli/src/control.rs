//! Pause/resume/stop surface a running script serves on its own port.

use std::sync::Arc;

use labnet_rpc::{Arguments, BoundArgs, Contract, Operation, RpcClient};
use labnet_server::{ModuleError, Service};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared run flags between a script and its control server.
#[derive(Debug, Clone)]
pub struct RunControl {
    paused: Arc<watch::Sender<bool>>,
    stop: CancellationToken,
}

impl RunControl {
    #[must_use]
    pub fn new(stop: CancellationToken) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            stop,
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Ask the script to finish. Also releases a paused script.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.is_stopped() {
            "stopping"
        } else if self.is_paused() {
            "paused"
        } else {
            "running"
        }
    }

    /// Wait until resumed or stopped. Returns `false` when stopped.
    pub async fn wait_until_resumed(&self) -> bool {
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = paused.wait_for(|p| !*p) => !self.is_stopped(),
            () = self.stop.cancelled() => false,
        }
    }
}

pub struct ScriptControlService;

const PAUSE: Operation = Operation::new("pause", &[]);
const RESUME: Operation = Operation::new("resume", &[]);
const STOP: Operation = Operation::new("stop", &[]);
const STATUS: Operation = Operation::new("status", &[]);

impl Service for ScriptControlService {
    type Module = RunControl;
    const MODULE_TYPE: &'static str = "script_control";
    const OPERATIONS: &'static [Operation] = &[PAUSE, RESUME, STOP, STATUS];

    async fn invoke(&self, control: &RunControl, args: BoundArgs) -> Result<Value, ModuleError> {
        let operation = args.operation().name;
        match operation {
            "pause" => control.pause(),
            "resume" => control.resume(),
            "stop" => control.stop(),
            "status" => {}
            other => return Err(ModuleError::failed(format!("unhandled {other}"))),
        }
        if operation != "status" {
            info!("[control] {} -> {}", operation, control.status());
        }
        Ok(json!({ "state": control.status() }))
    }
}

/// Typed client for [`ScriptControlService`]
#[derive(Debug, Clone)]
pub struct ScriptControlClient {
    client: RpcClient,
}

impl Contract for ScriptControlClient {
    const MODULE_TYPE: &'static str = ScriptControlService::MODULE_TYPE;
    const OPERATIONS: &'static [Operation] = &[PAUSE, RESUME, STOP, STATUS];

    fn from_client(client: RpcClient) -> Self {
        Self { client }
    }
}

impl ScriptControlClient {
    async fn send(&self, operation: &str) -> labnet_rpc::Result<String> {
        let reply = self.client.call(operation, Arguments::none()).await?;
        Ok(reply["state"].as_str().unwrap_or_default().to_string())
    }

    pub async fn pause(&self) -> labnet_rpc::Result<String> {
        self.send("pause").await
    }

    pub async fn resume(&self) -> labnet_rpc::Result<String> {
        self.send("resume").await
    }

    pub async fn stop(&self) -> labnet_rpc::Result<String> {
        self.send("stop").await
    }

    pub async fn status(&self) -> labnet_rpc::Result<String> {
        self.send("status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_transitions() {
        let control = RunControl::new(CancellationToken::new());
        assert_eq!(control.status(), "running");
        control.pause();
        assert_eq!(control.status(), "paused");
        control.resume();
        assert_eq!(control.status(), "running");
        control.stop();
        assert_eq!(control.status(), "stopping");
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let control = RunControl::new(CancellationToken::new());
        control.pause();

        let waiter = tokio::spawn({
            let control = control.clone();
            async move { control.wait_until_resumed().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_releases_paused_waiter() {
        let control = RunControl::new(CancellationToken::new());
        control.pause();

        let waiter = tokio::spawn({
            let control = control.clone();
            async move { control.wait_until_resumed().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.stop();
        assert!(!waiter.await.unwrap());
    }
}
