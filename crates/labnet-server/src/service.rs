//! Services: the remotely callable surface of one module.
//!
//! A [`Service`] implementation lists the operations it exposes and maps each
//! of them onto its module. [`ServiceHost`] owns the module and enforces that
//! list: anything not declared is unreachable over the network, whatever the
//! module itself implements.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use labnet_rpc::{
    ArgumentError, Arguments, BoundArgs, LogHandler, Logger, Operation, OperationInfo, RpcError,
    ServiceDescription,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, ServerError};

/// Failure raised while running an exposed operation
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error(transparent)]
    Arguments(#[from] ArgumentError),

    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        ModuleError::Failed(msg.to_string())
    }
}

/// Declares which operations of a module are callable remotely.
pub trait Service: Send + Sync + 'static {
    type Module: Send + Sync + 'static;

    /// Contract name clients check at bind time
    const MODULE_TYPE: &'static str;

    /// The allow-list
    const OPERATIONS: &'static [Operation];

    /// Run `args.operation()` against the module.
    ///
    /// Only called with operations from [`Service::OPERATIONS`] and arguments
    /// already bound to that operation's parameter list.
    fn invoke(
        &self,
        module: &Self::Module,
        args: BoundArgs,
    ) -> impl Future<Output = std::result::Result<Value, ModuleError>> + Send;
}

/// How calls into one module are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallPolicy {
    /// One call at a time
    #[default]
    Serialized,
    /// Calls run concurrently; only for modules safe under concurrent access
    Concurrent,
}

/// Owns one module and routes calls into it through its [`Service`].
pub struct ServiceHost<S: Service> {
    service: S,
    module: Option<S::Module>,
    policy: CallPolicy,
    call_lock: Mutex<()>,
    log: LogHandler,
}

impl<S: Service> ServiceHost<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            module: None,
            policy: CallPolicy::default(),
            call_lock: Mutex::new(()),
            log: LogHandler::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bind the module this service exposes. A service is bound once.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Reassignment` if a module is already assigned.
    pub fn assign_module(&mut self, module: S::Module) -> Result<()> {
        if self.module.is_some() {
            return Err(ServerError::Reassignment {
                module_type: S::MODULE_TYPE,
            });
        }
        self.module = Some(module);
        debug!("[{}] Module assigned", S::MODULE_TYPE);
        Ok(())
    }

    pub fn assign_logger(&mut self, logger: Arc<dyn Logger>) {
        self.log.set(logger);
    }

    #[must_use]
    pub fn log(&self) -> &LogHandler {
        &self.log
    }

    #[must_use]
    pub fn has_module(&self) -> bool {
        self.module.is_some()
    }

    #[must_use]
    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    #[must_use]
    pub fn module_type(&self) -> &'static str {
        S::MODULE_TYPE
    }

    #[must_use]
    pub fn describe(&self) -> ServiceDescription {
        ServiceDescription {
            module_type: S::MODULE_TYPE.to_string(),
            operations: S::OPERATIONS.iter().map(OperationInfo::from).collect(),
        }
    }

    fn lookup(operation: &str) -> Option<&'static Operation> {
        S::OPERATIONS.iter().find(|op| op.name == operation)
    }

    /// Dispatch one call.
    ///
    /// # Errors
    ///
    /// Returns an `RpcError` of kind `UnknownOperation` for names outside the
    /// allow-list, `InvalidArguments` for arity or type mismatches, and
    /// `Application` when the module fails. Every error names the operation.
    pub async fn call(&self, operation: &str, args: Arguments) -> std::result::Result<Value, RpcError> {
        let Some(module) = self.module.as_ref() else {
            return Err(ServerError::ModuleNotAssigned.into());
        };

        let Some(op) = Self::lookup(operation) else {
            self.log
                .warn(&format!("Rejected call to unexposed operation '{operation}'"));
            return Err(RpcError::unknown_operation(operation));
        };

        let bound = args.bind(op)?;

        let _guard = match self.policy {
            CallPolicy::Serialized => Some(self.call_lock.lock().await),
            CallPolicy::Concurrent => None,
        };

        trace!("[{}] invoke {}", S::MODULE_TYPE, op.name);

        let outcome = AssertUnwindSafe(self.service.invoke(module, bound))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ModuleError::Arguments(e))) => Err(e.into()),
            Ok(Err(ModuleError::Failed(msg))) => {
                self.log.error(&format!("Operation '{}' failed: {}", op.name, msg));
                Err(RpcError::application(op.name, msg))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                self.log
                    .error(&format!("Operation '{}' panicked: {}", op.name, msg));
                Err(RpcError::application(op.name, format!("operation panicked: {msg}")))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labnet_rpc::RemoteErrorKind;
    use serde_json::json;

    struct Probe {
        level: std::sync::atomic::AtomicI64,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                level: std::sync::atomic::AtomicI64::new(0),
            }
        }

        // Public on the module, never exposed
        fn calibrate(&self) {
            self.level.store(-1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct ProbeService;

    const READ: Operation = Operation::new("read", &["channel"]);
    const FAIL: Operation = Operation::new("fail", &[]);
    const PANIC: Operation = Operation::new("panic", &[]);

    impl Service for ProbeService {
        type Module = Probe;
        const MODULE_TYPE: &'static str = "probe";
        const OPERATIONS: &'static [Operation] = &[READ, FAIL, PANIC];

        async fn invoke(
            &self,
            module: &Probe,
            args: BoundArgs,
        ) -> std::result::Result<Value, ModuleError> {
            match args.operation().name {
                "read" => {
                    let channel: String = args.get(0)?;
                    let level = module.level.load(std::sync::atomic::Ordering::SeqCst);
                    Ok(json!(format!("{channel}:{level}")))
                }
                "fail" => Err(ModuleError::failed("sensor overrange")),
                "panic" => panic!("driver crashed"),
                "calibrate" => {
                    module.calibrate();
                    Ok(Value::Null)
                }
                other => Err(ModuleError::failed(format!("unhandled {other}"))),
            }
        }
    }

    fn host() -> ServiceHost<ProbeService> {
        let mut host = ServiceHost::new(ProbeService);
        host.assign_module(Probe::new()).unwrap();
        host
    }

    #[tokio::test]
    async fn test_exposed_call() {
        let value = host()
            .call("read", Arguments::positional([json!("CH1")]))
            .await
            .unwrap();
        assert_eq!(value, json!("CH1:0"));
    }

    #[tokio::test]
    async fn test_unexposed_operation_rejected() {
        let err = host().call("calibrate", Arguments::none()).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::UnknownOperation);
        assert_eq!(err.operation.as_deref(), Some("calibrate"));
    }

    #[tokio::test]
    async fn test_arity_mismatch() {
        let err = host().call("read", Arguments::none()).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::InvalidArguments);
        assert!(err.message.contains("expects 1"));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_invalid_arguments() {
        let err = host()
            .call("read", Arguments::positional([json!(7)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::InvalidArguments);
        assert!(err.message.contains("channel"));
    }

    #[tokio::test]
    async fn test_module_failure_is_annotated() {
        let err = host().call("fail", Arguments::none()).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Application);
        assert_eq!(err.operation.as_deref(), Some("fail"));
        assert_eq!(err.message, "sensor overrange");
    }

    #[tokio::test]
    async fn test_module_panic_is_contained() {
        let host = host();
        let err = host.call("panic", Arguments::none()).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Application);
        assert!(err.message.contains("driver crashed"));

        // Host keeps serving after the panic
        assert!(host.call("read", Arguments::positional([json!("CH2")])).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_without_module() {
        let host = ServiceHost::new(ProbeService);
        let err = host.call("read", Arguments::positional([json!("CH1")])).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::ModuleNotAssigned);
    }

    #[test]
    fn test_reassignment_fails() {
        let mut host = host();
        let err = host.assign_module(Probe::new()).unwrap_err();
        assert!(matches!(err, ServerError::Reassignment { module_type: "probe" }));
    }

    #[test]
    fn test_describe_lists_allow_list() {
        let desc = host().describe();
        assert_eq!(desc.module_type, "probe");
        let names: Vec<_> = desc.operations.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["read", "fail", "panic"]);
        assert_eq!(desc.operation("read").unwrap().params, vec!["channel"]);
    }

    #[test]
    fn test_default_policy_is_serialized() {
        assert_eq!(host().policy(), CallPolicy::Serialized);
        let host = ServiceHost::new(ProbeService).with_policy(CallPolicy::Concurrent);
        assert_eq!(host.policy(), CallPolicy::Concurrent);
    }
}
