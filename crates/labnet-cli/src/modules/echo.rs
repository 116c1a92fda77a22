//! Echo module for wiring checks and timeout experiments.

use std::time::Duration;

use labnet_rpc::{BoundArgs, Operation};
use labnet_server::{ModuleError, Service};
use serde_json::{Value, json};

pub struct EchoService;

const ECHO: Operation = Operation::new("echo", &["value"]);
const DELAY: Operation = Operation::new("delay", &["ms"]);
const FAIL: Operation = Operation::new("fail", &["message"]);

impl Service for EchoService {
    type Module = ();
    const MODULE_TYPE: &'static str = "echo";
    const OPERATIONS: &'static [Operation] = &[ECHO, DELAY, FAIL];

    async fn invoke(&self, _module: &(), args: BoundArgs) -> Result<Value, ModuleError> {
        match args.operation().name {
            "echo" => Ok(args.values()[0].clone()),
            "delay" => {
                let ms: u64 = args.get(0)?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            "fail" => Err(ModuleError::failed(args.get::<String>(0)?)),
            other => Err(ModuleError::failed(format!("unhandled {other}"))),
        }
    }
}
