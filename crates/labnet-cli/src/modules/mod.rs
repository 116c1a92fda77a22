//! Simulated instruments `labnet serve` can host.

mod counter;
mod echo;
mod wavemeter;

use std::sync::Arc;

use labnet_launcher::ModuleEntry;
use labnet_rpc::TracingLogger;
use labnet_server::{PortProbe, Server, ServerError, Service, ServiceHost};
use tracing::{info, warn};

pub use counter::{CounterService, SimCounter};
pub use echo::EchoService;
pub use wavemeter::{SimWavemeter, Units, WavemeterClient, WavemeterService};

pub const MODULE_TYPES: &[&str] = &[
    WavemeterService::MODULE_TYPE,
    CounterService::MODULE_TYPE,
    EchoService::MODULE_TYPE,
];

/// Host the simulated module configured as `entry` until interrupted.
/// `None` means no simulation exists for the entry's type.
pub async fn serve(entry: &ModuleEntry, probe: bool) -> Option<Result<(), ServerError>> {
    let outcome = match entry.module_type.as_str() {
        "wavemeter" => host(entry, WavemeterService, SimWavemeter::default(), probe).await,
        "counter" => host(entry, CounterService, SimCounter::default(), probe).await,
        "echo" => host(entry, EchoService, (), probe).await,
        _ => return None,
    };
    Some(outcome)
}

async fn host<S: Service>(
    entry: &ModuleEntry,
    service: S,
    module: S::Module,
    probe: bool,
) -> Result<(), ServerError> {
    let mut host = ServiceHost::new(service);
    host.assign_module(module)?;
    host.assign_logger(Arc::new(TracingLogger::new(entry.name.clone())));

    let mut server = Server::new(entry.name.clone(), host);
    let addr = if probe {
        server.start_probing(&entry.host, &PortProbe::default()).await?
    } else {
        server.start(&entry.host, entry.port).await?
    };
    info!("[{}] Hosting simulated {} on {}", entry.name, S::MODULE_TYPE, addr);

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[{}] Ctrl-C handler failed: {}", entry.name, e);
    }
    info!("[{}] Shutting down", entry.name);
    server.shutdown().await
}
