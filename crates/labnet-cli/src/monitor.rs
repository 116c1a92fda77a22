//! Built-in `monitor` script: polls every resolved wavemeter and publishes
//! the readings through the launch logger.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use labnet_launcher::{LaunchContext, Script};
use labnet_rpc::{Arguments, Logger, bind};
use labnet_server::{PortProbe, Server, Service, ServiceHost};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::control::{RunControl, ScriptControlService};
use crate::modules::{Units, WavemeterClient, WavemeterService};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorParams {
    pub channels: Vec<u32>,
    pub units: Units,
    pub interval_ms: u64,
    /// Stop after this many polling rounds
    pub max_readings: Option<u64>,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            channels: vec![1],
            units: Units::Frequency,
            interval_ms: 500,
            max_readings: None,
        }
    }
}

#[derive(Default)]
pub struct MonitorScript {
    control_server: Option<Server<ScriptControlService>>,
    rounds: u64,
}

impl MonitorScript {
    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    async fn start_control(&mut self, ctx: &LaunchContext, control: RunControl) -> anyhow::Result<()> {
        let mut host = ServiceHost::new(ScriptControlService);
        host.assign_module(control)?;
        host.assign_logger(Arc::new(ctx.logger().clone()));

        let mut server = Server::new(format!("{}_control", ctx.script_name()), host);
        let addr = match ctx.server_port() {
            Some(port) => server.start("127.0.0.1", port).await,
            None => server.start_probing("127.0.0.1", &PortProbe::default()).await,
        }
        .context("Failed to start script control server")?;
        info!("[{}] Control server on {}", ctx.script_name(), addr);

        self.control_server = Some(server);
        Ok(())
    }
}

impl Script for MonitorScript {
    async fn run(&mut self, ctx: &LaunchContext) -> anyhow::Result<()> {
        let params: MonitorParams = ctx.script_config()?;
        let tag = ctx.script_name().to_string();

        let mut wavemeters = Vec::new();
        for resolved in ctx.clients().iter() {
            if resolved.module_type == WavemeterService::MODULE_TYPE {
                let client = bind::<WavemeterClient>(&resolved.client)
                    .await
                    .with_context(|| format!("'{}' is not a usable wavemeter", resolved.bound))?;
                wavemeters.push((resolved.requested.clone(), client));
            }
        }
        if wavemeters.is_empty() {
            bail!("monitor needs at least one wavemeter");
        }

        let control = RunControl::new(ctx.cancellation().clone());
        self.start_control(ctx, control.clone()).await?;

        let interval = Duration::from_millis(params.interval_ms.max(1));
        loop {
            if control.is_paused() && !control.wait_until_resumed().await {
                break;
            }
            if control.is_stopped() {
                break;
            }

            let mut readings = Map::new();
            for (name, wavemeter) in &wavemeters {
                for &channel in &params.channels {
                    let value = wavemeter
                        .get_wavelength(channel, params.units)
                        .await
                        .with_context(|| format!("reading {name} channel {channel}"))?;
                    readings.insert(format!("{name}.ch{channel}"), json!(value));
                }
            }
            ctx.logger().update_data(&readings);

            if let Some(gui) = ctx.gui()
                && let Err(e) = gui
                    .notify("update", Arguments::positional([Value::Object(readings)]))
                    .await
            {
                warn!("[{}] GUI update failed: {}", tag, e);
            }

            self.rounds += 1;
            if params.max_readings.is_some_and(|max| self.rounds >= max) {
                debug!("[{}] Reached {} readings", tag, self.rounds);
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = ctx.cancellation().cancelled() => break,
            }
        }

        info!("[{}] Monitor finished after {} round(s)", tag, self.rounds);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(mut server) = self.control_server.take()
            && let Err(e) = server.shutdown().await
        {
            warn!("[{}] Control server shutdown: {}", server.name(), e);
        }
    }
}
