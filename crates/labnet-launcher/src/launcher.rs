//! One script run: resolve its dependencies, hand them over, unwind.
//!
//! ```text
//! Configured -> Resolving -> Running -> Stopped
//!                   |           |
//!                   +-> Failed <+
//! ```
//!
//! A launch never hands a partial set of clients to a script. When any
//! requirement is left unbound the launch fails with every missing dependency
//! listed, and clients connected while resolving are closed again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use labnet_rpc::{ClientOptions, LogHandler, Logger, RpcClient};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, GUI_MODULE_TYPE, LaunchSpec, ModuleEntry, ServerRequirement};
use crate::connect::{ConnectPolicy, connect_with_backoff};
use crate::error::{ConfigError, LaunchError, MissingDependency, ResolveError, Result};
use crate::registry::ClientRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Configured,
    Resolving,
    Running,
    Stopped,
    Failed { reason: String },
}

impl LaunchState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchState::Stopped | LaunchState::Failed { .. })
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::Configured => write!(f, "configured"),
            LaunchState::Resolving => write!(f, "resolving"),
            LaunchState::Running => write!(f, "running"),
            LaunchState::Stopped => write!(f, "stopped"),
            LaunchState::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// A requirement and the module that satisfied it
#[derive(Debug, Clone)]
pub struct ResolvedClient {
    /// Name the script asked for
    pub requested: String,
    /// Configured module the client is connected to
    pub bound: String,
    pub module_type: String,
    pub client: RpcClient,
}

/// Resolved clients in declaration order, looked up by requested name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedClients {
    entries: Vec<ResolvedClient>,
}

impl ResolvedClients {
    #[must_use]
    pub fn get(&self, requested: &str) -> Option<&RpcClient> {
        self.entry(requested).map(|e| &e.client)
    }

    #[must_use]
    pub fn entry(&self, requested: &str) -> Option<&ResolvedClient> {
        self.entries.iter().find(|e| e.requested == requested)
    }

    /// Requested names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.requested.as_str()).collect()
    }

    /// `(requested, bound)` pairs in declaration order.
    #[must_use]
    pub fn bindings(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.requested.as_str(), e.bound.as_str()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedClient> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a script receives from the launcher.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    logger: LogHandler,
    clients: ResolvedClients,
    gui: Option<RpcClient>,
    params: Map<String, Value>,
    server_port: Option<u16>,
    config_name: String,
    script_name: String,
    cancel: CancellationToken,
}

impl LaunchContext {
    pub fn logger(&self) -> &LogHandler {
        &self.logger
    }

    pub fn clients(&self) -> &ResolvedClients {
        &self.clients
    }

    /// Client resolved for `requested`.
    ///
    /// # Errors
    ///
    /// Fails if the script did not declare `requested`.
    pub fn client(&self, requested: &str) -> anyhow::Result<&RpcClient> {
        self.clients.get(requested).ok_or_else(|| {
            anyhow::anyhow!(
                "'{}' was not declared by script '{}'",
                requested,
                self.script_name
            )
        })
    }

    pub fn gui(&self) -> Option<&RpcClient> {
        self.gui.as_ref()
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Port for the script's own server, or `None` to probe one.
    pub fn server_port(&self) -> Option<u16> {
        self.server_port
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Token cancelled when the run is asked to stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deserialize the script parameters into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::Params` if the parameters do not fit `T`.
    pub fn script_config<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|source| {
            LaunchError::Params {
                script: self.script_name.clone(),
                source,
            }
        })
    }
}

/// A launchable script. The launcher is its only caller.
pub trait Script: Send {
    /// Script body. Returns when the script is done or its context is cancelled.
    fn run(&mut self, ctx: &LaunchContext) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Release what the script started itself, such as its own server.
    /// Called after `run` returns and before the launcher closes any client.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Resolves and runs one script.
#[derive(Debug)]
pub struct Launcher {
    config: Config,
    spec: LaunchSpec,
    tag: String,
    state: LaunchState,
    logger: LogHandler,
    connect_policy: ConnectPolicy,
    client_options: ClientOptions,
    registry: ClientRegistry,
    resolved: Option<ResolvedClients>,
    gui: Option<RpcClient>,
    cancel: CancellationToken,
}

impl Launcher {
    #[must_use]
    pub fn new(config: Config, spec: LaunchSpec) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        let tag = format!("{}#{}", spec.name, &run_id[..8]);
        Self {
            connect_policy: config.connect_policy(),
            client_options: config.client_options(),
            config,
            spec,
            tag,
            state: LaunchState::Configured,
            logger: LogHandler::default(),
            registry: ClientRegistry::new(),
            resolved: None,
            gui: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Launcher for the script `script_name` declared in `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownScript` if no such script is declared.
    pub fn from_config(config: Config, script_name: &str) -> std::result::Result<Self, ConfigError> {
        let spec = config.script(script_name)?.clone();
        Ok(Self::new(config, spec))
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger.set(logger);
        self
    }

    #[must_use]
    pub fn with_connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.connect_policy = policy;
        self
    }

    /// Start from clients created elsewhere, e.g. by a parent launcher.
    /// The launcher owns them from here on.
    #[must_use]
    pub fn with_registry(mut self, registry: ClientRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn state(&self) -> &LaunchState {
        &self.state
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn resolved(&self) -> Option<&ResolvedClients> {
        self.resolved.as_ref()
    }

    /// Handle that stops a running script when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn expect_state(&self, expected: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(LaunchError::InvalidState {
                state: self.state.to_string(),
                expected,
            })
        }
    }

    /// Requirements in declaration order, the GUI slot last.
    fn requirements(&self) -> Vec<ServerRequirement> {
        let mut requirements = self.spec.servers.clone();
        if let Some(gui) = &self.spec.gui {
            requirements.push(ServerRequirement::new(gui.clone(), GUI_MODULE_TYPE));
        }
        requirements
    }

    /// Bind every requirement to a connected client.
    ///
    /// A requirement naming a configured module of its type is bound to that
    /// module. The rest fall back by type to the first module in configuration
    /// order that no other requirement holds. Clients already in the registry
    /// are used as they are. Others are connected with backoff and checked
    /// against the configured module type.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::Resolve` listing every missing dependency, after
    /// closing the clients connected during this call. The launcher is then
    /// `Failed`.
    pub async fn resolve(&mut self) -> Result<&ResolvedClients> {
        self.expect_state("configured", self.state == LaunchState::Configured)?;
        self.state = LaunchState::Resolving;
        let requirements = self.requirements();
        info!(
            "[{}] Resolving {} requirement(s) for config '{}'",
            self.tag,
            requirements.len(),
            self.config_name()
        );

        let mut acquired = Vec::new();
        let mut unreachable = HashMap::new();
        let mut bound: Vec<Option<String>> = vec![None; requirements.len()];

        // A requirement naming a configured module claims it before any
        // requirement falls back by type.
        for (slot, requirement) in bound.iter_mut().zip(&requirements) {
            let Some(entry) = self
                .config
                .module(&requirement.name)
                .filter(|m| m.module_type == requirement.module_type)
                .cloned()
            else {
                continue;
            };
            if self.obtain(&entry, &mut acquired, &mut unreachable).await.is_ok() {
                *slot = Some(entry.name);
            }
        }

        let mut failures = Vec::new();
        for index in 0..requirements.len() {
            if bound[index].is_some() {
                continue;
            }
            let taken: HashSet<String> = bound.iter().flatten().cloned().collect();
            match self
                .bind_by_type(&requirements[index], &taken, &mut acquired, &mut unreachable)
                .await
            {
                Ok(name) => bound[index] = Some(name),
                Err(reason) => failures.push((index, reason)),
            }
        }

        let mut resolved = ResolvedClients::default();
        let mut gui = None;
        let mut missing = Vec::new();
        let gui_name = self.spec.gui.clone();
        for (index, requirement) in requirements.iter().enumerate() {
            let is_gui = requirement.module_type == GUI_MODULE_TYPE
                && gui_name.as_deref() == Some(requirement.name.as_str());
            let client = bound[index]
                .as_deref()
                .and_then(|name| Some((name, self.registry.get(name)?)));
            match client {
                Some((name, client)) if is_gui => {
                    debug!("[{}] GUI '{}' bound to '{}'", self.tag, requirement.name, name);
                    gui = Some(client.clone());
                }
                Some((name, client)) => {
                    debug!("[{}] '{}' bound to '{}'", self.tag, requirement.name, name);
                    resolved.entries.push(ResolvedClient {
                        requested: requirement.name.clone(),
                        bound: name.to_string(),
                        module_type: requirement.module_type.clone(),
                        client: client.clone(),
                    });
                }
                None => {
                    let reason = failures
                        .iter()
                        .find(|(i, _)| *i == index)
                        .map_or_else(
                            || "client closed while resolving".to_string(),
                            |(_, reason)| reason.clone(),
                        );
                    missing.push(MissingDependency {
                        name: requirement.name.clone(),
                        module_type: requirement.module_type.clone(),
                        reason,
                    });
                }
            }
        }

        if !missing.is_empty() {
            let err = ResolveError::Missing { missing };
            error!("[{}] {}", self.tag, err);
            self.logger.error(&format!("{}: {}", self.spec.name, err));
            for name in acquired.iter().rev() {
                if let Some(client) = self.registry.remove(name) {
                    client.close().await;
                }
            }
            self.state = LaunchState::Failed {
                reason: err.to_string(),
            };
            return Err(err.into());
        }

        info!(
            "[{}] Resolved {}",
            self.tag,
            resolved
                .bindings()
                .iter()
                .map(|(requested, bound)| format!("{requested}={bound}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.gui = gui;
        Ok(&*self.resolved.insert(resolved))
    }

    /// Bind `requirement` to the first configured candidate of its type that
    /// no other requirement holds, connecting it if needed.
    async fn bind_by_type(
        &mut self,
        requirement: &ServerRequirement,
        taken: &HashSet<String>,
        acquired: &mut Vec<String>,
        unreachable: &mut HashMap<String, String>,
    ) -> std::result::Result<String, String> {
        let candidates: Vec<ModuleEntry> = self
            .config
            .candidates(&requirement.name, &requirement.module_type)
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(format!(
                "no module of type '{}' configured",
                requirement.module_type
            ));
        }

        let mut reasons = Vec::new();
        for entry in candidates {
            if taken.contains(&entry.name) {
                reasons.push(format!("{}: bound to another requirement", entry.name));
                continue;
            }
            match self.obtain(&entry, acquired, unreachable).await {
                Ok(()) => {
                    if entry.name != requirement.name {
                        debug!(
                            "[{}] '{}' falls back by type '{}' to '{}'",
                            self.tag, requirement.name, requirement.module_type, entry.name
                        );
                    }
                    return Ok(entry.name);
                }
                Err(reason) => reasons.push(format!("{}: {}", entry.name, reason)),
            }
        }
        Err(reasons.join("; "))
    }

    /// Make sure `entry` has a client in the registry. A module that failed
    /// once is not retried within the same resolution.
    async fn obtain(
        &mut self,
        entry: &ModuleEntry,
        acquired: &mut Vec<String>,
        unreachable: &mut HashMap<String, String>,
    ) -> std::result::Result<(), String> {
        if self.registry.contains(&entry.name) {
            return Ok(());
        }
        if let Some(reason) = unreachable.get(&entry.name) {
            return Err(reason.clone());
        }
        match self.connect_checked(entry).await {
            Ok(client) => {
                self.registry.insert(entry.name.clone(), client);
                acquired.push(entry.name.clone());
                Ok(())
            }
            Err(reason) => {
                unreachable.insert(entry.name.clone(), reason.clone());
                Err(reason)
            }
        }
    }

    /// Connect to `entry` and check the server hosts the configured type.
    async fn connect_checked(&self, entry: &ModuleEntry) -> std::result::Result<RpcClient, String> {
        let client = connect_with_backoff(entry, &self.connect_policy, &self.client_options)
            .await
            .map_err(|e| e.to_string())?;

        match client.describe().await {
            Ok(description) if description.module_type == entry.module_type => Ok(client),
            Ok(description) => {
                warn!(
                    "[{}] '{}' at {} hosts '{}', configured as '{}'",
                    self.tag,
                    entry.name,
                    entry.addr(),
                    description.module_type,
                    entry.module_type
                );
                client.close().await;
                Err(format!(
                    "server hosts '{}', configured as '{}'",
                    description.module_type, entry.module_type
                ))
            }
            Err(e) => {
                client.close().await;
                Err(format!("describe failed: {e}"))
            }
        }
    }

    fn config_name(&self) -> &str {
        self.spec.config.as_deref().unwrap_or(&self.spec.name)
    }

    /// Resolve if needed, then run `script` to completion and unwind.
    ///
    /// # Errors
    ///
    /// Resolution errors are returned without invoking the script. A script
    /// error is returned as `LaunchError::Script` after unwinding.
    pub async fn run<S: Script>(&mut self, script: &mut S) -> Result<()> {
        if self.state == LaunchState::Configured {
            self.resolve().await?;
        }
        self.expect_state(
            "resolved",
            self.state == LaunchState::Resolving && self.resolved.is_some(),
        )?;

        let ctx = LaunchContext {
            logger: self.logger.clone(),
            clients: self.resolved.clone().unwrap_or_default(),
            gui: self.gui.clone(),
            params: self.spec.params.clone(),
            server_port: self.spec.server_port,
            config_name: self.config_name().to_string(),
            script_name: self.spec.name.clone(),
            cancel: self.cancel.clone(),
        };

        self.state = LaunchState::Running;
        info!("[{}] Running", self.tag);
        let outcome = script.run(&ctx).await;
        drop(ctx);

        debug!("[{}] Script returned, unwinding", self.tag);
        script.shutdown().await;
        self.cancel.cancel();
        self.release().await;

        match outcome {
            Ok(()) => {
                info!("[{}] Stopped", self.tag);
                self.state = LaunchState::Stopped;
                Ok(())
            }
            Err(source) => {
                let err = LaunchError::Script {
                    script: self.spec.name.clone(),
                    source,
                };
                error!("[{}] {}", self.tag, err);
                self.logger.error(&err.to_string());
                self.state = LaunchState::Failed {
                    reason: err.to_string(),
                };
                Err(err)
            }
        }
    }

    /// Close the GUI and every client without running the script.
    /// Used after a dry-run resolution.
    pub async fn release(&mut self) {
        if let Some(gui) = self.gui.take() {
            debug!("[{}] Closing GUI connection", self.tag);
            gui.close().await;
        }
        self.resolved = None;
        self.registry.close_all().await;
        if !self.state.is_terminal() {
            self.state = LaunchState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> Config {
        Config::from_json(json, "test.json").unwrap()
    }

    struct NeverRun;

    impl Script for NeverRun {
        async fn run(&mut self, _ctx: &LaunchContext) -> anyhow::Result<()> {
            panic!("script must not run");
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LaunchState::Configured.to_string(), "configured");
        let failed = LaunchState::Failed {
            reason: "boom".into(),
        };
        assert_eq!(failed.to_string(), "failed (boom)");
        assert!(failed.is_terminal());
        assert!(!LaunchState::Running.is_terminal());
    }

    #[test]
    fn test_from_config_unknown_script() {
        let config = config(r#"{"scripts": [{"name": "monitor"}]}"#);
        let err = Launcher::from_config(config, "sweep").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownScript { .. }));
    }

    #[test]
    fn test_requirements_put_gui_last() {
        let config = config(
            r#"{"scripts": [{"name": "monitor", "gui": "panel",
                "servers": [{"name": "wm1", "type": "wavemeter"}]}]}"#,
        );
        let launcher = Launcher::from_config(config, "monitor").unwrap();
        let requirements = launcher.requirements();
        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[1], ServerRequirement::new("panel", GUI_MODULE_TYPE));
        assert_eq!(launcher.config_name(), "monitor");
    }

    #[tokio::test]
    async fn test_unconfigured_requirement_fails_without_running() {
        let config = config(
            r#"{"modules": [{"name": "dmm1", "port": 1, "type": "multimeter"}],
                "scripts": [{"name": "scan",
                             "servers": [{"name": "scope1", "type": "oscilloscope"}]}]}"#,
        );
        let mut launcher = Launcher::from_config(config, "scan").unwrap();

        let err = launcher.run(&mut NeverRun).await.unwrap_err();
        assert!(err.is_resolution());
        let msg = err.to_string();
        assert!(msg.contains("scope1"));
        assert!(msg.contains("oscilloscope"));
        assert!(matches!(launcher.state(), LaunchState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_resolve_twice_is_rejected() {
        let config = config(r#"{"scripts": [{"name": "idle"}]}"#);
        let mut launcher = Launcher::from_config(config, "idle").unwrap();
        assert!(launcher.resolve().await.unwrap().is_empty());

        let err = launcher.resolve().await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::InvalidState { expected: "configured", .. }
        ));
    }

    #[tokio::test]
    async fn test_script_config_reports_bad_params() {
        #[derive(serde::Deserialize)]
        struct Params {
            #[allow(dead_code)]
            channel: u32,
        }

        let config = config(r#"{"scripts": [{"name": "idle", "params": {"channel": "one"}}]}"#);
        let mut launcher = Launcher::from_config(config, "idle").unwrap();

        struct ReadParams;
        impl Script for ReadParams {
            async fn run(&mut self, ctx: &LaunchContext) -> anyhow::Result<()> {
                ctx.script_config::<Params>()?;
                Ok(())
            }
        }

        let err = launcher.run(&mut ReadParams).await.unwrap_err();
        assert!(err.to_string().contains("Invalid parameters for script 'idle'"));
        assert!(matches!(launcher.state(), LaunchState::Failed { .. }));
    }
}
