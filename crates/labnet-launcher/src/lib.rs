//! Configuration, client discovery and script launching.
//!
//! A launch reads a [`Config`], picks one script's [`LaunchSpec`], connects a
//! client for every module the script declares and hands them to the script
//! through a [`LaunchContext`]:
//!
//! ```no_run
//! use labnet_launcher::{Config, LaunchContext, Launcher, Script};
//!
//! struct Monitor;
//!
//! impl Script for Monitor {
//!     async fn run(&mut self, ctx: &LaunchContext) -> anyhow::Result<()> {
//!         let wavemeter = ctx.client("wavemeter1")?;
//!         let _ = wavemeter;
//!         ctx.cancellation().cancelled().await;
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load(std::path::Path::new("lab.json"))?;
//! let mut launcher = Launcher::from_config(config, "monitor")?;
//! launcher.run(&mut Monitor).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connect;
pub mod error;
pub mod launcher;
pub mod registry;

pub use config::{
    ClientSettings, Config, ConnectSettings, GUI_MODULE_TYPE, LaunchSpec, ModuleEntry,
    ServerRequirement, default_config_path, is_valid_name, resolve_config_path,
};
pub use connect::{ConnectFailure, ConnectPolicy, connect_with_backoff};
pub use error::{ConfigError, LaunchError, MissingDependency, ResolveError, Result};
pub use launcher::{LaunchContext, LaunchState, Launcher, ResolvedClient, ResolvedClients, Script};
pub use registry::{ClientRegistry, find_client};
