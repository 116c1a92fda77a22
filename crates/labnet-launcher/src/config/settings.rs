use std::path::Path;
use std::time::Duration;

use labnet_rpc::ClientOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::connect::ConnectPolicy;
use crate::error::ConfigError;

/// Module type that marks GUI endpoints
pub const GUI_MODULE_TYPE: &str = "gui";

/// Top-level configuration. Read once per launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Addressable modules. List order is the discovery order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,

    #[serde(default)]
    pub scripts: Vec<LaunchSpec>,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub connect: ConnectSettings,

    /// Seconds a failed launch waits before the process exits
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub module_type: String,
}

impl ModuleEntry {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One script's declared requirements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    pub name: String,

    #[serde(default)]
    pub servers: Vec<ServerRequirement>,

    /// GUI module the script drives, if any
    #[serde(default)]
    pub gui: Option<String>,

    #[serde(default)]
    pub params: Map<String, Value>,

    /// Configuration name handed to the script
    #[serde(default)]
    pub config: Option<String>,

    /// Port for the script's own server; probed when absent
    #[serde(default)]
    pub server_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRequirement {
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: String,
}

impl ServerRequirement {
    pub fn new(name: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_type: module_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_grace_period() -> u64 {
    15
}

impl Config {
    /// Load and validate config from file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config.json");
        Self::from_json(&content, name)
    }

    /// Parse and validate config from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str, config_name: &str) -> Result<Self, ConfigError> {
        super::validation::warn_unknown_fields(content, config_name);
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check names and uniqueness, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` listing all problems found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let problems = super::validation::collect_problems(self);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Modules of `module_type`, in configuration order.
    pub fn modules_of_type<'a>(
        &'a self,
        module_type: &'a str,
    ) -> impl Iterator<Item = &'a ModuleEntry> + 'a {
        self.modules
            .iter()
            .filter(move |m| m.module_type == module_type)
    }

    /// Entries that could satisfy a requirement: the entry with the requested
    /// name first (when its type matches), then the others of that type.
    #[must_use]
    pub fn candidates<'a>(&'a self, name: &str, module_type: &str) -> Vec<&'a ModuleEntry> {
        let mut candidates: Vec<&'a ModuleEntry> = self
            .module(name)
            .filter(|m| m.module_type == module_type)
            .into_iter()
            .collect();
        candidates.extend(
            self.modules
                .iter()
                .filter(|m| m.module_type == module_type && m.name != name),
        );
        candidates
    }

    /// # Errors
    ///
    /// Returns `ConfigError::UnknownScript` listing the configured scripts.
    pub fn script(&self, name: &str) -> Result<&LaunchSpec, ConfigError> {
        self.scripts
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownScript {
                name: name.to_string(),
                available: self.scripts.iter().map(|s| s.name.clone()).collect(),
            })
    }

    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::with_timeout(Duration::from_millis(self.client.timeout_ms))
    }

    #[must_use]
    pub fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy::new(
            self.connect.max_attempts,
            Duration::from_millis(self.connect.initial_delay_ms),
            Duration::from_millis(self.connect.max_delay_ms),
        )
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}
