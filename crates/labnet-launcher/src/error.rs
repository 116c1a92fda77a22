//! Error types for configuration, discovery and launching.

use std::fmt;
use std::path::PathBuf;

use labnet_rpc::ClientError;

/// Errors loading or validating a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },

    #[error("No script named '{name}' (available: {})", .available.join(", "))]
    UnknownScript {
        name: String,
        available: Vec<String>,
    },

    #[error("No module named '{0}'")]
    UnknownModule(String),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

/// One requirement that could not be bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub name: String,
    pub module_type: String,
    pub reason: String,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.module_type, self.reason)
    }
}

/// Errors turning requirements into clients
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "No client for '{name}' of type '{module_type}' (available: {})",
        format_names(.available)
    )]
    ClientNotFound {
        name: String,
        module_type: String,
        available: Vec<String>,
    },

    #[error("Missing {}", describe_missing(.missing))]
    Missing { missing: Vec<MissingDependency> },
}

impl ResolveError {
    /// Requirements that failed, in declaration order.
    #[must_use]
    pub fn missing(&self) -> Vec<MissingDependency> {
        match self {
            ResolveError::ClientNotFound {
                name, module_type, ..
            } => vec![MissingDependency {
                name: name.clone(),
                module_type: module_type.clone(),
                reason: "no matching client".to_string(),
            }],
            ResolveError::Missing { missing } => missing.clone(),
        }
    }
}

fn describe_missing(missing: &[MissingDependency]) -> String {
    let noun = if missing.len() == 1 {
        "dependency"
    } else {
        "dependencies"
    };
    let list: Vec<String> = missing.iter().map(ToString::to_string).collect();
    format!("{} {}: {}", missing.len(), noun, list.join("; "))
}

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Errors from one launch
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Launcher is {state}, expected {expected}")]
    InvalidState {
        state: String,
        expected: &'static str,
    },

    #[error("Invalid parameters for script '{script}': {source}")]
    Params {
        script: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Script '{script}' failed: {source:#}")]
    Script {
        script: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LaunchError {
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, LaunchError::Resolve(_))
    }
}

pub type Result<T> = std::result::Result<T, LaunchError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn missing(name: &str, module_type: &str) -> MissingDependency {
        MissingDependency {
            name: name.to_string(),
            module_type: module_type.to_string(),
            reason: "not configured".to_string(),
        }
    }

    #[test]
    fn test_client_not_found_lists_available() {
        let err = ResolveError::ClientNotFound {
            name: "scope1".into(),
            module_type: "oscilloscope".into(),
            available: vec!["dmm1".into(), "wm1".into()],
        };
        assert_eq!(
            err.to_string(),
            "No client for 'scope1' of type 'oscilloscope' (available: dmm1, wm1)"
        );
    }

    #[test]
    fn test_client_not_found_without_clients() {
        let err = ResolveError::ClientNotFound {
            name: "scope1".into(),
            module_type: "oscilloscope".into(),
            available: vec![],
        };
        assert!(err.to_string().ends_with("(available: none)"));
        assert_eq!(err.missing()[0].name, "scope1");
    }

    #[test]
    fn test_missing_is_aggregated() {
        let err = ResolveError::Missing {
            missing: vec![missing("scope1", "oscilloscope"), missing("wm1", "wavemeter")],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Missing 2 dependencies"));
        assert!(msg.contains("scope1 (oscilloscope): not configured"));
        assert!(msg.contains("wm1 (wavemeter)"));

        let single = ResolveError::Missing {
            missing: vec![missing("scope1", "oscilloscope")],
        };
        assert!(single.to_string().starts_with("Missing 1 dependency:"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            problems: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid configuration: a; b");

        let err = ConfigError::UnknownScript {
            name: "sweep".into(),
            available: vec!["monitor".into()],
        };
        assert!(err.to_string().contains("available: monitor"));
    }

    #[test]
    fn test_launch_error_wraps_resolution() {
        let err: LaunchError = ResolveError::Missing {
            missing: vec![missing("scope1", "oscilloscope")],
        }
        .into();
        assert!(err.is_resolution());
        assert!(err.to_string().starts_with("Resolution failed"));

        let err = LaunchError::Script {
            script: "monitor".into(),
            source: anyhow::anyhow!("lost lock"),
        };
        assert!(!err.is_resolution());
        assert!(err.to_string().contains("lost lock"));
    }
}
