use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Default configuration file (`<config dir>/labnet/config.json`).
///
/// # Errors
///
/// Returns `ConfigError::NoConfigDir` if no home directory can be determined.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let project = ProjectDirs::from("", "", "labnet").ok_or(ConfigError::NoConfigDir)?;
    Ok(project.config_dir().join("config.json"))
}

/// Use `explicit` if given, otherwise the default location.
///
/// # Errors
///
/// See [`default_config_path`].
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(path),
        None => default_config_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("/tmp/lab.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/lab.json"));
    }

    #[test]
    fn test_default_path_ends_with_config_json() {
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("config.json"));
        }
    }
}
