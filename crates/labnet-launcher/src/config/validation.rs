//! Config validation: unknown fields warn, bad names fail.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::settings::Config;

static NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").ok());

/// Whether `name` is usable as a logical module or script name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(name))
}

/// Validate JSON config and warn about unknown fields.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    let expected = expected_config_keys();
    for path in find_unknown_keys(&value, &expected, "") {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Find unknown keys in JSON value compared to expected keys.
/// List elements are checked against the same expected keys.
fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let mut unknowns = Vec::new();

    match value {
        Value::Object(obj) => {
            for (key, child) in obj {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };

                if let Some(nested) = expected.nested.get(key.as_str()) {
                    unknowns.extend(find_unknown_keys(child, nested, &path));
                } else if !expected.fields.contains(key.as_str()) {
                    unknowns.push(path);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                unknowns.extend(find_unknown_keys(item, expected, &format!("{prefix}[{i}]")));
            }
        }
        _ => {}
    }

    unknowns
}

struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }
}

fn expected_config_keys() -> ExpectedKeys {
    let module_keys = ExpectedKeys::new(&["name", "host", "port", "type"]);
    let requirement_keys = ExpectedKeys::new(&["name", "type"]);
    let script_keys = ExpectedKeys::new(&["name", "gui", "params", "config", "serverPort"])
        .with_nested("servers", requirement_keys);
    let client_keys = ExpectedKeys::new(&["timeoutMs"]);
    let connect_keys = ExpectedKeys::new(&["maxAttempts", "initialDelayMs", "maxDelayMs"]);

    ExpectedKeys::new(&["gracePeriodSecs"])
        .with_nested("modules", module_keys)
        .with_nested("scripts", script_keys)
        .with_nested("client", client_keys)
        .with_nested("connect", connect_keys)
}

/// Every structural problem in `config`, in file order.
pub(crate) fn collect_problems(config: &Config) -> Vec<String> {
    let mut problems = Vec::new();

    let mut seen = HashSet::new();
    for module in &config.modules {
        if !is_valid_name(&module.name) {
            problems.push(format!("invalid module name '{}'", module.name));
        }
        if !seen.insert(module.name.as_str()) {
            problems.push(format!("duplicate module name '{}'", module.name));
        }
        if module.module_type.trim().is_empty() {
            problems.push(format!("module '{}' has an empty type", module.name));
        }
        if module.host.trim().is_empty() {
            problems.push(format!("module '{}' has an empty host", module.name));
        }
    }

    let mut seen = HashSet::new();
    for script in &config.scripts {
        if !is_valid_name(&script.name) {
            problems.push(format!("invalid script name '{}'", script.name));
        }
        if !seen.insert(script.name.as_str()) {
            problems.push(format!("duplicate script name '{}'", script.name));
        }
        for requirement in &script.servers {
            if !is_valid_name(&requirement.name) {
                problems.push(format!(
                    "script '{}' requires invalid module name '{}'",
                    script.name, requirement.name
                ));
            }
        }
        if let Some(gui) = &script.gui
            && !is_valid_name(gui)
        {
            problems.push(format!(
                "script '{}' has invalid gui name '{gui}'",
                script.name
            ));
        }
    }

    if config.connect.max_attempts == 0 {
        problems.push("connect.maxAttempts must be at least 1".to_string());
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("wavemeter1"));
        assert!(is_valid_name("_scope.main-2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1scope"));
        assert!(!is_valid_name("scope one"));
        assert!(!is_valid_name("scope/1"));
    }

    #[test]
    fn test_find_unknown_keys_in_lists() {
        let value = json!({
            "modules": [{"name": "wm1", "port": 1, "type": "wavemeter", "baud": 9600}],
            "scripts": [{"name": "m", "servers": [{"name": "wm1", "type": "x", "opt": 1}]}],
            "colour": "blue"
        });
        let mut unknowns = find_unknown_keys(&value, &expected_config_keys(), "");
        unknowns.sort();
        assert_eq!(
            unknowns,
            vec!["colour", "modules[0].baud", "scripts[0].servers[0].opt"]
        );
    }

    #[test]
    fn test_known_config_has_no_unknown_keys() {
        let value = json!({
            "modules": [{"name": "wm1", "host": "h", "port": 1, "type": "wavemeter"}],
            "scripts": [{"name": "m", "servers": [], "gui": null, "params": {"anything": 1},
                         "config": "c", "serverPort": null}],
            "client": {"timeoutMs": 1},
            "connect": {"maxAttempts": 1, "initialDelayMs": 1, "maxDelayMs": 1},
            "gracePeriodSecs": 1
        });
        assert!(find_unknown_keys(&value, &expected_config_keys(), "").is_empty());
    }

    #[test]
    fn test_unknown_fields_do_not_fail_loading() {
        let config =
            Config::from_json(r#"{"modules": [], "legacyOption": true}"#, "c.json").unwrap();
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_problems_are_collected_together() {
        let err = Config::from_json(
            r#"{
                "modules": [
                    {"name": "wm1", "port": 1, "type": "wavemeter"},
                    {"name": "wm1", "port": 2, "type": "wavemeter"},
                    {"name": "bad name", "port": 3, "type": "counter"}
                ],
                "scripts": [{"name": "monitor", "servers": [{"name": "9x", "type": "counter"}]}]
            }"#,
            "c.json",
        )
        .unwrap_err();

        let crate::error::ConfigError::Invalid { problems } = err else {
            panic!("Expected Invalid");
        };
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("duplicate module name 'wm1'"));
        assert!(problems[1].contains("invalid module name 'bad name'"));
        assert!(problems[2].contains("'9x'"));
    }
}
