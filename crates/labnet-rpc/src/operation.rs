//! Operation declarations and argument binding.
//!
//! Services and typed clients share the same static [`Operation`] tables, so a
//! parameter list is written once and checked on both ends of the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::RpcError;

/// A remotely callable operation: its name and ordered parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub params: &'static [&'static str],
}

impl Operation {
    #[must_use]
    pub const fn new(name: &'static str, params: &'static [&'static str]) -> Self {
        Self { name, params }
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn info(&self) -> OperationInfo {
        OperationInfo::from(self)
    }
}

/// Owned, serializable form of [`Operation`] used by the describe handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl From<&Operation> for OperationInfo {
    fn from(op: &Operation) -> Self {
        Self {
            name: op.name.to_string(),
            params: op.params.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

impl PartialEq<Operation> for OperationInfo {
    fn eq(&self, other: &Operation) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self.params.iter().zip(other.params).all(|(a, b)| a == b)
    }
}

/// Call arguments: an ordered list or a name to value mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arguments {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::Positional(Vec::new())
    }
}

impl Arguments {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Arguments::Positional(values.into_iter().collect())
    }

    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Arguments::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Arguments::Positional(values) => values.len(),
            Arguments::Named(map) => map.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize the arguments against an operation's parameter list.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError`] on arity mismatch, unknown parameter names or
    /// missing named arguments.
    pub fn bind(self, op: &Operation) -> Result<BoundArgs, ArgumentError> {
        let values = match self {
            Arguments::Positional(values) => {
                if values.len() != op.arity() {
                    return Err(ArgumentError::Arity {
                        operation: op.name.to_string(),
                        expected: op.arity(),
                        received: values.len(),
                        params: op.params.join(", "),
                    });
                }
                values
            }
            Arguments::Named(mut map) => {
                if let Some(unknown) = map.keys().find(|k| !op.params.contains(&k.as_str())) {
                    return Err(ArgumentError::UnknownParameter {
                        operation: op.name.to_string(),
                        name: unknown.clone(),
                    });
                }
                let mut values = Vec::with_capacity(op.arity());
                for param in op.params {
                    let value = map.remove(*param).ok_or_else(|| ArgumentError::Missing {
                        operation: op.name.to_string(),
                        name: (*param).to_string(),
                    })?;
                    values.push(value);
                }
                values
            }
        };

        Ok(BoundArgs {
            operation: *op,
            values,
        })
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Arguments::Positional(values)
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Arguments::Named(map)
    }
}

/// Arguments checked against an [`Operation`], in declaration order
#[derive(Debug, Clone)]
pub struct BoundArgs {
    operation: Operation,
    values: Vec<Value>,
}

impl BoundArgs {
    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Decode the argument at `index` into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ArgumentError::Type`] naming the parameter when the value does
    /// not decode, or [`ArgumentError::Missing`] for an index past the arity.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ArgumentError> {
        let name = self.operation.params.get(index).copied().unwrap_or("?");
        let value = self.values.get(index).ok_or_else(|| ArgumentError::Missing {
            operation: self.operation.name.to_string(),
            name: name.to_string(),
        })?;
        T::deserialize(value).map_err(|e| ArgumentError::Type {
            operation: self.operation.name.to_string(),
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("operation '{operation}' expects {expected} argument(s) ({params}), received {received}")]
    Arity {
        operation: String,
        expected: usize,
        received: usize,
        params: String,
    },

    #[error("operation '{operation}' has no parameter named '{name}'")]
    UnknownParameter { operation: String, name: String },

    #[error("operation '{operation}' is missing argument '{name}'")]
    Missing { operation: String, name: String },

    #[error("operation '{operation}' argument '{name}': {reason}")]
    Type {
        operation: String,
        name: String,
        reason: String,
    },
}

impl ArgumentError {
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            ArgumentError::Arity { operation, .. }
            | ArgumentError::UnknownParameter { operation, .. }
            | ArgumentError::Missing { operation, .. }
            | ArgumentError::Type { operation, .. } => operation,
        }
    }
}

impl From<ArgumentError> for RpcError {
    fn from(err: ArgumentError) -> Self {
        RpcError::invalid_arguments(err.operation(), err.to_string())
    }
}
