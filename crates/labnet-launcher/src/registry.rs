//! Client registry and discovery.
//!
//! The registry is the name table of already connected clients. It is filled
//! while resolving and read-only afterwards; a new configuration means a new
//! registry and a new resolution.

use labnet_rpc::RpcClient;
use tracing::debug;

use crate::config::Config;
use crate::error::ResolveError;

/// Connected clients keyed by logical module name, in insertion order.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<(String, RpcClient)>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` under `name`, returning a client it replaced.
    pub fn insert(&mut self, name: impl Into<String>, client: RpcClient) -> Option<RpcClient> {
        let name = name.into();
        if let Some(slot) = self.clients.iter_mut().find(|(n, _)| *n == name) {
            return Some(std::mem::replace(&mut slot.1, client));
        }
        self.clients.push((name, client));
        None
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RpcClient> {
        self.clients
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, client)| client)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<RpcClient> {
        let index = self.clients.iter().position(|(n, _)| n == name)?;
        Some(self.clients.remove(index).1)
    }

    /// Registered names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.clients.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RpcClient)> {
        self.clients.iter().map(|(n, c)| (n.as_str(), c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close and drop every client, newest first.
    pub async fn close_all(&mut self) {
        while let Some((name, client)) = self.clients.pop() {
            debug!("[{}] Closing client", name);
            client.close().await;
        }
    }
}

/// Find the client for a logical module name and expected type.
///
/// The client registered under `name` wins if the configuration declares it
/// with `module_type`. Otherwise the first configured module of that type with
/// a registered client is used, in configuration order. A client is never
/// returned for a module configured with a different type.
///
/// # Errors
///
/// Returns `ResolveError::ClientNotFound` naming the request and listing the
/// registered names.
pub fn find_client<'a>(
    registry: &'a ClientRegistry,
    config: &Config,
    name: &str,
    module_type: &str,
) -> Result<(&'a str, &'a RpcClient), ResolveError> {
    for entry in config.candidates(name, module_type) {
        if let Some((bound, client)) = registry.iter().find(|(n, _)| *n == entry.name) {
            if bound != name {
                debug!(
                    "[{}] Resolved by type '{}' to '{}'",
                    name, module_type, bound
                );
            }
            return Ok((bound, client));
        }
    }

    Err(ResolveError::ClientNotFound {
        name: name.to_string(),
        module_type: module_type.to_string(),
        available: registry.names(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleEntry;
    use labnet_rpc::ClientOptions;
    use tokio::net::TcpListener;

    fn config(modules: &[(&str, &str)]) -> Config {
        Config {
            modules: modules
                .iter()
                .enumerate()
                .map(|(i, (name, module_type))| ModuleEntry {
                    name: (*name).to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 5000 + u16::try_from(i).unwrap(),
                    module_type: (*module_type).to_string(),
                })
                .collect(),
            ..Config::default()
        }
    }

    /// A registry with one live client per name, all pointing at a local listener.
    async fn registry(names: &[&str]) -> (ClientRegistry, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut registry = ClientRegistry::new();
        for name in names {
            let client = RpcClient::connect_addr(addr, ClientOptions::default())
                .await
                .unwrap();
            registry.insert(*name, client);
        }
        (registry, listener)
    }

    #[tokio::test]
    async fn test_exact_name_match() {
        let config = config(&[("wm1", "wavemeter"), ("wm2", "wavemeter")]);
        let (registry, _listener) = registry(&["wm1", "wm2"]).await;

        let (bound, _) = find_client(&registry, &config, "wm2", "wavemeter").unwrap();
        assert_eq!(bound, "wm2");
    }

    #[tokio::test]
    async fn test_type_fallback_is_first_in_config_order() {
        let config = config(&[("ctr1", "counter"), ("wm_b", "wavemeter"), ("wm_a", "wavemeter")]);
        // Registry order differs from config order on purpose
        let (registry, _listener) = registry(&["wm_a", "wm_b", "ctr1"]).await;

        let (bound, _) = find_client(&registry, &config, "wavemeter_main", "wavemeter").unwrap();
        assert_eq!(bound, "wm_b");
    }

    #[tokio::test]
    async fn test_wrong_type_is_never_returned() {
        let config = config(&[("dmm1", "multimeter")]);
        let (registry, _listener) = registry(&["dmm1"]).await;

        let err = find_client(&registry, &config, "dmm1", "oscilloscope").unwrap_err();
        let ResolveError::ClientNotFound {
            name,
            module_type,
            available,
        } = err
        else {
            panic!("Expected ClientNotFound");
        };
        assert_eq!(name, "dmm1");
        assert_eq!(module_type, "oscilloscope");
        assert_eq!(available, vec!["dmm1"]);
    }

    #[tokio::test]
    async fn test_unconfigured_client_is_not_matched() {
        let config = config(&[]);
        let (registry, _listener) = registry(&["scope1"]).await;
        assert!(find_client(&registry, &config, "scope1", "oscilloscope").is_err());
    }

    #[tokio::test]
    async fn test_insert_replace_and_remove() {
        let (mut registry, _listener) = registry(&["a", "b"]).await;
        let extra = registry.remove("a").unwrap();
        assert_eq!(registry.names(), vec!["b"]);

        assert!(registry.insert("b", extra).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("b"));
        assert!(registry.remove("missing").is_none());
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let (mut registry, _listener) = registry(&["a", "b"]).await;
        let a = registry.get("a").unwrap().clone();
        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(a.is_closed());
    }
}
