//! Bounded connect-with-backoff for the resolving phase.

use std::time::Duration;

use labnet_rpc::{ClientError, ClientOptions, RpcClient};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ModuleEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl ConnectPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// A single attempt, no waiting.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Wait before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        delay.min(self.max_delay)
    }
}

/// Connection attempts that all failed
#[derive(Debug, thiserror::Error)]
#[error("unreachable at {addr} after {attempts} attempt(s): {last}")]
pub struct ConnectFailure {
    pub addr: String,
    pub attempts: u32,
    #[source]
    pub last: ClientError,
}

/// Connect to a configured module, retrying refused connections with backoff.
///
/// # Errors
///
/// Returns [`ConnectFailure`] once `policy.max_attempts` attempts failed, or
/// immediately for errors other than a failed connect.
pub async fn connect_with_backoff(
    entry: &ModuleEntry,
    policy: &ConnectPolicy,
    options: &ClientOptions,
) -> Result<RpcClient, ConnectFailure> {
    let mut attempt = 1;
    loop {
        match RpcClient::connect(&entry.host, entry.port, options.clone()).await {
            Ok(client) => {
                debug!(
                    "[{}] Connected to {} (attempt {})",
                    entry.name,
                    entry.addr(),
                    attempt
                );
                return Ok(client);
            }
            Err(e @ ClientError::Connect { .. }) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "[{}] Connect attempt {}/{} to {} failed: {}; retrying in {:?}",
                    entry.name,
                    attempt,
                    policy.max_attempts,
                    entry.addr(),
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(last) => {
                warn!(
                    "[{}] Giving up on {} after {} attempt(s): {}",
                    entry.name,
                    entry.addr(),
                    attempt,
                    last
                );
                return Err(ConnectFailure {
                    addr: entry.addr(),
                    attempts: attempt,
                    last,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn entry(port: u16) -> ModuleEntry {
        ModuleEntry {
            name: "wm1".into(),
            host: "127.0.0.1".into(),
            port,
            module_type: "wavemeter".into(),
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = ConnectPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(350),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(64), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(ConnectPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
        assert_eq!(ConnectPolicy::once().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let port = closed_port().await;
        let policy = ConnectPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));

        let err = connect_with_backoff(&entry(port), &policy, &ClientOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, ClientError::Connect { .. }));
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }

    #[tokio::test]
    async fn test_connects_once_server_appears() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let accept = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            listener.accept().await.unwrap()
        });

        let policy = ConnectPolicy::new(20, Duration::from_millis(10), Duration::from_millis(20));
        let client = connect_with_backoff(&entry(port), &policy, &ClientOptions::default())
            .await
            .unwrap();
        assert_eq!(client.peer().port(), port);
        let _ = accept.await.unwrap();
    }
}
