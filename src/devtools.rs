//! HTTP side of the DevTools endpoint: readiness probing and websocket
//! discovery.

use crate::deadline::{Deadline, Interrupted};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Interval between readiness probes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

#[derive(Debug, Clone)]
pub struct DevToolsEndpoint {
    base: String,
    client: Client,
}

impl DevToolsEndpoint {
    pub fn new(host: &str, port: u16) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        Ok(Self {
            base: format!("http://{host}:{port}"),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>, reqwest::Error> {
        self.client
            .get(format!("{}/json/list", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// The browser-level websocket URL from `/json/version`.
    pub async fn websocket_url(&self) -> Result<String, reqwest::Error> {
        let version: VersionInfo = self
            .client
            .get(format!("{}/json/version", self.base))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(version.web_socket_debugger_url)
    }

    /// Poll `/json/list` until it answers, returning the number of probes made.
    pub async fn wait_until_ready(&self, deadline: &Deadline) -> Result<u32, Interrupted> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match deadline.run(self.list_targets()).await? {
                Ok(targets) => {
                    debug!(
                        endpoint = %self.base,
                        attempts,
                        targets = targets.len(),
                        "DevTools endpoint ready"
                    );
                    return Ok(attempts);
                }
                Err(e) => trace!(endpoint = %self.base, error = %e, "DevTools endpoint not ready"),
            }
            deadline.sleep(POLL_INTERVAL).await?;
        }
    }
}
