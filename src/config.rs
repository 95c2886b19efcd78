//! Relay configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Runtime settings for the relay. Every field has a default, so a config file
/// only needs the keys it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to listen on.
    pub bind_host: String,
    /// TCP port (`0` picks a free one).
    pub bind_port: u16,
    /// Deadline for the `LOGIN:` line.
    pub login_timeout_secs: u64,
    /// Per-line size cap, excluding the newline.
    pub max_line_bytes: usize,
    /// Lines allowed to wait for a slow recipient before it is dropped.
    pub max_outbound_queue_depth: usize,
    pub max_username_chars: usize,
    /// Close sessions that stay silent this long. Disabled when unset.
    pub idle_timeout_secs: Option<u64>,
    /// Send welcome/joined/left notices.
    pub presence_notices: bool,
    /// Sent to every session before the relay closes it on shutdown.
    pub shutdown_notice: Option<String>,
    /// How long shutdown waits for queued lines to flush.
    pub shutdown_grace_millis: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            bind_port: 8888,
            login_timeout_secs: 10,
            max_line_bytes: 8 * 1024,
            max_outbound_queue_depth: 512,
            max_username_chars: 32,
            idle_timeout_secs: None,
            presence_notices: false,
            shutdown_notice: Some("server is shutting down".into()),
            shutdown_grace_millis: 1000,
        }
    }
}

impl RelayConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            bail!("bind_host must not be empty");
        }
        if self.login_timeout_secs == 0 {
            bail!("login_timeout_secs must be at least 1");
        }
        if self.max_line_bytes == 0 {
            bail!("max_line_bytes must be at least 1");
        }
        if self.max_outbound_queue_depth == 0 {
            bail!("max_outbound_queue_depth must be at least 1");
        }
        if self.max_username_chars == 0 {
            bail!("max_username_chars must be at least 1");
        }
        if self.idle_timeout_secs == Some(0) {
            bail!("idle_timeout_secs must be at least 1 when set");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}
