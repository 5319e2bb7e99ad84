//! Configuration system.
//!
//! Loads engine configuration from JSON strings or files. Every field has a
//! default, so a config file only needs the keys it overrides.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Host the client connects to / the server binds.
    pub server_host: String,
    /// Well-known handshake port. Sub-listeners use the ports above it.
    pub handshake_port: u16,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Snapshot broadcast interval. Zero sends every tick.
    pub send_interval_ms: u64,
    /// How often a client sends its controller state.
    pub controller_send_interval_ms: u64,
    /// How long a client waits for the redirect.
    pub handshake_timeout_ms: u64,
    /// Ring buffer capacity per connection, in bytes.
    pub ring_capacity: usize,
    pub physics_iterations: u32,
    /// JSON level file; the built-in pong level when unset.
    pub level_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            handshake_port: 5204,
            tick_hz: 60,
            send_interval_ms: 100,
            controller_send_interval_ms: 50,
            handshake_timeout_ms: 6000,
            ring_capacity: 65536,
            physics_iterations: 8,
            level_path: None,
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// `host:port` of the handshake listener.
    pub fn handshake_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.handshake_port)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn controller_send_interval(&self) -> Duration {
        Duration::from_millis(self.controller_send_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"handshake_port": 6000, "tick_hz": 30}"#).unwrap();
        assert_eq!(cfg.handshake_port, 6000);
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.handshake_timeout_ms, 6000);
        assert_eq!(cfg.handshake_addr(), "127.0.0.1:6000");
    }

    #[test]
    fn zero_tick_rate_does_not_divide_by_zero() {
        let cfg = EngineConfig {
            tick_hz: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
    }
}
