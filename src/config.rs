//! Server configuration
//!
//! Defaults suitable for local use, overridable through `CHAT_HUB_*`
//! environment variables. The first command-line argument, if present,
//! overrides the listen address.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::DeliveryConfig;
use crate::error::ConfigError;
use crate::server::DEFAULT_COMMAND_BUFFER;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default WebSocket upgrade path
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Path accepted for the WebSocket upgrade
    pub ws_path: String,
    /// Extra `Origin` hosts accepted besides the server's own
    pub allowed_origins: Vec<String>,
    /// Hub command queue depth
    pub command_buffer: usize,
    /// Per-client delivery tuning
    pub delivery: DeliveryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            allowed_origins: Vec::new(),
            command_buffer: DEFAULT_COMMAND_BUFFER,
            delivery: DeliveryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment and command line
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        if let Some(addr) = env::args().nth(1) {
            config.addr = addr;
        }
        Ok(config)
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHAT_HUB_ADDR") {
            config.addr = addr;
        }
        if let Some(path) = lookup("CHAT_HUB_WS_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    key: "CHAT_HUB_WS_PATH",
                    value: path,
                });
            }
            config.ws_path = path;
        }
        if let Some(origins) = lookup("CHAT_HUB_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_ascii_lowercase)
                .collect();
        }
        if let Some(buffer) = positive(&lookup, "CHAT_HUB_COMMAND_BUFFER")? {
            config.command_buffer = buffer;
        }
        if let Some(capacity) = positive(&lookup, "CHAT_HUB_OUTBOX_CAPACITY")? {
            config.delivery.outbox_capacity = capacity;
        }
        if let Some(millis) = positive(&lookup, "CHAT_HUB_SEND_TIMEOUT_MS")? {
            config.delivery.send_timeout = Duration::from_millis(millis);
        }
        if let Some(limit) = positive(&lookup, "CHAT_HUB_MAX_STALLED_SENDS")? {
            config.delivery.max_stalled_sends = limit;
        }

        Ok(config)
    }
}

/// Parse an optional numeric variable that must be non-zero
fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed != T::default() => Ok(Some(parsed)),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHAT_HUB_ADDR", "0.0.0.0:9000"),
            ("CHAT_HUB_ALLOWED_ORIGINS", "Example.com, localhost:3000,"),
            ("CHAT_HUB_OUTBOX_CAPACITY", "8"),
            ("CHAT_HUB_SEND_TIMEOUT_MS", "250"),
            ("CHAT_HUB_MAX_STALLED_SENDS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.allowed_origins, vec!["example.com", "localhost:3000"]);
        assert_eq!(config.delivery.outbox_capacity, 8);
        assert_eq!(config.delivery.send_timeout, Duration::from_millis(250));
        assert_eq!(config.delivery.max_stalled_sends, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        for (key, value) in [
            ("CHAT_HUB_OUTBOX_CAPACITY", "0"),
            ("CHAT_HUB_COMMAND_BUFFER", "lots"),
            ("CHAT_HUB_SEND_TIMEOUT_MS", "-1"),
            ("CHAT_HUB_WS_PATH", "ws"),
        ] {
            let err = ServerConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
    }
}
