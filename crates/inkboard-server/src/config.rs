//! Server configuration, read from `INKBOARD_*` environment variables.

use crate::error::ServerError;
use inkboard_core::CoordinatorConfig;
use inkboard_core::presence::STALE_THRESHOLD;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// Default capacity of each board's broadcast channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Runtime settings for the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Board storage directory. `None` uses the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Presence records not refreshed within this window are dropped.
    pub presence_timeout: Duration,
    /// Capacity of the commit and presence broadcast channels. Sessions that
    /// fall further behind than this are resynced with a full snapshot.
    pub channel_capacity: usize,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            data_dir: None,
            presence_timeout: STALE_THRESHOLD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("INKBOARD_ADDR") {
            config.addr = parse("INKBOARD_ADDR", &addr)?;
        }
        if let Some(dir) = lookup("INKBOARD_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(secs) = lookup("INKBOARD_PRESENCE_TIMEOUT_SECS") {
            let secs: u64 = parse("INKBOARD_PRESENCE_TIMEOUT_SECS", &secs)?;
            config.presence_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = lookup("INKBOARD_CHANNEL_CAPACITY") {
            config.channel_capacity = parse("INKBOARD_CHANNEL_CAPACITY", &capacity)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.channel_capacity == 0 {
            return Err(ServerError::Config(
                "INKBOARD_CHANNEL_CAPACITY must be at least 1".to_string(),
            ));
        }
        if self.presence_timeout.is_zero() {
            return Err(ServerError::Config(
                "INKBOARD_PRESENCE_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ServerError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServerError::Config(format!("{}={:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
    }

    #[test]
    fn test_reads_every_variable() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("INKBOARD_ADDR", "127.0.0.1:9000"),
            ("INKBOARD_DATA_DIR", "/var/lib/inkboard"),
            ("INKBOARD_PRESENCE_TIMEOUT_SECS", "12"),
            ("INKBOARD_CHANNEL_CAPACITY", " 64 "),
        ]))
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/inkboard")));
        assert_eq!(config.presence_timeout, Duration::from_secs(12));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("INKBOARD_ADDR", "nowhere")])),
            Err(ServerError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_lookup(lookup(&[("INKBOARD_CHANNEL_CAPACITY", "0")])),
            Err(ServerError::Config(_))
        ));
    }
}
