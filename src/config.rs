use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::CashbackError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_JOB_TICK_SECS: u64 = 3600;

/// Top-level configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub update_url: Option<String>,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub job_tick: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup; `load` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = match var("CASHBACKS_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };

        let port = match var("CASHBACKS_PORT") {
            Some(port) => port.parse::<u16>().map_err(|_| ConfigError::InvalidPort(port))?,
            None => DEFAULT_PORT,
        };

        let job_tick_secs = match var("CASHBACKS_JOB_TICK_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(ConfigError::InvalidJobTick(value)),
            },
            None => DEFAULT_JOB_TICK_SECS,
        };

        Ok(AppConfig {
            database_path,
            update_url: var("CASHBACKS_UPDATE_URL"),
            server: ServerConfig {
                host: var("CASHBACKS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
            },
            telemetry: TelemetryConfig {
                log_level: var("CASHBACKS_LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            },
            job_tick: Duration::from_secs(job_tick_secs),
        })
    }
}

fn default_database_path() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join("cashbacks").join("cashbacks.db"))
        .ok_or(ConfigError::NoDataDir)
}

/// HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CASHBACKS_PORT must be a valid u16, got '{0}'")]
    InvalidPort(String),

    #[error("CASHBACKS_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },

    #[error("CASHBACKS_JOB_TICK_SECS must be a positive number of seconds, got '{0}'")]
    InvalidJobTick(String),

    #[error("no data directory on this platform; set CASHBACKS_DB")]
    NoDataDir,
}

impl From<ConfigError> for CashbackError {
    fn from(err: ConfigError) -> Self {
        CashbackError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("CASHBACKS_DB", "/tmp/cashbacks.db")]).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/cashbacks.db"));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.job_tick, Duration::from_secs(3600));
        assert!(config.update_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CASHBACKS_DB", "/data/cb.db"),
            ("CASHBACKS_PORT", "8080"),
            ("CASHBACKS_LOG_LEVEL", "debug"),
            ("CASHBACKS_UPDATE_URL", "https://example.com/latest.json"),
            ("CASHBACKS_JOB_TICK_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.update_url.as_deref(), Some("https://example.com/latest.json"));
        assert_eq!(config.job_tick, Duration::from_secs(60));
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = config_from(&[("CASHBACKS_DB", "/tmp/x.db"), ("CASHBACKS_UPDATE_URL", "  ")]).unwrap();
        assert!(config.update_url.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("CASHBACKS_DB", "x.db"), ("CASHBACKS_PORT", "70000")]),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            config_from(&[("CASHBACKS_DB", "x.db"), ("CASHBACKS_JOB_TICK_SECS", "0")]),
            Err(ConfigError::InvalidJobTick(_))
        ));
    }

    #[test]
    fn test_socket_addr() {
        let server = ServerConfig {
            host: "localhost".to_string(),
            port: 3000,
        };
        assert_eq!(
            server.socket_addr().unwrap(),
            SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000)
        );

        let bad = ServerConfig {
            host: "not a host".to_string(),
            port: 3000,
        };
        assert!(matches!(bad.socket_addr(), Err(ConfigError::InvalidHost { .. })));
    }
}
