extern crate config as _;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Prefix of environment variables overriding file values,
/// e.g. `MAILROUTE__NETWORK__PORT=9998`.
pub const ENV_PREFIX: &str = "MAILROUTE";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            worker_threads: num_cpus::get(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    /// Largest netstring length prefix accepted from a client.
    pub max_frame_size: usize,
    pub conn_read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 9999,
            max_connection: 1024,
            max_frame_size: 4096,
            conn_read_buffer_size: 4096,
        }
    }
}

impl NetworkConfig {
    /// The address to listen on. Only loopback addresses are allowed, the
    /// socketmap protocol carries no authentication.
    pub fn listen_address(&self) -> AppResult<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|e| AppError::InvalidValue(format!("network.ip {}: {}", self.ip, e)))?;
        if !ip.is_loopback() {
            return Err(AppError::InvalidValue(format!(
                "network.ip {} is not a loopback address",
                ip
            )));
        }
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Where the records written by the administration service live.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub primary_path: String,
    /// When set, the store is opened as a secondary instance that follows
    /// the primary. Otherwise it is opened read-only.
    pub secondary_path: Option<String>,
    pub catch_up_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            primary_path: String::new(),
            secondary_path: None,
            catch_up_interval_ms: 1000,
        }
    }
}

impl StoreConfig {
    pub fn catch_up_interval(&self) -> Duration {
        Duration::from_millis(self.catch_up_interval_ms)
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for hourly rolling log files, stdout only when unset.
    pub file_dir: Option<String>,
    pub otlp_enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MailRouteConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl MailRouteConfig {
    /// Loads the configuration from `path` and the environment.
    ///
    /// A missing file is an error only when `required` is set, so the daemon
    /// can run from environment variables alone.
    pub fn set_up_config<P: AsRef<Path>>(path: P, required: bool) -> AppResult<MailRouteConfig> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MailRouteConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.network.listen_address()?;
        if self.general.worker_threads == 0 {
            return Err(AppError::InvalidValue(
                "general.worker_threads must be at least 1".to_string(),
            ));
        }
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be at least 1".to_string(),
            ));
        }
        if self.store.primary_path.is_empty() {
            return Err(AppError::InvalidValue(
                "store.primary_path is not set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        let mut path = PathBuf::from("./");
        path.push("conf.toml");
        path
    }
}
