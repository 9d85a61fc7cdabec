pub use app_error::{AppError, AppResult};
pub use config::{
    GeneralConfig, LogConfig, MailRouteConfig, NetworkConfig, StoreConfig, ENV_PREFIX,
};
pub use daemon::Daemon;
pub use server::{ConnectionSettings, Server, CONNECTION_IDLE_TIMEOUT};
pub use shutdown::Shutdown;
pub use tracing_config::{level_directive, setup_local_tracing, setup_tracing, TracingGuard};

mod app_error;
mod config;
mod daemon;
mod server;
mod shutdown;
mod tracing_config;
