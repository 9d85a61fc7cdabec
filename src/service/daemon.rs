use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::{runtime, signal};
use tracing::{error, info, trace, warn};

use crate::lookup::{LookupEngine, STATS_REPORT_INTERVAL};
use crate::store::RocksStore;
use crate::AppError::IllegalStateError;
use crate::{AppResult, Shutdown};

use super::config::MailRouteConfig;
use super::server::{ConnectionSettings, Server};
use super::tracing_config::{setup_tracing, TracingGuard};

/// Owns the process lifecycle: runtime, store, listener, background tasks
/// and the shutdown sequence.
pub struct Daemon {
    config: MailRouteConfig,
}

impl Daemon {
    pub fn new(config: MailRouteConfig) -> Self {
        Daemon { config }
    }

    /// Runs the daemon until SIGINT or SIGTERM.
    ///
    /// Failing to open the record store is fatal and returned as an error, so
    /// the process exits non-zero and its supervisor can restart it. Store
    /// trouble after startup only produces negative answers.
    pub fn start(&self, default_log_directive: &str) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        // startup tokio runtime
        let rt = runtime::Builder::new_multi_thread()
            .worker_threads(self.config.general.worker_threads)
            .thread_name("mailroute-worker")
            .enable_all()
            .build()?;

        let _tracing_guard: TracingGuard =
            rt.block_on(async { setup_tracing(&self.config.log, default_log_directive) })?;

        // the store first: without it every answer would be NOTFOUND
        let store = match RocksStore::open(&self.config.store) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(
                    "failed to open record store at {}: {}",
                    self.config.store.primary_path, err
                );
                return Err(err);
            }
        };
        let engine = Arc::new(LookupEngine::new(store.clone()));

        let catch_up_task = rt.spawn(store.clone().catch_up_task(
            tokio::time::interval(self.config.store.catch_up_interval()),
            Shutdown::new(notify_shutdown.subscribe()),
        ));
        let stats_task = rt.spawn(engine.clone().report_task(
            tokio::time::interval(STATS_REPORT_INTERVAL),
            Shutdown::new(notify_shutdown.subscribe()),
        ));

        // an error here still goes through the shutdown sequence, then makes
        // the process exit non-zero
        let served = rt.block_on(Self::run_tcp_server(
            &self.config,
            engine.clone(),
            notify_shutdown.clone(),
            shutdown_complete_tx,
            &mut shutdown_complete_rx,
        ));

        // tcp server has stopped accepting, tell everyone else
        let _ = notify_shutdown.send(());
        // wait for in-flight connections to finish
        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        for task in [catch_up_task, stats_task] {
            if let Err(err) = rt.block_on(task) {
                warn!("background task failed: {}", err);
            }
        }

        drop(engine);
        match Arc::try_unwrap(store) {
            Ok(store) => drop(store),
            Err(_) => warn!("record store still referenced at shutdown"),
        }
        match &served {
            Ok(()) => info!("mailroute shutdown complete"),
            Err(err) => error!("mailroute stopped after a server failure: {}", err),
        }
        served
    }

    async fn run_tcp_server(
        config: &MailRouteConfig,
        engine: Arc<LookupEngine<RocksStore>>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: Sender<()>,
        _shutdown_complete_rx: &mut Receiver<()>,
    ) -> AppResult<()> {
        let listen_address = config.network.listen_address()?;

        let listener = TcpListener::bind(listen_address).await.map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!(error_msg);
            IllegalStateError(error_msg)
        })?;
        info!("mailroute ready, serving socketmap lookups on {}", listen_address);

        let server = Server::new(
            listener,
            Arc::new(Semaphore::new(config.network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            engine,
            ConnectionSettings::from_config(&config.network),
        );
        tokio::select! {
          res = server.run() => {
              if let Err(err) = &res {
                  error!(cause = %err, "tcp server stopped");
              }
              res?;
          }
          res = wait_for_signal() => {
              res?;
          }
        }

        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() -> AppResult<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("received SIGINT, shutting down");
            }
            _ = terminate.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("received ctrl-c, shutting down");
    }
    Ok(())
}
