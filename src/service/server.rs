// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, trace};

use crate::lookup::LookupEngine;
use crate::network::{Connection, RequestFrame};
use crate::request::{MapResponse, RequestProcessor};
use crate::store::RecordStore;
use crate::AppError;
use crate::AppResult;

use super::config::NetworkConfig;
use super::Shutdown;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection without a complete request for this long is closed.
pub const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub idle_timeout: Duration,
    pub max_frame_size: usize,
    pub read_buffer_size: usize,
}

impl ConnectionSettings {
    pub fn from_config(network: &NetworkConfig) -> Self {
        ConnectionSettings {
            idle_timeout: CONNECTION_IDLE_TIMEOUT,
            max_frame_size: network.max_frame_size,
            read_buffer_size: network.conn_read_buffer_size,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

// handler for each connection
struct ConnectionHandler<S> {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    peer: SocketAddr,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    engine: Arc<LookupEngine<S>>,
    idle_timeout: Duration,
}

impl<S: RecordStore> ConnectionHandler<S> {
    /// Serves requests one at a time until the client leaves, the connection
    /// idles out, or the daemon shuts down. Responses are written in request
    /// order.
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            let deadline = Instant::now() + self.idle_timeout;
            // read request from client, if client close the connection gracefully, return None,
            // if client close the connection unexpectedly, return Err
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res,
                _ = time::sleep_until(deadline) => {
                    debug!("connection {} from {} idle for {:?}, closing", self.connection_id, self.peer, self.idle_timeout);
                    return Ok(());
                }
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
            };

            let response = match maybe_frame {
                Ok(Some(frame)) => {
                    self.engine.stats().record_query();
                    let deadline = Instant::now() + self.idle_timeout;
                    match self.process(&frame, deadline).await {
                        Some(response) => response,
                        // the lookup was abandoned together with the connection
                        None => return Ok(()),
                    }
                }
                // client close the connection gracefully
                Ok(None) => break,
                Err(AppError::MalformedProtocol(reason)) => {
                    self.engine.stats().record_query();
                    debug!(
                        "malformed request on connection {}: {}",
                        self.connection_id, reason
                    );
                    MapResponse::NotFound
                }
                Err(err) => return Err(err),
            };

            self.write_response(&response).await?;
        }
        debug!("connection handler exit read loop");

        Ok(())
    }

    /// Runs one lookup while still watching the socket. A reset peer or the
    /// idle deadline drops the lookup future, cancelling the store query it
    /// is waiting on.
    async fn process(&mut self, frame: &RequestFrame, deadline: Instant) -> Option<MapResponse> {
        let engine = self.engine.clone();
        let lookup = RequestProcessor::process_request(frame, &engine);
        tokio::pin!(lookup);

        loop {
            tokio::select! {
                response = &mut lookup => return Some(response),
                _ = time::sleep_until(deadline) => {
                    debug!("connection {} timed out with a lookup in flight, cancelling it", self.connection_id);
                    return None;
                }
                res = self.connection.fill_buffer(), if self.connection.can_read_ahead() => {
                    if let Err(err) = res {
                        debug!("connection {} lost during lookup: {}", self.connection_id, err);
                        return None;
                    }
                    trace!("connection {} read ahead during lookup", self.connection_id);
                }
            }
        }
    }

    async fn write_response(&mut self, response: &MapResponse) -> AppResult<()> {
        let encoded = response.encode();
        self.writer
            .write_all(&encoded)
            .await
            .map_err(|e| AppError::DetailedIoError(format!("write response error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::DetailedIoError(format!("flush response error: {}", e)))?;
        Ok(())
    }
}

impl<S> Drop for ConnectionHandler<S> {
    fn drop(&mut self) {
        trace!("connection handler {} dropped", self.connection_id);
    }
}

/// Longest pause between two failed accepts.
pub const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(64);

fn next_accept_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        Duration::from_secs(1)
    } else {
        (current * 2).min(MAX_ACCEPT_BACKOFF)
    }
}

pub struct Server<S> {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    engine: Arc<LookupEngine<S>>,
    settings: ConnectionSettings,
}

impl<S: RecordStore> Server<S> {
    pub fn new(
        listener: TcpListener,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        engine: Arc<LookupEngine<S>>,
        settings: ConnectionSettings,
    ) -> Self {
        Server {
            listener,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
            engine,
            settings,
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the caller drops this future, spawning one
    /// handler task per connection. Only a closed connection limiter ends it
    /// with an error.
    ///
    // Graceful shutdown sequence:
    // 1. The caller drops this future when a shutdown signal arrives, which stops accepting.
    // 2. Each connection handler sees the broadcast; idle ones return at once, busy ones
    //    finish and answer the request in hand first.
    // 3. Every handler holds a `shutdown_complete_tx` clone. The caller waits for all of them
    //    to be dropped before closing the store.
    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limiter: {}", e)))?;

            let (socket, peer) = self.accept().await;
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            debug!("accept new connection {} from {}", connection_id, peer);

            let (reader, writer) = socket.into_split();
            let mut handler = ConnectionHandler {
                notify_shutdown: self.notify_shutdown.clone(),
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                connection_id,
                peer,
                connection: Connection::new(
                    reader,
                    self.settings.read_buffer_size,
                    self.settings.max_frame_size,
                ),
                writer: BufWriter::new(writer),
                engine: self.engine.clone(),
                idle_timeout: self.settings.idle_timeout,
            };

            tokio::spawn(async move {
                match handler.handle_connection().await {
                    Ok(()) => {}
                    Err(err) if is_disconnect(&err) => {
                        debug!("connection {} closed by peer: {}", handler.connection_id, err);
                    }
                    Err(err) => {
                        error!("Connection {} error: {}", handler.connection_id, err);
                    }
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    /// Retries failed accepts (e.g. out of file descriptors) forever, backing
    /// off up to [`MAX_ACCEPT_BACKOFF`].
    async fn accept(&self) -> (TcpStream, SocketAddr) {
        let mut backoff = Duration::ZERO;

        loop {
            match self.listener.accept().await {
                Ok(accepted) => return accepted,
                Err(err) => {
                    backoff = next_accept_backoff(backoff);
                    error!("accept error, retrying in {:?}: {}", backoff, err);
                }
            }

            time::sleep(backoff).await;
        }
    }
}

impl<S> Drop for Server<S> {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}

/// Client went away: reset, broken pipe, or EOF in the middle of a request.
fn is_disconnect(err: &AppError) -> bool {
    match err {
        AppError::IoError(err) => matches!(
            err.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        AppError::DetailedIoError(_) => true,
        _ => false,
    }
}
