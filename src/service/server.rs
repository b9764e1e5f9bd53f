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

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;
use tracing::{debug, error, info, warn};

use super::config::NetworkConfig;
use super::Shutdown;
use crate::network::Connection;
use crate::{AppError, AppResult};

/// Server side of one exchange.
///
/// Called once per accepted connection; performs exactly one
/// request/response exchange and returns. Whatever it returns, the server
/// closes the connection afterwards.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        connection: &mut Connection,
        context: &RequestContext,
    ) -> impl Future<Output = AppResult<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 1 for the first accepted connection, counting up.
    pub connection_id: u64,
    pub peer_addr: SocketAddr,
    pub accepted_at: Instant,
}

impl RequestContext {
    pub fn elapsed(&self) -> Duration {
        self.accepted_at.elapsed()
    }
}

/// Counters shared by all connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    active: AtomicU64,
}

impl ServerStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Connections currently being handled.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Created = 0,
    Bound = 1,
    Listening = 2,
    /// Waiting in `accept`, no connection in flight.
    Accepting = 3,
    /// Accept loop running, at least one connection in flight.
    Handling = 4,
    Stopped = 5,
}

impl ServerState {
    fn from_u8(value: u8) -> ServerState {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Bound,
            2 => ServerState::Listening,
            3 => ServerState::Accepting,
            4 => ServerState::Handling,
            _ => ServerState::Stopped,
        }
    }
}

/// Observes a running server from the outside.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: Arc<AtomicU8>,
    stats: Arc<ServerStats>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn state(&self) -> ServerState {
        let state = ServerState::from_u8(self.state.load(Ordering::Acquire));
        if state == ServerState::Accepting && self.stats.active() > 0 {
            ServerState::Handling
        } else {
            state
        }
    }
}

#[derive(Debug)]
pub struct Server<H: Handler> {
    listener: TcpListener,
    handler: Arc<H>,
    config: NetworkConfig,
    limit_connections: Arc<Semaphore>,
    handle: ServerHandle,
}

impl<H: Handler> Server<H> {
    /// Creates the listening socket with `SO_REUSEADDR`, binds it to
    /// `config.host:config.port` and starts listening with `config.backlog`.
    pub async fn bind(config: NetworkConfig, handler: H) -> AppResult<Server<H>> {
        let state = Arc::new(AtomicU8::new(ServerState::Created as u8));
        let listen_address = config.listen_address();
        let addr = tokio::net::lookup_host(&listen_address)
            .await?
            .next()
            .ok_or_else(|| {
                AppError::InvalidValue(format!("can not resolve listen address {listen_address}"))
            })?;

        debug!("creating socket for {}", addr);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!("{}", error_msg);
            AppError::IllegalStateError(error_msg)
        })?;
        state.store(ServerState::Bound as u8, Ordering::Release);

        let listener = socket.listen(config.backlog)?;
        let local_addr = listener.local_addr()?;
        state.store(ServerState::Listening as u8, Ordering::Release);
        info!("tcp server binding to {} for listening", local_addr);

        Ok(Server {
            listener,
            handler: Arc::new(handler),
            limit_connections: Arc::new(Semaphore::new(config.max_connection)),
            config,
            handle: ServerHandle {
                local_addr,
                state,
                stats: Arc::new(ServerStats::default()),
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Accepts connections until `shutdown_signal` completes or accepting
    /// fails for good.
    ///
    /// Each accepted connection is served by its own task, at most
    /// `max_connection` at a time. A failing, stalled or panicking exchange
    /// only ends its own connection; the accept loop keeps going.
    ///
    // Shutdown sequence:
    // 1. The accept loop is dropped when `shutdown_signal` completes.
    // 2. Connection tasks are notified through `notify_shutdown`; an exchange
    //    still in flight is cancelled and its connection closed.
    // 3. Every connection task holds a clone of `shutdown_complete_tx`; `run`
    //    returns once the last of them is dropped.
    pub async fn run(self, shutdown_signal: impl Future) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

        let result = tokio::select! {
            res = self.accept_loop(&notify_shutdown, &shutdown_complete_tx) => {
                if let Err(err) = &res {
                    error!(cause = %err, "failed to accept");
                }
                res
            }
            _ = shutdown_signal => {
                info!("get shutdown signal");
                Ok(())
            }
        };

        // no receivers left is fine, nothing in flight then
        let _ = notify_shutdown.send(());
        drop(notify_shutdown);
        drop(shutdown_complete_tx);
        debug!("waiting for connection handlers to finish...");
        let _ = shutdown_complete_rx.recv().await;

        self.handle
            .state
            .store(ServerState::Stopped as u8, Ordering::Release);
        info!(
            accepted = self.handle.stats.accepted(),
            succeeded = self.handle.stats.succeeded(),
            failed = self.handle.stats.failed(),
            "tcp server stopped"
        );
        result
    }

    async fn accept_loop(
        &self,
        notify_shutdown: &broadcast::Sender<()>,
        shutdown_complete_tx: &mpsc::Sender<()>,
    ) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limiter: {e}")))?;

            self.handle
                .state
                .store(ServerState::Accepting as u8, Ordering::Release);
            debug!("waiting for connection...");
            let (socket, peer_addr) = self.accept().await?;
            if self.config.nodelay {
                if let Err(e) = socket.set_nodelay(true) {
                    warn!(peer = %peer_addr, "failed to set TCP_NODELAY: {}", e);
                }
            }

            let stats = self.handle.stats.clone();
            let context = RequestContext {
                connection_id: stats.accepted.fetch_add(1, Ordering::Relaxed) + 1,
                peer_addr,
                accepted_at: Instant::now(),
            };
            info!(
                connection_id = context.connection_id,
                "accepted connection from {}", peer_addr
            );

            let connection = Connection::new(socket, peer_addr.to_string())
                .with_max_frame_len(self.config.max_package_size)
                .with_read_timeout(self.config.read_timeout())
                .with_write_timeout(self.config.write_timeout());
            let handler = self.handler.clone();
            let connection_timeout = self.config.connection_timeout();
            let shutdown = Shutdown::new(notify_shutdown.subscribe());
            let shutdown_complete_tx = shutdown_complete_tx.clone();

            stats.active.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                let _shutdown_complete_tx = shutdown_complete_tx;
                let connection_id = context.connection_id;
                let task_context = context.clone();
                // served in its own task so that a panicking handler surfaces
                // as a JoinError here instead of unwinding through this task
                let exchange = tokio::spawn(async move {
                    serve_connection(
                        handler,
                        connection,
                        &task_context,
                        connection_timeout,
                        shutdown,
                    )
                    .await
                });
                let outcome = match exchange.await {
                    Ok(result) => result,
                    Err(join_error) if join_error.is_panic() => Err(AppError::IllegalStateError(
                        format!("handler panicked: {}", panic_message(&*join_error.into_panic())),
                    )),
                    Err(join_error) => Err(AppError::IllegalStateError(format!(
                        "handler task failed: {join_error}"
                    ))),
                };

                let elapsed_ms = context.elapsed().as_millis() as u64;
                match outcome {
                    Ok(()) => {
                        stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        info!(
                            connection_id,
                            elapsed_ms,
                            "finished request from {}", context.peer_addr
                        );
                    }
                    Err(err) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            connection_id,
                            elapsed_ms,
                            "request from {} failed: {}", context.peer_addr, err
                        );
                    }
                }
                // publishes the outcome counters to readers of `active`
                stats.active.fetch_sub(1, Ordering::Release);
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<(TcpStream, SocketAddr)> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok(accepted) => return Ok(accepted),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::IllegalStateError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                    warn!("accept failed, retrying in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

async fn serve_connection<H: Handler>(
    handler: Arc<H>,
    mut connection: Connection,
    context: &RequestContext,
    connection_timeout: Option<Duration>,
    mut shutdown: Shutdown,
) -> AppResult<()> {
    let exchange = async {
        match connection_timeout {
            Some(after) => time::timeout(after, handler.handle(&mut connection, context))
                .await
                .map_err(|_| AppError::Timeout {
                    operation: "handling connection",
                    peer: context.peer_addr.to_string(),
                    after,
                })?,
            None => handler.handle(&mut connection, context).await,
        }
    };
    let result = tokio::select! {
        res = exchange => res,
        _ = shutdown.recv() => {
            debug!(connection_id = context.connection_id, "exchange cancelled by shutdown");
            Err(AppError::Cancelled {
                peer: context.peer_addr.to_string(),
                elapsed: context.elapsed(),
            })
        }
    };

    let closed = connection.close().await;
    match (result, closed) {
        (Err(err), _) => Err(err),
        (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
