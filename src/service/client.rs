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

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::config::ClientConfig;
use crate::network::Connection;
use crate::{AppError, AppResult};

/// Client side of one exchange, the counterpart of
/// [`Handler`](super::Handler).
pub trait Exchange: Send {
    type Output: Send;

    fn communicate(
        self,
        connection: &mut Connection,
    ) -> impl Future<Output = AppResult<Self::Output>> + Send;
}

/// Connects to the server afresh for every query.
///
/// There is no pooling and no retry: one query is one connection attempt,
/// one exchange, one close.
#[derive(Debug, Clone)]
pub struct Client {
    config: ClientConfig,
    cancel: Option<CancellationToken>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Client {
        Client {
            config,
            cancel: None,
        }
    }

    /// Client for `addr` with the default deadlines.
    pub fn for_addr(addr: SocketAddr) -> Client {
        Client::new(ClientConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..ClientConfig::default()
        })
    }

    /// Queries abort with `AppError::Cancelled` once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Client {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn query<E: Exchange>(&self, exchange: E) -> AppResult<E::Output> {
        let server_address = self.config.server_address();
        let started = Instant::now();

        let work = self.connect_and_communicate(&server_address, exchange);
        let result = match &self.cancel {
            Some(token) => tokio::select! {
                res = work => res,
                _ = token.cancelled() => Err(AppError::Cancelled {
                    peer: server_address.clone(),
                    elapsed: started.elapsed(),
                }),
            },
            None => work.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(elapsed_ms, "query to {} finished", server_address),
            Err(err) => error!(elapsed_ms, "query to {} failed: {}", server_address, err),
        }
        result
    }

    async fn connect_and_communicate<E: Exchange>(
        &self,
        server_address: &str,
        exchange: E,
    ) -> AppResult<E::Output> {
        let mut connection = self.connect(server_address).await?;
        let result = exchange.communicate(&mut connection).await;
        // close on every path; the exchange error wins over a close error
        let closed = connection.close().await;
        match (result, closed) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), _) => Err(err),
        }
    }

    async fn connect(&self, server_address: &str) -> AppResult<Connection> {
        let connect = TcpStream::connect(server_address);
        let socket = match self.config.connect_timeout() {
            Some(after) => time::timeout(after, connect)
                .await
                .map_err(|_| AppError::Timeout {
                    operation: "connecting",
                    peer: server_address.to_string(),
                    after,
                })?,
            None => connect.await,
        }
        .map_err(|e| AppError::transport(server_address, e))?;

        if self.config.nodelay {
            socket
                .set_nodelay(true)
                .map_err(|e| AppError::transport(server_address, e))?;
        }
        debug!("connected to {}", server_address);

        Ok(Connection::new(socket, server_address)
            .with_max_frame_len(self.config.max_package_size)
            .with_read_timeout(self.config.read_timeout())
            .with_write_timeout(self.config.write_timeout()))
    }
}
