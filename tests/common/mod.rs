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


#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use procsock::message::Framed;
use procsock::network::Connection;
use procsock::service::{NetworkConfig, ServerHandle};
use procsock::{setup_local_tracing, AppResult, Client, Exchange, Handler, Server};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Loopback config on an ephemeral port.
pub fn loopback_config() -> NetworkConfig {
    NetworkConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..NetworkConfig::default()
    }
}

/// A server running in the background until `stop` is called.
pub struct TestServer {
    pub handle: ServerHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<AppResult<()>>,
}

impl TestServer {
    pub async fn start<H: Handler>(config: NetworkConfig, handler: H) -> TestServer {
        setup_local_tracing().unwrap();
        let server = Server::bind(config, handler).await.unwrap();
        let handle = server.handle();
        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = signal.await;
        }));
        TestServer {
            handle,
            shutdown,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn client(&self) -> Client {
        Client::for_addr(self.addr())
    }

    pub async fn stop(self) -> AppResult<()> {
        let _ = self.shutdown.send(());
        self.task.await.unwrap()
    }
}

/// Polls `condition` every 10ms, panics after 5s.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let waiting = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .is_err()
    {
        panic!("timed out waiting for {what}");
    }
}

/// Sends one framed payload and reads one framed reply.
pub struct Echo(pub Bytes);

impl Exchange for Echo {
    type Output = Bytes;

    async fn communicate(self, connection: &mut Connection) -> AppResult<Bytes> {
        connection.send(&Framed, &self.0).await?;
        connection.recv(&Framed).await
    }
}
