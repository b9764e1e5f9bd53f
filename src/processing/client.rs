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

use super::envelope::{Params, Request, Response};
use super::format::PayloadFormat;
use crate::network::Connection;
use crate::service::{Client, Exchange};
use crate::AppResult;

/// Client counterpart of [`ProcessingService`](super::ProcessingService).
#[derive(Debug, Clone)]
pub struct ProcessingClient<F> {
    client: Client,
    format: F,
}

impl<F: PayloadFormat> ProcessingClient<F> {
    pub fn new(client: Client, format: F) -> Self {
        ProcessingClient { client, format }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends `data` and `params` over a fresh connection and returns the
    /// server's result.
    ///
    /// A failure reported by the server is `AppError::RemoteProcessing`;
    /// transport, framing and decode failures keep their own variants.
    pub async fn process(&self, data: F::Data, params: Params) -> AppResult<F::Data> {
        let peer = self.client.config().server_address();
        self.query(Request::new(data, params))
            .await?
            .into_result(&peer)
    }

    /// Like [`process`](Self::process) but hands back the whole response
    /// envelope.
    pub async fn query(&self, request: Request<F::Data>) -> AppResult<Response<F::Data>> {
        self.client
            .query(ProcessExchange {
                format: &self.format,
                request,
            })
            .await
    }
}

struct ProcessExchange<'a, F: PayloadFormat> {
    format: &'a F,
    request: Request<F::Data>,
}

impl<F: PayloadFormat> Exchange for ProcessExchange<'_, F> {
    type Output = Response<F::Data>;

    async fn communicate(self, connection: &mut Connection) -> AppResult<Self::Output> {
        connection
            .send(&self.format.request_type(), &self.request)
            .await?;
        connection.recv(&self.format.response_type()).await
    }
}
