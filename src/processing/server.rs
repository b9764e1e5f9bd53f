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

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::envelope::{Params, Request, Response};
use super::format::PayloadFormat;
use crate::network::Connection;
use crate::service::{panic_message, Handler, RequestContext};
use crate::{AppError, AppResult};

/// Failure of a processing callback, reported to the client as
/// `ERROR: <kind>: <message>`.
///
/// Any `std::error::Error` converts into it with `?`, using the error's
/// type name as `kind`. For that reason it does not implement `Error`
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessError {
    pub kind: String,
    pub message: String,
}

impl ProcessError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessError {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E: std::error::Error> From<E> for ProcessError {
    fn from(err: E) -> Self {
        ProcessError::new(short_type_name::<E>(), err.to_string())
    }
}

/// `core::num::error::ParseIntError` -> `ParseIntError`
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

/// Serves one `{data, params}` request per connection with a processing
/// callback.
///
/// The callback is blocking code and runs on tokio's blocking pool. It may
/// fail or even panic; the client gets an error response either way and
/// the server keeps going.
pub struct ProcessingService<F, P> {
    format: F,
    process: Arc<P>,
    request_count: AtomicU64,
}

impl<F, P> ProcessingService<F, P>
where
    F: PayloadFormat,
    P: Fn(F::Data, Params) -> Result<F::Data, ProcessError> + Send + Sync + 'static,
{
    pub fn new(format: F, process: P) -> Self {
        ProcessingService {
            format,
            process: Arc::new(process),
            request_count: AtomicU64::new(0),
        }
    }

    /// Requests received so far, including failed ones.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    async fn run_process(&self, request: Request<F::Data>, request_id: u64) -> Response<F::Data> {
        let process = self.process.clone();
        let Request { data, params } = request;
        match tokio::task::spawn_blocking(move || process(data, params)).await {
            Ok(Ok(result)) => Response::Ok(result),
            Ok(Err(err)) => {
                error!(request_id, "processing failed: {}", err);
                Response::Error(err.to_string())
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(&*join_error.into_panic());
                error!(request_id, "processing panicked: {}", message);
                Response::Error(ProcessError::new("panic", message).to_string())
            }
            Err(join_error) => {
                error!(request_id, "processing task failed: {}", join_error);
                Response::Error(ProcessError::new("cancelled", join_error.to_string()).to_string())
            }
        }
    }
}

impl<F, P> Handler for ProcessingService<F, P>
where
    F: PayloadFormat,
    P: Fn(F::Data, Params) -> Result<F::Data, ProcessError> + Send + Sync + 'static,
{
    async fn handle(&self, connection: &mut Connection, context: &RequestContext) -> AppResult<()> {
        let request_id = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        let response_type = self.format.response_type();

        let request = match connection.recv(&self.format.request_type()).await {
            Ok(request) => request,
            Err(err @ AppError::Decode(_)) => {
                // tell the client why before giving up on the connection
                let reply: Response<F::Data> = Response::Error(format!("invalid request: {err}"));
                if let Err(send_err) = connection.send(&response_type, &reply).await {
                    warn!(request_id, "could not report invalid request: {}", send_err);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        debug!(
            request_id,
            connection_id = context.connection_id,
            "request received from {}",
            context.peer_addr
        );

        let response = self.run_process(request, request_id).await;
        connection.send(&response_type, &response).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::message::{Compressed, EValue};
    use crate::processing::{ExtendedJsonFormat, JsonFormat};

    type Callback<D> = fn(D, Params) -> Result<D, ProcessError>;

    fn assert_handler<H: Handler>() {}

    #[test]
    fn test_every_format_serves_from_any_thread() {
        assert_handler::<ProcessingService<JsonFormat<Value>, Callback<Value>>>();
        assert_handler::<ProcessingService<ExtendedJsonFormat<EValue>, Callback<EValue>>>();
        assert_handler::<ProcessingService<Compressed<JsonFormat<Value>>, Callback<Value>>>();
    }

    #[derive(Debug, thiserror::Error)]
    #[error("bad params")]
    struct ValueError;

    #[test]
    fn test_errors_convert_with_their_type_name() {
        let err = ProcessError::from(ValueError);
        assert_eq!(err.kind, "ValueError");
        assert_eq!(err.to_string(), "ValueError: bad params");

        let err: ProcessError = "x".parse::<i32>().unwrap_err().into();
        assert_eq!(err.kind, "ParseIntError");
    }
}
