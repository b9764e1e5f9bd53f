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

//! Service Module
//!
//! The TCP server and client built on [`Connection`], plus the ambient
//! pieces shared by the binary: error type, layered configuration, tracing
//! setup and shutdown notification.
//!
//! [`Connection`]: crate::network::Connection

pub use app_error::{AppError, AppResult};
pub use client::{Client, Exchange};
pub use config::{
    AppConfig, ClientConfig, LogConfig, NetworkConfig, PayloadEncoding, DEFAULT_PORT, ENV_PREFIX,
};
pub use server::{Handler, RequestContext, Server, ServerHandle, ServerState, ServerStats};
pub(crate) use server::panic_message;
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod client;
mod config;
mod server;
mod shutdown;
mod tracing_config;
