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


//! Length-prefixed messaging over TCP.
//!
//! - [`network`]: frame codec and the per-exchange [`Connection`](network::Connection)
//! - [`message`]: message types turning values into payload bytes
//! - [`service`]: server, client, configuration and tracing
//! - [`processing`]: `{data, params}` -> `{status, result}` remote processing

pub mod message;
pub mod network;
pub mod processing;
pub mod service;

pub use service::{
    setup_local_tracing, setup_tracing, AppConfig, AppError, AppResult, Client, Exchange, Handler,
    RequestContext, Server, ServerHandle, ServerState, Shutdown,
};
