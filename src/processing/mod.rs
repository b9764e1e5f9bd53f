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

//! Remote processing
//!
//! A request/response protocol on top of the generic server and client: the
//! client sends `{"data": ..., "params": ...}`, the server runs a processing
//! callback `process(data, params) -> result` and answers with
//! `{"status": "OK", "result": ...}` or
//! `{"status": "ERROR: <kind>: <message>", "result": null}`.
//!
//! One request per connection. The envelopes travel as JSON or extended
//! JSON, optionally compressed, as chosen by a [`PayloadFormat`].

pub use client::ProcessingClient;
pub use envelope::{Params, Request, Response, STATUS_ERROR, STATUS_OK};
pub use format::{ExtendedJsonFormat, JsonFormat, PayloadFormat};
pub use server::{ProcessError, ProcessingService};

mod client;
mod envelope;
mod format;
mod server;
