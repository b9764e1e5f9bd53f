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

//! Network Module Implementation
//!
//! Framing and connection handling shared by the server and the client.
//!
//! # Wire format
//!
//! Every framed message is a 4-byte big-endian unsigned length `L` followed
//! by exactly `L` payload bytes. There is no magic number, version byte or
//! checksum; both ends agree on message type and compression out of band.
//!
//! # Components
//!
//! - `Frame`: incremental parsing of length-prefixed frames from a read buffer
//! - `Connection`: typed send/receive over one owned stream, with optional
//!   read/write deadlines

pub use connection::Connection;
pub use frame::{Frame, FRAME_HEADER_LEN, MAX_FRAME_LEN};
mod connection;
mod frame;
