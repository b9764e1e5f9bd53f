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

//! Message types
//!
//! A message type is a stateless strategy that turns a typed value into the
//! payload bytes of one message and back. The [`Connection`] does the actual
//! I/O and asks the message type how the payload is delimited on the wire.
//!
//! # Variants
//!
//! - [`RawBytes`]: bytes as they are, no header, read until the peer closes
//! - [`Framed`]: bytes behind a 4-byte length header
//! - [`Compressed`]: zlib around any other message type
//! - [`Json`]: ASCII-only JSON text of a serde type
//! - [`ExtendedJson`]: JSON with tagged tuples, byte buffers, arrays, ...
//! - [`NumericArray`]: self-describing binary n-dimensional arrays
//!
//! Both peers have to agree on the message type (and on compression) out of
//! band; nothing in the payload says which one was used.
//!
//! [`Connection`]: crate::network::Connection

use bytes::Bytes;

use crate::AppResult;

pub use compressed::Compressed;
pub use ejson::{EValue, ExtendedJson, FromEJson, ToEJson};
pub use json::Json;
pub use ndarray::{DType, Element, NdArray, NumericArray};

mod compressed;
mod ejson;
mod json;
mod ndarray;

/// How a payload is delimited on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Written as is; the receiver reads until the peer closes or
    /// `max_bytes` were received.
    Raw { max_bytes: Option<usize> },
    /// Written behind a big-endian `u32` length header.
    LengthPrefixed,
}

pub trait MessageType: Send + Sync {
    type Value: Send;

    fn framing(&self) -> Framing {
        Framing::LengthPrefixed
    }

    fn encode(&self, value: &Self::Value) -> AppResult<Bytes>;

    fn decode(&self, payload: Bytes) -> AppResult<Self::Value>;
}

/// Plain bytes without any framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes {
    pub max_bytes: Option<usize>,
}

impl RawBytes {
    pub fn new() -> Self {
        RawBytes { max_bytes: None }
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        RawBytes {
            max_bytes: Some(max_bytes),
        }
    }
}

impl MessageType for RawBytes {
    type Value = Bytes;

    fn framing(&self) -> Framing {
        Framing::Raw {
            max_bytes: self.max_bytes,
        }
    }

    fn encode(&self, value: &Bytes) -> AppResult<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, payload: Bytes) -> AppResult<Bytes> {
        Ok(payload)
    }
}

/// Byte messages of up to 4 GiB behind a length header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Framed;

impl MessageType for Framed {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> AppResult<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, payload: Bytes) -> AppResult<Bytes> {
        Ok(payload)
    }
}
