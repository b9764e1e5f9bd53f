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

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::{Framing, MessageType};
use crate::network::MAX_FRAME_LEN;
use crate::{AppError, AppResult};

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Wraps another message type and zlib-compresses its encoded payload.
///
/// The framing of the inner type is kept: the compressed bytes are what
/// travels behind the length header. Both peers must wrap the same way.
#[derive(Debug, Clone, Copy)]
pub struct Compressed<M> {
    inner: M,
    level: u32,
    max_decompressed: usize,
}

impl<M> Compressed<M> {
    pub fn new(inner: M) -> Self {
        Compressed {
            inner,
            level: DEFAULT_COMPRESSION_LEVEL,
            max_decompressed: MAX_FRAME_LEN,
        }
    }

    /// zlib level, 0 (store) to 9 (best).
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Upper bound for the inflated size of one message.
    pub fn with_max_decompressed(mut self, max_decompressed: usize) -> Self {
        self.max_decompressed = max_decompressed;
        self
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn max_decompressed(&self) -> usize {
        self.max_decompressed
    }

    /// Same settings around another inner value.
    pub fn wrap<N>(&self, inner: N) -> Compressed<N> {
        Compressed {
            inner,
            level: self.level,
            max_decompressed: self.max_decompressed,
        }
    }
}

impl<M: Default> Default for Compressed<M> {
    fn default() -> Self {
        Compressed::new(M::default())
    }
}

impl<M: MessageType> MessageType for Compressed<M> {
    type Value = M::Value;

    fn framing(&self) -> Framing {
        self.inner.framing()
    }

    fn encode(&self, value: &M::Value) -> AppResult<Bytes> {
        let plain = self.inner.encode(value)?;
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(plain.len() / 2 + 16),
            Compression::new(self.level),
        );
        encoder
            .write_all(&plain)
            .map_err(|e| AppError::Encode(format!("zlib write failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| AppError::Encode(format!("zlib finish failed: {e}")))?;
        Ok(Bytes::from(compressed))
    }

    fn decode(&self, payload: Bytes) -> AppResult<M::Value> {
        let limit = self.max_decompressed as u64;
        let mut decoder = ZlibDecoder::new(payload.as_ref()).take(limit.saturating_add(1));
        let mut plain = Vec::with_capacity(payload.len().saturating_mul(2));
        decoder
            .read_to_end(&mut plain)
            .map_err(|e| AppError::Decode(format!("zlib inflate failed: {e}")))?;
        if plain.len() as u64 > limit {
            return Err(AppError::Decode(format!(
                "decompressed message exceeds {} bytes",
                self.max_decompressed
            )));
        }
        self.inner.decode(Bytes::from(plain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Framed, Json, RawBytes};

    #[test]
    fn test_compressed_shrinks_repetitive_payload() {
        let message_type = Compressed::new(Framed);
        let payload = Bytes::from(vec![b'a'; 10_000]);
        let encoded = message_type.encode(&payload).unwrap();
        assert!(encoded.len() < 200);
        assert_eq!(message_type.decode(encoded).unwrap(), payload);
    }

    #[test]
    fn test_compressed_keeps_inner_framing() {
        assert_eq!(
            Compressed::new(Framed).framing(),
            Framing::LengthPrefixed
        );
        assert_eq!(
            Compressed::new(RawBytes::with_max_bytes(8)).framing(),
            Framing::Raw { max_bytes: Some(8) }
        );
    }

    #[test]
    fn test_compressed_json() {
        let message_type = Compressed::new(Json::<serde_json::Value>::new()).with_level(9);
        let value = serde_json::json!({"gamma": 0.5, "names": ["a", "b"]});
        let encoded = message_type.encode(&value).unwrap();
        assert_eq!(message_type.decode(encoded).unwrap(), value);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let message_type = Compressed::new(Framed);
        let err = message_type
            .decode(Bytes::from_static(b"definitely not zlib"))
            .unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_inflate_is_bounded() {
        let message_type = Compressed::new(Framed);
        let encoded = message_type
            .encode(&Bytes::from(vec![0u8; 4096]))
            .unwrap();
        let bounded = Compressed::new(Framed).with_max_decompressed(1024);
        let err = bounded.decode(encoded).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
