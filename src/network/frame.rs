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

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Size of the big-endian length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload a 4-byte header can describe.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Most buffer space reserved for a body before its bytes arrive; the read
/// buffer grows past this only as the payload actually comes in.
const MAX_BODY_RESERVE: usize = 64 * 1024;

/// One length-prefixed unit on the wire: `[u32 BE length][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    /// Appends `payload` with its header to `buffer`, so that the whole frame
    /// goes out in a single write.
    pub fn encode(payload: &[u8], buffer: &mut BytesMut) -> AppResult<()> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(AppError::InvalidValue(format!(
                "payload of {} bytes does not fit a {}-byte frame header",
                payload.len(),
                FRAME_HEADER_LEN
            )));
        }
        buffer.reserve(FRAME_HEADER_LEN + payload.len());
        buffer.put_u32(payload.len() as u32);
        buffer.put_slice(payload);
        Ok(())
    }

    /// Checks whether `buffer` holds a complete frame.
    ///
    /// Returns `Err(Incomplete)` when more bytes have to be read from the
    /// socket, and `InvalidHeader` when the declared length exceeds
    /// `max_frame_len`; the connection should be closed in that case.
    pub fn check(buffer: &mut BytesMut, max_frame_len: usize) -> AppResult<()> {
        if buffer.remaining() < FRAME_HEADER_LEN {
            return Err(Incomplete);
        }
        let body_size = Self::declared_len(buffer);
        if body_size > max_frame_len {
            return Err(AppError::InvalidHeader(format!(
                "frame of length {} is too large (limit {})",
                body_size, max_frame_len
            )));
        }
        if buffer.remaining() < body_size + FRAME_HEADER_LEN {
            let missing = body_size + FRAME_HEADER_LEN - buffer.remaining();
            buffer.reserve(missing.min(MAX_BODY_RESERVE));
            return Err(Incomplete);
        }
        Ok(())
    }

    /// Splits one frame off the front of `buffer`.
    pub fn parse(buffer: &mut BytesMut, max_frame_len: usize) -> AppResult<Option<Frame>> {
        // perform a check to ensure we have enough data
        match Frame::check(buffer, max_frame_len) {
            Ok(_) => {
                let body_length = buffer.get_u32() as usize;
                let payload = buffer.split_to(body_length).freeze();
                Ok(Some(Frame { payload }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Classifies what is left in `buffer` once the peer has closed its side.
    ///
    /// Nothing left is the normal end of stream. A partial header or a header
    /// followed by fewer bytes than it declares are protocol violations.
    pub fn at_eof(buffer: &mut BytesMut, max_frame_len: usize) -> AppResult<Option<Frame>> {
        if let Some(frame) = Frame::parse(buffer, max_frame_len)? {
            return Ok(Some(frame));
        }
        if buffer.is_empty() {
            return Ok(None);
        }
        if buffer.remaining() < FRAME_HEADER_LEN {
            return Err(AppError::InvalidHeader(format!(
                "stream closed after {} of {} header bytes",
                buffer.remaining(),
                FRAME_HEADER_LEN
            )));
        }
        Err(AppError::TruncatedMessage {
            expected: Self::declared_len(buffer),
            received: buffer.remaining() - FRAME_HEADER_LEN,
        })
    }

    fn declared_len(buffer: &BytesMut) -> usize {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&buffer[..FRAME_HEADER_LEN]);
        u32::from_be_bytes(header) as usize
    }
}
