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

use std::time::Duration;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// transport errors, carry the peer they happened with
    #[error("transport error with {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} while {operation} (peer {peer})")]
    Timeout {
        operation: &'static str,
        peer: String,
        after: Duration,
    },

    #[error("exchange with {peer} cancelled after {elapsed:?}")]
    Cancelled { peer: String, elapsed: Duration },

    #[error("connection closed by peer")]
    ConnectionClosed,

    /// framing errors
    #[error("invalid message header: {0}")]
    InvalidHeader(String),

    #[error("truncated message: received {received} of {expected} byte(s)")]
    TruncatedMessage { expected: usize, received: usize },

    /// payload errors
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// the server reported that the processing callback failed
    #[error("remote processing error from {peer}: {message}")]
    RemoteProcessing { peer: String, message: String },

    /// marker error
    #[error("incomplete frame")]
    Incomplete,
}

impl AppError {
    /// Malformed framing, as opposed to a clean end of stream.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            AppError::InvalidHeader(_) | AppError::TruncatedMessage { .. }
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Transport { .. } | AppError::IoError(_) | AppError::ConnectionClosed
        )
    }

    pub(crate) fn transport(peer: &str, source: std::io::Error) -> Self {
        AppError::Transport {
            peer: peer.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_distinguishable() {
        assert!(AppError::InvalidHeader("short".into()).is_protocol());
        assert!(AppError::TruncatedMessage {
            expected: 10,
            received: 3
        }
        .is_protocol());
        assert!(!AppError::ConnectionClosed.is_protocol());
        assert!(AppError::ConnectionClosed.is_transport());
        assert!(!AppError::Decode("bad json".into()).is_transport());
    }

    #[test]
    fn messages_carry_context() {
        let err = AppError::transport(
            "127.0.0.1:7214",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.to_string(), "transport error with 127.0.0.1:7214: refused");

        let err = AppError::TruncatedMessage {
            expected: 8,
            received: 2,
        };
        assert_eq!(err.to_string(), "truncated message: received 2 of 8 byte(s)");

        let err = AppError::Timeout {
            operation: "reading",
            peer: "127.0.0.1:7214".to_string(),
            after: Duration::from_millis(200),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 200ms while reading (peer 127.0.0.1:7214)"
        );

        let err = AppError::Cancelled {
            peer: "127.0.0.1:7214".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "exchange with 127.0.0.1:7214 cancelled after 1.5s"
        );
    }
}
