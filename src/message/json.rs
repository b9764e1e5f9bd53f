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

use std::io;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::Formatter;

use super::MessageType;
use crate::{AppError, AppResult};

/// JSON text of any serde type, restricted to ASCII on the wire.
pub struct Json<T = serde_json::Value> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Json<T> {
    pub fn new() -> Self {
        Json {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Json::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Json<T> {}

impl<T> std::fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T> MessageType for Json<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    type Value = T;

    fn encode(&self, value: &T) -> AppResult<Bytes> {
        to_ascii_vec(value).map(Bytes::from)
    }

    fn decode(&self, payload: Bytes) -> AppResult<T> {
        from_slice(&payload)
    }
}

/// Serializes `value` as compact JSON with every non-ASCII character escaped.
pub(crate) fn to_ascii_vec<T: Serialize + ?Sized>(value: &T) -> AppResult<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| AppError::Encode(format!("json: {e}")))?;
    Ok(out)
}

pub(crate) fn from_slice<T: DeserializeOwned>(payload: &[u8]) -> AppResult<T> {
    serde_json::from_slice(payload).map_err(|e| AppError::Decode(format!("json: {e}")))
}

/// Compact formatter that writes `\uXXXX` escapes for everything outside
/// ASCII, using surrogate pairs above the BMP.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_output_is_ascii() {
        let value = json!({"name": "Grüße", "emoji": "\u{1F600}", "plain": "abc"});
        let encoded = Json::<serde_json::Value>::new().encode(&value).unwrap();
        assert!(encoded.is_ascii());
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("Gr\\u00fc\\u00dfe"));
        assert!(text.contains("\\ud83d\\ude00"));
        assert_eq!(Json::<serde_json::Value>::new().decode(encoded).unwrap(), value);
    }

    #[test]
    fn test_json_native_values_round_trip() {
        let message_type = Json::<serde_json::Value>::new();
        for value in [
            json!(null),
            json!(true),
            json!(-17),
            json!(2.5),
            json!("quote \" and newline \n"),
            json!([1, "two", [3.0], {}]),
            json!({"nested": {"list": [null, false]}}),
        ] {
            let encoded = message_type.encode(&value).unwrap();
            assert_eq!(message_type.decode(encoded).unwrap(), value);
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        gamma: f64,
        invert: bool,
    }

    #[test]
    fn test_typed_values() {
        let message_type = Json::<Params>::new();
        let params = Params {
            gamma: 0.5,
            invert: false,
        };
        let encoded = message_type.encode(&params).unwrap();
        assert_eq!(encoded.as_ref(), br#"{"gamma":0.5,"invert":false}"#);
        assert_eq!(message_type.decode(encoded).unwrap(), params);
    }

    #[test]
    fn test_invalid_payload_is_decode_error() {
        let message_type = Json::<serde_json::Value>::new();
        for payload in [&b"{not json"[..], &[0xff, 0xfe][..], &b""[..]] {
            let err = message_type
                .decode(Bytes::copy_from_slice(payload))
                .unwrap_err();
            assert!(matches!(err, AppError::Decode(_)), "{payload:?}");
        }
        let err = Json::<Params>::new()
            .decode(Bytes::from_static(br#"{"gamma":"high"}"#))
            .unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }
}
