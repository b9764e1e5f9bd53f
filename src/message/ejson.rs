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

//! Extended JSON
//!
//! JSON can not tell a tuple from a list and has no byte strings, complex
//! numbers, non-finite floats or arrays. [`EValue`] models those types and is
//! written as plain JSON where possible; everything else becomes an object
//! tagged with the `"__ejson__"` key:
//!
//! | value            | JSON                                                  |
//! |------------------|-------------------------------------------------------|
//! | tuple            | `{"__ejson__": "tuple", "items": [...]}`              |
//! | bytes            | `{"__ejson__": "bytes", "base64": "..."}`             |
//! | n-d array        | `{"__ejson__": "ndarray", "base64": "<NDAR blob>"}`   |
//! | complex          | `{"__ejson__": "complex", "re": 1.0, "im": -2.0}`     |
//! | NaN / ±infinity  | `{"__ejson__": "float", "value": "nan"}`              |
//! | map owning a key `"__ejson__"` | `{"__ejson__": "map", "items": {...}}`  |
//!
//! Both peers use the same table; an unknown tag is a decode error.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Number, Value};

use super::json::{from_slice, to_ascii_vec};
use super::ndarray::NdArray;
use super::MessageType;
use crate::{AppError, AppResult};

pub const TAG_KEY: &str = "__ejson__";

#[derive(Debug, Clone, PartialEq)]
pub enum EValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<EValue>),
    Tuple(Vec<EValue>),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, EValue>),
    Array(NdArray),
    Complex { re: f64, im: f64 },
}

impl EValue {
    pub fn get(&self, key: &str) -> Option<&EValue> {
        match self {
            EValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EValue::Int(v) => Some(*v as f64),
            EValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, EValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EValue::Null => "null",
            EValue::Bool(_) => "bool",
            EValue::Int(_) => "int",
            EValue::Float(_) => "float",
            EValue::Str(_) => "str",
            EValue::List(_) => "list",
            EValue::Tuple(_) => "tuple",
            EValue::Bytes(_) => "bytes",
            EValue::Map(_) => "map",
            EValue::Array(_) => "ndarray",
            EValue::Complex { .. } => "complex",
        }
    }

    /// Tagged JSON representation.
    pub fn to_json(&self) -> Value {
        match self {
            EValue::Null => Value::Null,
            EValue::Bool(b) => Value::Bool(*b),
            EValue::Int(i) => Value::from(*i),
            EValue::Float(f) => match Number::from_f64(*f) {
                Some(n) => Value::Number(n),
                None => tagged("float", [("value", Value::from(non_finite_name(*f)))]),
            },
            EValue::Str(s) => Value::String(s.clone()),
            EValue::List(items) => Value::Array(items.iter().map(EValue::to_json).collect()),
            EValue::Tuple(items) => tagged(
                "tuple",
                [(
                    "items",
                    Value::Array(items.iter().map(EValue::to_json).collect()),
                )],
            ),
            EValue::Bytes(bytes) => {
                tagged("bytes", [("base64", Value::from(BASE64.encode(bytes)))])
            }
            EValue::Map(map) => {
                let items: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                if map.contains_key(TAG_KEY) {
                    tagged("map", [("items", Value::Object(items))])
                } else {
                    Value::Object(items)
                }
            }
            EValue::Array(array) => tagged(
                "ndarray",
                [("base64", Value::from(BASE64.encode(array.to_bytes())))],
            ),
            EValue::Complex { re, im } => {
                tagged("complex", [("re", float_json(*re)), ("im", float_json(*im))])
            }
        }
    }

    /// Inverse of [`EValue::to_json`].
    pub fn from_json(value: Value) -> AppResult<EValue> {
        let evalue = match value {
            Value::Null => EValue::Null,
            Value::Bool(b) => EValue::Bool(b),
            Value::Number(n) => number_to_evalue(&n)?,
            Value::String(s) => EValue::Str(s),
            Value::Array(items) => EValue::List(
                items
                    .into_iter()
                    .map(EValue::from_json)
                    .collect::<AppResult<_>>()?,
            ),
            Value::Object(mut map) => match map.remove(TAG_KEY) {
                None => EValue::Map(
                    map.into_iter()
                        .map(|(k, v)| Ok((k, EValue::from_json(v)?)))
                        .collect::<AppResult<_>>()?,
                ),
                Some(tag) => untag(tag, map)?,
            },
        };
        Ok(evalue)
    }
}

fn tagged<const N: usize>(tag: &str, fields: [(&str, Value); N]) -> Value {
    let mut map = Map::with_capacity(N + 1);
    map.insert(TAG_KEY.to_string(), Value::from(tag));
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f > 0.0 {
        "inf"
    } else {
        "-inf"
    }
}

fn float_json(f: f64) -> Value {
    match Number::from_f64(f) {
        Some(n) => Value::Number(n),
        None => tagged("float", [("value", Value::from(non_finite_name(f)))]),
    }
}

fn number_to_evalue(n: &Number) -> AppResult<EValue> {
    if let Some(i) = n.as_i64() {
        Ok(EValue::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(EValue::Float(f))
    } else {
        Err(AppError::Decode(format!("number {n} is out of range")))
    }
}

fn json_to_f64(value: Value) -> AppResult<f64> {
    match EValue::from_json(value)? {
        EValue::Int(i) => Ok(i as f64),
        EValue::Float(f) => Ok(f),
        other => Err(AppError::Decode(format!("expected a number, got {other:?}"))),
    }
}

fn unsupported(tag: &str, detail: &str) -> AppError {
    AppError::Decode(format!("unsupported extended type '{tag}': {detail}"))
}

fn take_field(map: &mut Map<String, Value>, tag: &str, key: &str) -> AppResult<Value> {
    map.remove(key)
        .ok_or_else(|| unsupported(tag, &format!("missing field '{key}'")))
}

fn take_base64(map: &mut Map<String, Value>, tag: &str) -> AppResult<Vec<u8>> {
    match take_field(map, tag, "base64")? {
        Value::String(text) => BASE64
            .decode(text.as_bytes())
            .map_err(|e| unsupported(tag, &format!("invalid base64: {e}"))),
        _ => Err(unsupported(tag, "'base64' is not a string")),
    }
}

fn untag(tag: Value, mut map: Map<String, Value>) -> AppResult<EValue> {
    let tag = match tag {
        Value::String(tag) => tag,
        other => return Err(unsupported(&other.to_string(), "tag is not a string")),
    };
    let evalue = match tag.as_str() {
        "tuple" => match take_field(&mut map, &tag, "items")? {
            Value::Array(items) => EValue::Tuple(
                items
                    .into_iter()
                    .map(EValue::from_json)
                    .collect::<AppResult<_>>()?,
            ),
            _ => return Err(unsupported(&tag, "'items' is not a list")),
        },
        "bytes" => EValue::Bytes(take_base64(&mut map, &tag)?),
        "ndarray" => {
            let blob = take_base64(&mut map, &tag)?;
            EValue::Array(NdArray::from_bytes(Bytes::from(blob))?)
        }
        "complex" => EValue::Complex {
            re: json_to_f64(take_field(&mut map, &tag, "re")?)?,
            im: json_to_f64(take_field(&mut map, &tag, "im")?)?,
        },
        "float" => match take_field(&mut map, &tag, "value")? {
            Value::String(name) => match name.as_str() {
                "nan" => EValue::Float(f64::NAN),
                "inf" => EValue::Float(f64::INFINITY),
                "-inf" => EValue::Float(f64::NEG_INFINITY),
                _ => return Err(unsupported(&tag, &format!("unknown float '{name}'"))),
            },
            _ => return Err(unsupported(&tag, "'value' is not a string")),
        },
        "map" => match take_field(&mut map, &tag, "items")? {
            Value::Object(items) => EValue::Map(
                items
                    .into_iter()
                    .map(|(k, v)| Ok((k, EValue::from_json(v)?)))
                    .collect::<AppResult<_>>()?,
            ),
            _ => return Err(unsupported(&tag, "'items' is not an object")),
        },
        _ => return Err(unsupported(&tag, "unknown tag")),
    };
    if let Some(key) = map.keys().next() {
        return Err(unsupported(&tag, &format!("unexpected field '{key}'")));
    }
    Ok(evalue)
}

/// Conversion into the extended value model.
pub trait ToEJson {
    fn to_ejson(&self) -> EValue;
}

/// Conversion out of the extended value model.
pub trait FromEJson: Sized {
    fn from_ejson(value: EValue) -> AppResult<Self>;
}

impl ToEJson for EValue {
    fn to_ejson(&self) -> EValue {
        self.clone()
    }
}

impl FromEJson for EValue {
    fn from_ejson(value: EValue) -> AppResult<Self> {
        Ok(value)
    }
}

impl ToEJson for NdArray {
    fn to_ejson(&self) -> EValue {
        EValue::Array(self.clone())
    }
}

impl FromEJson for NdArray {
    fn from_ejson(value: EValue) -> AppResult<Self> {
        match value {
            EValue::Array(array) => Ok(array),
            other => Err(AppError::Decode(format!("expected an array, got {other:?}"))),
        }
    }
}

impl From<bool> for EValue {
    fn from(value: bool) -> Self {
        EValue::Bool(value)
    }
}

impl From<i64> for EValue {
    fn from(value: i64) -> Self {
        EValue::Int(value)
    }
}

impl From<f64> for EValue {
    fn from(value: f64) -> Self {
        EValue::Float(value)
    }
}

impl From<&str> for EValue {
    fn from(value: &str) -> Self {
        EValue::Str(value.to_string())
    }
}

impl From<String> for EValue {
    fn from(value: String) -> Self {
        EValue::Str(value)
    }
}

impl From<Vec<EValue>> for EValue {
    fn from(value: Vec<EValue>) -> Self {
        EValue::List(value)
    }
}

impl From<NdArray> for EValue {
    fn from(value: NdArray) -> Self {
        EValue::Array(value)
    }
}

impl From<BTreeMap<String, EValue>> for EValue {
    fn from(value: BTreeMap<String, EValue>) -> Self {
        EValue::Map(value)
    }
}

/// Plain JSON is a subset of extended JSON. Objects are taken literally,
/// a `"__ejson__"` key in the input stays an ordinary key.
impl From<Value> for EValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => EValue::Null,
            Value::Bool(b) => EValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => EValue::Int(i),
                None => EValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => EValue::Str(s),
            Value::Array(items) => EValue::List(items.into_iter().map(EValue::from).collect()),
            Value::Object(map) => {
                EValue::Map(map.into_iter().map(|(k, v)| (k, EValue::from(v))).collect())
            }
        }
    }
}

/// Back to plain JSON. Tuples become lists; bytes, arrays, complex numbers
/// and non-finite floats have no plain form and are a decode error.
impl TryFrom<EValue> for Value {
    type Error = AppError;

    fn try_from(value: EValue) -> AppResult<Value> {
        let json = match value {
            EValue::Null => Value::Null,
            EValue::Bool(b) => Value::Bool(b),
            EValue::Int(i) => Value::from(i),
            EValue::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| AppError::Decode(format!("{f} is not plain JSON")))?,
            EValue::Str(s) => Value::String(s),
            EValue::List(items) | EValue::Tuple(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<AppResult<_>>()?,
            ),
            EValue::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<AppResult<_>>()?,
            ),
            other @ (EValue::Bytes(_) | EValue::Array(_) | EValue::Complex { .. }) => {
                return Err(AppError::Decode(format!(
                    "{} is not plain JSON",
                    other.type_name()
                )))
            }
        };
        Ok(json)
    }
}

/// Extended JSON message type.
pub struct ExtendedJson<T = EValue> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> ExtendedJson<T> {
    pub fn new() -> Self {
        ExtendedJson {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for ExtendedJson<T> {
    fn default() -> Self {
        ExtendedJson::new()
    }
}

impl<T> Clone for ExtendedJson<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExtendedJson<T> {}

impl<T> std::fmt::Debug for ExtendedJson<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtendedJson<{}>", std::any::type_name::<T>())
    }
}

impl<T> MessageType for ExtendedJson<T>
where
    T: ToEJson + FromEJson + Send,
{
    type Value = T;

    fn encode(&self, value: &T) -> AppResult<Bytes> {
        to_ascii_vec(&value.to_ejson().to_json()).map(Bytes::from)
    }

    fn decode(&self, payload: Bytes) -> AppResult<T> {
        let json: Value = from_slice(&payload)?;
        T::from_ejson(EValue::from_json(json)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::DType;

    fn round_trip(value: &EValue) -> EValue {
        let message_type = ExtendedJson::<EValue>::new();
        message_type
            .decode(message_type.encode(value).unwrap())
            .unwrap()
    }

    #[test]
    fn test_tuple_is_not_a_list() {
        let tuple = EValue::Tuple(vec![EValue::Int(1), EValue::from("a")]);
        let list = EValue::List(vec![EValue::Int(1), EValue::from("a")]);
        assert_eq!(round_trip(&tuple), tuple);
        assert_eq!(round_trip(&list), list);
        assert_eq!(
            tuple.to_json(),
            json!({"__ejson__": "tuple", "items": [1, "a"]})
        );
    }

    #[test]
    fn test_extended_types_round_trip() {
        let array = NdArray::from_vec(vec![2, 2], vec![0u8, 64, 128, 255]).unwrap();
        let mut map = BTreeMap::new();
        map.insert("image".to_string(), EValue::Array(array.clone()));
        map.insert("raw".to_string(), EValue::Bytes(vec![0, 1, 2, 254, 255]));
        map.insert("z".to_string(), EValue::Complex { re: 1.5, im: -2.0 });
        map.insert("inf".to_string(), EValue::Float(f64::NEG_INFINITY));
        map.insert(
            "nested".to_string(),
            EValue::List(vec![EValue::Tuple(vec![]), EValue::Null, EValue::Bool(true)]),
        );
        let value = EValue::Map(map);

        let decoded = round_trip(&value);
        assert_eq!(decoded, value);
        let image = decoded.get("image").unwrap();
        assert_eq!(NdArray::from_ejson(image.clone()).unwrap().dtype(), DType::U8);
    }

    #[test]
    fn test_nan_survives() {
        match round_trip(&EValue::Float(f64::NAN)) {
            EValue::Float(f) => assert!(f.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_map_with_tag_key_is_escaped() {
        let mut map = BTreeMap::new();
        map.insert(TAG_KEY.to_string(), EValue::from("tuple"));
        map.insert("items".to_string(), EValue::List(vec![]));
        let value = EValue::Map(map);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_unknown_tag_is_decode_error() {
        let message_type = ExtendedJson::<EValue>::new();
        for payload in [
            r#"{"__ejson__": "set", "items": [1]}"#,
            r#"{"__ejson__": "bytes", "base64": "@@@"}"#,
            r#"{"__ejson__": "tuple"}"#,
            r#"{"__ejson__": 3}"#,
            r#"{"__ejson__": "complex", "re": 1, "im": 2, "extra": 0}"#,
        ] {
            let err = message_type
                .decode(Bytes::from(payload.to_string()))
                .unwrap_err();
            assert!(matches!(err, AppError::Decode(_)), "{payload}");
        }
    }

    #[test]
    fn test_plain_json_is_valid_ejson() {
        let plain = json!({"gamma": 0.5, "names": ["a", "b"], "n": 3});
        let value = EValue::from(plain.clone());
        assert_eq!(value.to_json(), plain);
        assert_eq!(value.get("gamma").and_then(EValue::as_f64), Some(0.5));
        assert_eq!(Value::try_from(value).unwrap(), plain);
    }

    #[test]
    fn test_extended_types_have_no_plain_form() {
        let tuple = EValue::Tuple(vec![EValue::Int(1), EValue::Int(2)]);
        assert_eq!(Value::try_from(tuple).unwrap(), json!([1, 2]));
        assert!(matches!(
            Value::try_from(EValue::Bytes(vec![1])),
            Err(AppError::Decode(_))
        ));
        assert!(matches!(
            Value::try_from(EValue::Float(f64::INFINITY)),
            Err(AppError::Decode(_))
        ));
    }
}
