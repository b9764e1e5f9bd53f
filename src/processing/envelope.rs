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

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::message::{EValue, FromEJson, ToEJson};
use crate::{AppError, AppResult};

/// Processing options, always plain JSON.
pub type Params = Value;

pub const STATUS_OK: &str = "OK";
pub const STATUS_ERROR: &str = "ERROR";

/// `{"data": ..., "params": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<D> {
    pub data: D,
    #[serde(default)]
    pub params: Params,
}

impl<D> Request<D> {
    pub fn new(data: D, params: Params) -> Self {
        Request { data, params }
    }
}

/// `{"status": "OK", "result": ...}` or `{"status": "ERROR: ...", "result": null}`.
///
/// The result is present exactly when the status is `OK`, which the enum
/// makes impossible to get wrong on the sending side. Decoding rejects an
/// error status that still carries a result.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<D> {
    Ok(D),
    Error(String),
}

impl<D> Response<D> {
    pub fn status(&self) -> String {
        match self {
            Response::Ok(_) => STATUS_OK.to_string(),
            Response::Error(message) => format!("{STATUS_ERROR}: {message}"),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    /// An error status becomes `AppError::RemoteProcessing` with the text
    /// the server at `peer` reported.
    pub fn into_result(self, peer: &str) -> AppResult<D> {
        match self {
            Response::Ok(data) => Ok(data),
            Response::Error(message) => Err(AppError::RemoteProcessing {
                peer: peer.to_string(),
                message,
            }),
        }
    }
}

/// `None` for `OK`, the message for an error status.
fn parse_status(status: &str) -> AppResult<Option<String>> {
    if status == STATUS_OK {
        return Ok(None);
    }
    match status.strip_prefix(STATUS_ERROR) {
        Some("") => Ok(Some(String::new())),
        Some(rest) => match rest.strip_prefix(':') {
            Some(message) => Ok(Some(message.trim_start().to_string())),
            None => Err(AppError::Decode(format!("unknown response status '{status}'"))),
        },
        None => Err(AppError::Decode(format!("unknown response status '{status}'"))),
    }
}

#[derive(Serialize)]
struct WireResponse<'a, D> {
    status: String,
    result: Option<&'a D>,
}

#[derive(Deserialize)]
struct RawResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

impl<D: Serialize> Serialize for Response<D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let result = match self {
            Response::Ok(data) => Some(data),
            Response::Error(_) => None,
        };
        WireResponse {
            status: self.status(),
            result,
        }
        .serialize(serializer)
    }
}

impl<'de, D: DeserializeOwned> Deserialize<'de> for Response<D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let raw = RawResponse::deserialize(deserializer)?;
        match parse_status(&raw.status).map_err(De::Error::custom)? {
            None => D::deserialize(raw.result)
                .map(Response::Ok)
                .map_err(De::Error::custom),
            Some(message) if raw.result.is_null() => Ok(Response::Error(message)),
            Some(_) => Err(De::Error::custom("error response carries a result")),
        }
    }
}

fn into_fields(value: EValue, what: &str) -> AppResult<BTreeMap<String, EValue>> {
    match value {
        EValue::Map(fields) => Ok(fields),
        other => Err(AppError::Decode(format!(
            "{what} must be a map, got {}",
            other.type_name()
        ))),
    }
}

impl<D: ToEJson> ToEJson for Request<D> {
    fn to_ejson(&self) -> EValue {
        let mut fields = BTreeMap::new();
        fields.insert("data".to_string(), self.data.to_ejson());
        fields.insert("params".to_string(), EValue::from(self.params.clone()));
        EValue::Map(fields)
    }
}

impl<D: FromEJson> FromEJson for Request<D> {
    fn from_ejson(value: EValue) -> AppResult<Self> {
        let mut fields = into_fields(value, "request")?;
        let data = fields
            .remove("data")
            .ok_or_else(|| AppError::Decode("request without 'data'".to_string()))?;
        let params = match fields.remove("params") {
            Some(params) => Value::try_from(params)?,
            None => Value::Null,
        };
        Ok(Request {
            data: D::from_ejson(data)?,
            params,
        })
    }
}

impl<D: ToEJson> ToEJson for Response<D> {
    fn to_ejson(&self) -> EValue {
        let result = match self {
            Response::Ok(data) => data.to_ejson(),
            Response::Error(_) => EValue::Null,
        };
        let mut fields = BTreeMap::new();
        fields.insert("status".to_string(), EValue::Str(self.status()));
        fields.insert("result".to_string(), result);
        EValue::Map(fields)
    }
}

impl<D: FromEJson> FromEJson for Response<D> {
    fn from_ejson(value: EValue) -> AppResult<Self> {
        let mut fields = into_fields(value, "response")?;
        let status = match fields.remove("status") {
            Some(EValue::Str(status)) => status,
            Some(other) => {
                return Err(AppError::Decode(format!(
                    "response status must be a string, got {}",
                    other.type_name()
                )))
            }
            None => return Err(AppError::Decode("response without 'status'".to_string())),
        };
        let result = fields.remove("result").unwrap_or(EValue::Null);
        match parse_status(&status)? {
            None => Ok(Response::Ok(D::from_ejson(result)?)),
            Some(message) if result.is_null() => Ok(Response::Error(message)),
            Some(_) => Err(AppError::Decode(
                "error response carries a result".to_string(),
            )),
        }
    }
}
