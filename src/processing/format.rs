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

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::envelope::{Request, Response};
use crate::message::{Compressed, EValue, ExtendedJson, FromEJson, Json, MessageType, ToEJson};

/// Picks the message types both envelopes travel as.
///
/// Server and client must be built with the same format.
pub trait PayloadFormat: Send + Sync + 'static {
    type Data: Send + Sync + 'static;
    type RequestType: MessageType<Value = Request<Self::Data>>;
    type ResponseType: MessageType<Value = Response<Self::Data>>;

    fn request_type(&self) -> Self::RequestType;

    fn response_type(&self) -> Self::ResponseType;
}

/// Envelopes as plain JSON.
pub struct JsonFormat<D = Value> {
    _phantom: PhantomData<fn() -> D>,
}

impl<D> JsonFormat<D> {
    pub fn new() -> Self {
        JsonFormat {
            _phantom: PhantomData,
        }
    }
}

impl<D> Default for JsonFormat<D> {
    fn default() -> Self {
        JsonFormat::new()
    }
}

impl<D> Clone for JsonFormat<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for JsonFormat<D> {}

impl<D> std::fmt::Debug for JsonFormat<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonFormat<{}>", std::any::type_name::<D>())
    }
}

impl<D> PayloadFormat for JsonFormat<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Data = D;
    type RequestType = Json<Request<D>>;
    type ResponseType = Json<Response<D>>;

    fn request_type(&self) -> Self::RequestType {
        Json::new()
    }

    fn response_type(&self) -> Self::ResponseType {
        Json::new()
    }
}

/// Envelopes as extended JSON, so payloads can be tuples, byte strings or
/// n-dimensional arrays.
pub struct ExtendedJsonFormat<D = EValue> {
    _phantom: PhantomData<fn() -> D>,
}

impl<D> ExtendedJsonFormat<D> {
    pub fn new() -> Self {
        ExtendedJsonFormat {
            _phantom: PhantomData,
        }
    }
}

impl<D> Default for ExtendedJsonFormat<D> {
    fn default() -> Self {
        ExtendedJsonFormat::new()
    }
}

impl<D> Clone for ExtendedJsonFormat<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for ExtendedJsonFormat<D> {}

impl<D> std::fmt::Debug for ExtendedJsonFormat<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtendedJsonFormat<{}>", std::any::type_name::<D>())
    }
}

impl<D> PayloadFormat for ExtendedJsonFormat<D>
where
    D: ToEJson + FromEJson + Send + Sync + 'static,
{
    type Data = D;
    type RequestType = ExtendedJson<Request<D>>;
    type ResponseType = ExtendedJson<Response<D>>;

    fn request_type(&self) -> Self::RequestType {
        ExtendedJson::new()
    }

    fn response_type(&self) -> Self::ResponseType {
        ExtendedJson::new()
    }
}

/// Both envelopes zlib-compressed with the wrapper's level and limit.
impl<F: PayloadFormat> PayloadFormat for Compressed<F> {
    type Data = F::Data;
    type RequestType = Compressed<F::RequestType>;
    type ResponseType = Compressed<F::ResponseType>;

    fn request_type(&self) -> Self::RequestType {
        self.wrap(self.inner().request_type())
    }

    fn response_type(&self) -> Self::ResponseType {
        self.wrap(self.inner().response_type())
    }
}
