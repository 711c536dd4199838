//! Canned response descriptors.
//!
//! A [`Response`] describes what the server sends back for one resolved request.
//! The body comes from exactly one [`ResponseBody`] source:
//!
//! - [`ResponseBody::Data`]: fixed bytes with the descriptor's status and headers
//! - [`ResponseBody::Callback`]: a closure invoked per request returning a JSON
//!   reply object (`{"type": "response", "status", "headers", "data"}`)
//! - [`ResponseBody::RawCallback`]: a closure whose bytes are written to the socket
//!   verbatim, bypassing status line, headers and framing
//!
//! ```rust
//! use serde_json::json;
//! use std::time::Duration;
//! use test_server::Response;
//!
//! let fixed = Response::from_data("hello")
//!     .with_status(201)
//!     .with_header("X-A", "1")
//!     .with_header("X-A", "2")
//!     .with_sleep(Duration::from_millis(50));
//!
//! let dynamic = Response::from_callback(|| {
//!     json!({
//!         "type": "response",
//!         "status": 202,
//!         "headers": [["method", "post"]],
//!         "data": b"created".to_vec(),
//!     })
//! });
//!
//! let raw = Response::from_raw_callback(|| b"HTTP/1.1 204 No Content\r\n\r\n".to_vec());
//! # let _ = (fixed, dynamic, raw);
//! ```

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, TestServerError};
use crate::headers::HeaderStorage;

/// Closure producing a structured reply object per request.
pub type CallbackFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Closure producing complete wire bytes per request.
pub type RawCallbackFn = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Where the response body comes from.
#[derive(Clone)]
pub enum ResponseBody {
    Data(Vec<u8>),
    Callback(CallbackFn),
    RawCallback(RawCallbackFn),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Data(Vec::new())
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            ResponseBody::Callback(_) => f.write_str("Callback(..)"),
            ResponseBody::RawCallback(_) => f.write_str("RawCallback(..)"),
        }
    }
}

/// A configured canned response.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code, used by the `Data` source
    pub status: u16,
    /// Headers emitted with the `Data` source; duplicates allowed
    pub headers: HeaderStorage,
    /// Body source
    pub body: ResponseBody,
    /// Delay applied by the handler thread before anything else happens
    pub sleep: Option<Duration>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderStorage::new(),
            body: ResponseBody::default(),
            sleep: None,
        }
    }
}

impl Response {
    /// Empty `200` response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `200` response with a fixed body.
    #[must_use]
    pub fn from_data(data: impl Into<Vec<u8>>) -> Self {
        Self::new().with_data(data)
    }

    /// Response built per request by `callback`.
    #[must_use]
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            body: ResponseBody::Callback(Arc::new(callback)),
            ..Self::default()
        }
    }

    /// Response written to the socket exactly as `callback` returns it.
    #[must_use]
    pub fn from_raw_callback<F>(callback: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            body: ResponseBody::RawCallback(Arc::new(callback)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Append a header; repeated names produce repeated header lines.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(headers);
        self
    }

    /// Replace the body source with fixed bytes.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.body = ResponseBody::Data(data.into());
        self
    }

    #[must_use]
    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = Some(sleep);
        self
    }
}

/// Validated reply returned by a [`ResponseBody::Callback`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackReply {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub data: Option<Vec<u8>>,
}

const CALLBACK_KEYS: [&str; 4] = ["type", "status", "headers", "data"];

fn internal(message: impl Into<String>) -> TestServerError {
    TestServerError::Internal(message.into())
}

fn reply_bytes(value: &Value) -> Result<Vec<u8>> {
    let not_bytes = || internal("Callback response field \"data\" must be bytes");
    let Value::Array(items) = value else {
        return Err(not_bytes());
    };
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(not_bytes)
        })
        .collect()
}

fn reply_status(value: &Value) -> Result<u16> {
    value
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .filter(|n| (100..=999).contains(n))
        .ok_or_else(|| {
            internal(format!(
                "Callback response field \"status\" must be a status code, got {value}"
            ))
        })
}

fn reply_headers(value: &Value) -> Result<Vec<(String, String)>> {
    let invalid = || {
        internal(
            "Callback response field \"headers\" must be a list of [name, value] pairs or an object",
        )
    };
    match value {
        Value::Array(pairs) => pairs
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(name), Value::String(val)]) => Ok((name.clone(), val.clone())),
                _ => Err(invalid()),
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, val)| match val {
                Value::String(val) => Ok((name.clone(), val.clone())),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn check_reply_keys(map: &Map<String, Value>) -> Result<()> {
    match map.get("type") {
        Some(Value::String(kind)) if kind == "response" => {}
        Some(other) => {
            let shown = other.as_str().map_or_else(|| other.to_string(), str::to_string);
            return Err(internal(format!(
                "Callback response has invalid type key: {shown}"
            )));
        }
        None => return Err(internal("Callback response has invalid type key: NA")),
    }
    if let Some(key) = map.keys().find(|k| !CALLBACK_KEYS.contains(&k.as_str())) {
        return Err(internal(format!(
            "Callback response contains invalid key: {key}"
        )));
    }
    Ok(())
}

impl CallbackReply {
    /// Validate the object returned by a callback.
    ///
    /// # Errors
    ///
    /// [`TestServerError::Internal`] when the value is not an object, its `type` is
    /// not `"response"`, it carries keys other than `type`/`status`/`headers`/`data`,
    /// or a field has the wrong shape (`data` must be a byte array, not a string).
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(internal("Callback response is not a dict"));
        };
        check_reply_keys(map)?;
        Ok(CallbackReply {
            status: map.get("status").map(reply_status).transpose()?,
            headers: map
                .get("headers")
                .map(reply_headers)
                .transpose()?
                .unwrap_or_default(),
            data: map.get("data").map(reply_bytes).transpose()?,
        })
    }
}
