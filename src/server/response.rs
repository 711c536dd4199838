use http::{HeaderName, HeaderValue, StatusCode};

use crate::canned::{CallbackReply, Response};
use crate::error::{Result, TestServerError};
use crate::headers::HeaderStorage;

/// Status used for every failure inside a request handler.
pub const INTERNAL_ERROR: u16 = 555;

pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Value of the injected `Server` header.
#[must_use]
pub fn server_header() -> String {
    format!("TestServer/{}", env!("CARGO_PKG_VERSION"))
}

/// A reply ready to be framed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub headers: HeaderStorage,
    pub body: Vec<u8>,
}

impl Reply {
    /// Reply taken verbatim from a descriptor with a fixed body.
    #[must_use]
    pub fn fixed(response: &Response, data: &[u8]) -> Self {
        Reply {
            status: response.status,
            headers: response.headers.clone(),
            body: data.to_vec(),
        }
    }

    #[must_use]
    pub fn from_callback(reply: CallbackReply) -> Self {
        Reply {
            status: reply.status.unwrap_or(200),
            headers: reply.headers.into_iter().collect(),
            body: reply.data.unwrap_or_default(),
        }
    }

    /// Plain-text 555 reply carrying the error message.
    #[must_use]
    pub fn internal_error(err: &TestServerError) -> Self {
        Reply {
            status: INTERNAL_ERROR,
            headers: HeaderStorage::new(),
            body: err.to_string().into_bytes(),
        }
    }

    /// Add the headers every non-raw response carries.
    ///
    /// `Listen-Port` always reflects the bound port; `Content-Type` and `Server`
    /// are only added when the reply does not set them.
    pub fn inject_required_headers(&mut self, port: u16) {
        self.headers.set("Listen-Port", port.to_string());
        if !self.headers.contains("content-type") {
            self.headers.add("Content-Type", DEFAULT_CONTENT_TYPE);
        }
        if !self.headers.contains("server") {
            self.headers.add("Server", server_header());
        }
    }

    /// Plain-text 400 for requests that could not be parsed.
    #[must_use]
    pub fn bad_request(reason: &str) -> Self {
        Reply {
            status: 400,
            headers: HeaderStorage::new(),
            body: reason.as_bytes().to_vec(),
        }
    }

    /// Serialize as an HTTP/1.0 response: status line, headers in storage
    /// order, blank line, body.
    ///
    /// Nothing beyond the stored headers is emitted, so no `Date` and no
    /// `Content-Length` unless set; the connection is closed after the body.
    ///
    /// # Errors
    ///
    /// [`TestServerError::Internal`] when a header name or value cannot be
    /// encoded on the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("");
        let mut out = format!("HTTP/1.0 {} {reason}\r\n", self.status).into_bytes();
        for (name, value) in self.headers.items() {
            // HeaderValue rejects CR, LF and non-ASCII bytes
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(TestServerError::Internal(format!(
                    "Invalid response header: {name}: {value}"
                )));
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}
