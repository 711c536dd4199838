use std::fmt;
use std::time::Duration;

use crate::multipart::MultipartError;

/// Errors raised by the test server.
///
/// Configuration errors (`InvalidMethod`, `InvalidCount`) are returned
/// synchronously from [`crate::TestServer::add_response`]. `NoResponse`,
/// `Internal` and `Multipart` only occur inside request handlers, where they
/// are rendered to the client as status 555 instead of being returned.
#[derive(Debug)]
pub enum TestServerError {
    /// `add_response` was given a method outside the supported verbs
    InvalidMethod {
        /// The rejected method name
        method: String,
    },
    /// `add_response` was given a count that is neither `-1` nor positive
    InvalidCount {
        /// The rejected count
        count: i64,
    },
    /// Both the method queue and the wildcard queue are empty
    NoResponse,
    /// A request could not be turned into a well-formed reply
    Internal(String),
    /// The multipart body could not be decoded
    Multipart(MultipartError),
    /// `wait_request` saw no completed request within the timeout
    WaitTimeout {
        /// How long the caller waited
        timeout: Duration,
    },
    /// `get_request` was called before any request was handled
    RequestNotProcessed,
    /// The listening socket could not be created
    Bind {
        /// Address the server tried to bind
        addr: String,
        /// Reason reported by the transport
        reason: String,
    },
    /// `start` was called on a running server
    AlreadyStarted,
    /// The operation needs a bound port but the server is not running
    NotStarted,
}

impl fmt::Display for TestServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestServerError::InvalidMethod { method } => write!(f, "Invalid method: {method}"),
            TestServerError::InvalidCount { count } => write!(
                f,
                "Invalid count: {count}. Use -1 for unlimited reuse or a positive number"
            ),
            TestServerError::NoResponse => write!(f, "No response available"),
            TestServerError::Internal(message) => write!(f, "{message}"),
            TestServerError::Multipart(err) => write!(f, "{err}"),
            TestServerError::WaitTimeout { timeout } => write!(
                f,
                "No request processed in {} seconds",
                timeout.as_secs_f64()
            ),
            TestServerError::RequestNotProcessed => write!(f, "Request has not been processed"),
            TestServerError::Bind { addr, reason } => {
                write!(f, "Failed to bind test server to {addr}: {reason}")
            }
            TestServerError::AlreadyStarted => write!(f, "Test server is already running"),
            TestServerError::NotStarted => write!(f, "Test server is not running"),
        }
    }
}

impl std::error::Error for TestServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TestServerError::Multipart(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MultipartError> for TestServerError {
    fn from(err: MultipartError) -> Self {
        TestServerError::Multipart(err)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TestServerError>;
