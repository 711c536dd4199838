//! # test-server
//!
//! An embeddable HTTP server for test suites. Tests script the replies in advance,
//! point the code under test at the server, then assert on what actually arrived.
//!
//! ## Overview
//!
//! - Canned responses are queued per HTTP method, or for any method, each with a
//!   reuse count (`-1` for unlimited)
//! - Every handled request is captured as an immutable [`RequestSnapshot`]
//!   (method, path, query, headers with duplicates, cookies, body, multipart files)
//! - Replies can be fixed bytes, built per request by a callback, or written to the
//!   socket verbatim for wire-level tests
//! - Anything that goes wrong inside a handler comes back as status **555** with
//!   the error text as the body, so failures are assertable over HTTP
//!
//! ## Architecture
//!
//! - **[`headers`]** - Case-insensitive, order-preserving header multimap
//! - **[`multipart`]** - `multipart/form-data` decoder with a part-count limit
//! - **[`canned`]** - Response descriptors and the callback reply contract
//! - **[`resolver`]** - Per-method and wildcard FIFO queues with reuse counts
//! - **[`server`]** - Accept loop, per-request handler and the [`TestServer`] façade
//! - **[`config`]** / **[`logging`]** - Environment-driven settings and tracing setup
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Test
//!     participant Server as TestServer
//!     participant Handler as RequestHandler
//!     participant Resolver as ResponseResolver
//!     participant Client as Code under test
//!
//!     Test->>Server: add_response(Response, count, method)
//!     Server->>Resolver: queue descriptor
//!     Client->>Handler: HTTP request
//!     Handler->>Resolver: get_response(method)
//!     Resolver-->>Handler: descriptor or NoResponse
//!     Handler->>Server: record RequestSnapshot
//!     Handler-->>Client: rendered reply (or 555)
//!     Test->>Server: wait_request / get_request
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use test_server::{Response, TestServer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TestServer::new("127.0.0.1", 0);
//! server.start()?;
//!
//! server.add_response(
//!     Response::from_data(r#"{"ok":true}"#)
//!         .with_status(201)
//!         .with_header("Content-Type", "application/json"),
//!     1,
//!     Some("post"),
//! )?;
//! server.add_response(Response::from_data("fallback"), -1, None)?;
//!
//! let url = server.get_url("/items?limit=10", None)?;
//! // ... run the client under test against `url` ...
//! server.wait_request(Duration::from_secs(5))?;
//!
//! let request = server.get_request()?;
//! assert_eq!(request.method, "POST");
//! assert_eq!(request.args["limit"], "10");
//! server.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing one server across tests
//!
//! All methods take `&self`, so a test binary can keep one instance in a
//! `static OnceLock<TestServer>` and call [`TestServer::reset`] at the start of
//! each test.

pub mod canned;
pub mod config;
pub mod error;
pub mod headers;
pub mod ids;
pub mod logging;
pub mod multipart;
pub mod resolver;
pub mod server;

pub use canned::{CallbackReply, Response, ResponseBody};
pub use config::ServerConfig;
pub use error::{Result, TestServerError};
pub use headers::HeaderStorage;
pub use ids::RequestId;
pub use multipart::{MultipartError, UploadedFile};
pub use resolver::{ResponseResolver, VALID_METHODS};
pub use server::{Cookie, RequestSnapshot, TestServer, INTERNAL_ERROR};
