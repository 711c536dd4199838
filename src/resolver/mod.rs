//! # Resolver Module
//!
//! Decides which canned [`Response`](crate::Response) answers the next request.
//!
//! ## Overview
//!
//! Responses are queued per HTTP method, plus one wildcard queue for responses
//! registered without a method. Each queued entry carries a reuse count:
//!
//! - `-1` keeps the entry forever
//! - `n > 0` serves it `n` times, then drops it
//!
//! ## Resolution order
//!
//! For an incoming request with method `M`:
//!
//! 1. the head of `M`'s queue, if any
//! 2. otherwise the head of the wildcard queue
//! 3. otherwise [`TestServerError::NoResponse`](crate::TestServerError::NoResponse)
//!
//! Queues are FIFO, so the earliest registered response is served first and a
//! finite entry must be exhausted before the next one is reached.
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use test_server::{resolver::ResponseResolver, Response};
//!
//! let resolver = ResponseResolver::new();
//! resolver.add_response(Response::from_data("once"), 1, Some("get")).unwrap();
//! resolver.add_response(Response::from_data("any"), -1, None).unwrap();
//!
//! let first = resolver.get_response(&Method::GET).unwrap();
//! let second = resolver.get_response(&Method::GET).unwrap();
//! assert!(!std::sync::Arc::ptr_eq(&first, &second));
//! ```

mod core;
#[cfg(test)]
mod tests;

pub use core::{parse_method, Remaining, ResponseResolver, VALID_METHODS};
