//! Resolver core: queue storage and the per-request lookup.

use http::Method;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::canned::Response;
use crate::error::{Result, TestServerError};

/// Methods accepted by [`ResponseResolver::add_response`], matched case-insensitively.
pub const VALID_METHODS: [&str; 6] = ["get", "post", "put", "delete", "options", "patch"];

/// How many more times a queued response may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Times(u64),
}

impl Remaining {
    /// Map the public count convention (`-1` or a positive number).
    ///
    /// # Errors
    ///
    /// [`TestServerError::InvalidCount`] for zero and negatives other than `-1`.
    pub fn from_count(count: i64) -> Result<Self> {
        match count {
            -1 => Ok(Remaining::Unlimited),
            n if n > 0 => Ok(Remaining::Times(n.unsigned_abs())),
            n => Err(TestServerError::InvalidCount { count: n }),
        }
    }
}

#[derive(Debug)]
struct QueueEntry {
    response: Arc<Response>,
    remaining: Remaining,
}

/// Parse a user-supplied method name against [`VALID_METHODS`].
///
/// # Errors
///
/// [`TestServerError::InvalidMethod`] when the name is not one of the supported verbs.
pub fn parse_method(method: &str) -> Result<Method> {
    let lower = method.to_ascii_lowercase();
    if !VALID_METHODS.contains(&lower.as_str()) {
        return Err(TestServerError::InvalidMethod {
            method: method.to_string(),
        });
    }
    Method::from_bytes(lower.to_ascii_uppercase().as_bytes()).map_err(|_| {
        TestServerError::InvalidMethod {
            method: method.to_string(),
        }
    })
}

/// Method-keyed FIFO queues of canned responses.
///
/// The `None` key holds the wildcard queue. All queues sit behind one lock so
/// that a lookup and the count decrement that follows it are atomic with
/// respect to concurrent handlers and `add_response`.
#[derive(Debug, Default)]
pub struct ResponseResolver {
    queues: Mutex<HashMap<Option<Method>, VecDeque<QueueEntry>>>,
}

impl ResponseResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `method` (or for any method when `None`).
    ///
    /// # Arguments
    ///
    /// * `response` - The canned response to serve
    /// * `count` - `-1` for unlimited reuse, otherwise a positive serve count
    /// * `method` - Case-insensitive verb from [`VALID_METHODS`], or `None` for the wildcard queue
    ///
    /// # Errors
    ///
    /// `InvalidMethod` or `InvalidCount`; nothing is queued in either case.
    pub fn add_response(&self, response: Response, count: i64, method: Option<&str>) -> Result<()> {
        let key = method.map(parse_method).transpose()?;
        let remaining = Remaining::from_count(count)?;
        info!(
            method = key.as_ref().map_or("*", Method::as_str),
            count,
            status = response.status,
            "Queued canned response"
        );
        self.queues
            .lock()
            .entry(key)
            .or_default()
            .push_back(QueueEntry {
                response: Arc::new(response),
                remaining,
            });
        Ok(())
    }

    /// Take the response that answers a request with `method`.
    ///
    /// Consumes one use of a finite entry and drops it once exhausted.
    ///
    /// # Errors
    ///
    /// [`TestServerError::NoResponse`] when neither the method queue nor the
    /// wildcard queue has an entry.
    pub fn get_response(&self, method: &Method) -> Result<Arc<Response>> {
        let mut queues = self.queues.lock();
        let key = [Some(method.clone()), None]
            .into_iter()
            .find(|key| queues.get(key).is_some_and(|q| !q.is_empty()))
            .ok_or(TestServerError::NoResponse)?;
        let queue = queues.get_mut(&key).ok_or(TestServerError::NoResponse)?;
        let entry = queue.front_mut().ok_or(TestServerError::NoResponse)?;
        let response = Arc::clone(&entry.response);
        let exhausted = match &mut entry.remaining {
            Remaining::Unlimited => false,
            Remaining::Times(n) => {
                *n -= 1;
                *n == 0
            }
        };
        if exhausted {
            queue.pop_front();
        }
        debug!(
            method = %method,
            queue = key.as_ref().map_or("*", Method::as_str),
            "Resolved canned response"
        );
        Ok(response)
    }

    /// Drop every queued response.
    pub fn reset(&self) {
        self.queues.lock().clear();
    }

    /// Number of entries waiting across all queues.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}
