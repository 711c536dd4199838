use http::Method;
use parking_lot::RwLock;
use std::any::Any;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::http1::{self, RequestHead, WireError};
use super::request::RequestSnapshot;
use super::response::Reply;
use crate::canned::{CallbackReply, ResponseBody};
use crate::error::{Result, TestServerError};
use crate::resolver::ResponseResolver;

/// State shared between the façade and every handler thread.
#[derive(Debug, Default)]
pub struct ServerState {
    pub resolver: ResponseResolver,
    history: RwLock<Vec<Arc<RequestSnapshot>>>,
    processed: AtomicUsize,
}

impl ServerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, snapshot: Arc<RequestSnapshot>) {
        self.history.write().push(snapshot);
    }

    /// Most recently recorded snapshot.
    #[must_use]
    pub fn last_request(&self) -> Option<Arc<RequestSnapshot>> {
        self.history.read().last().cloned()
    }

    #[must_use]
    pub fn requests(&self) -> Vec<Arc<RequestSnapshot>> {
        self.history.read().clone()
    }

    /// Number of exchanges that have finished, successfully or not.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Clear queues, history and the processed counter.
    pub fn reset(&self) {
        self.resolver.reset();
        self.history.write().clear();
        self.processed.store(0, Ordering::SeqCst);
    }
}

/// Bumps the processed counter when the exchange ends, however it ends.
struct ProcessedGuard<'a>(&'a AtomicUsize);

impl Drop for ProcessedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| format!("{panic:?}"))
}

/// Per-request logic shared by all handler threads of one running server.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    state: Arc<ServerState>,
    port: u16,
    part_limit: usize,
}

impl RequestHandler {
    #[must_use]
    pub fn new(state: Arc<ServerState>, port: u16, part_limit: usize) -> Self {
        Self {
            state,
            port,
            part_limit,
        }
    }

    /// Serve the single request on `stream`, then close the connection.
    ///
    /// Never panics outward: failures and panics inside user callbacks become
    /// a 555 reply, and the processed counter is bumped exactly once per
    /// request read off the socket.
    pub fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        let head = match http1::read_head(&mut stream) {
            Ok(head) => head,
            Err(WireError::Closed) => return,
            Err(err) => {
                warn!(peer = %peer, error = %err, "Rejecting unreadable request");
                let mut reply = Reply::bad_request(&err.to_string());
                reply.inject_required_headers(self.port);
                if let Ok(bytes) = reply.encode() {
                    if let Err(e) = finish(&mut stream, &bytes) {
                        debug!(peer = %peer, error = %e, "Failed to write 400 response");
                    }
                }
                return;
            }
        };

        let _processed = ProcessedGuard(&self.state.processed);
        let start = Instant::now();
        let method = head.method.clone();
        let target = head.target.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.prepare(head, &mut stream, peer)))
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                Err(TestServerError::Internal(format!(
                    "Response callback panicked: {message}"
                )))
            });

        let bytes = match outcome {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                error!(
                    method = %method,
                    path = %target,
                    error = %err,
                    "Request handling failed"
                );
                self.error_response(&err)
            }
        };

        match bytes.map_or(Ok(()), |bytes| finish(&mut stream, &bytes)) {
            Ok(()) => info!(
                method = %method,
                path = %target,
                duration_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            ),
            Err(e) => warn!(method = %method, path = %target, error = %e, "Failed to write response"),
        }
    }

    fn error_response(&self, err: &TestServerError) -> Option<Vec<u8>> {
        let mut reply = Reply::internal_error(err);
        reply.inject_required_headers(self.port);
        match reply.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(error = %e, "Failed to render error response");
                None
            }
        }
    }

    /// Resolve, sleep, read the body, then render. The snapshot is recorded
    /// even when no canned response is available.
    fn prepare(&self, mut head: RequestHead, stream: &mut TcpStream, peer: SocketAddr) -> Result<Vec<u8>> {
        let method = Method::from_bytes(head.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| TestServerError::Internal(format!("Invalid request method: {e}")))?;
        let resolved = self.state.resolver.get_response(&method);

        if let Ok(Some(delay)) = resolved.as_ref().map(|r| r.sleep) {
            debug!(method = %method, delay_ms = delay.as_millis() as u64, "Delaying response");
            thread::sleep(delay);
        }

        let data = head
            .read_body(stream)
            .map_err(|e| TestServerError::Internal(format!("Failed to read request body: {e}")))?;
        let snapshot = Arc::new(RequestSnapshot::build(
            method.as_str(),
            &head.target,
            Some(peer.ip()),
            head.headers,
            data,
            self.part_limit,
        )?);
        self.state.record(Arc::clone(&snapshot));
        let descriptor = resolved?;

        let mut reply = match &descriptor.body {
            ResponseBody::RawCallback(callback) => return Ok(callback()),
            ResponseBody::Callback(callback) => {
                Reply::from_callback(CallbackReply::from_value(&callback())?)
            }
            ResponseBody::Data(data) => Reply::fixed(&descriptor, data),
        };
        reply.inject_required_headers(self.port);
        debug!(
            request_id = %snapshot.id,
            status = reply.status,
            body_size_bytes = reply.body.len(),
            "Response rendered"
        );
        reply.encode()
    }
}

/// Write the whole response and close the connection, so a reply without
/// its own framing still ends at EOF for the client.
fn finish(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(bytes)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)
}
