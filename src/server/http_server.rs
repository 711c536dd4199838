use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use super::service::{RequestHandler, ServerState};
use crate::error::{Result, TestServerError};

/// How long the accept loop idles before re-checking the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// A client that stalls mid-request releases its handler thread after this.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to a running listener
///
/// Dropping the handle without calling [`ServerHandle::stop`] stops it too.
pub struct ServerHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Bound address, with the real port when port 0 was requested.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, join the accept thread and close the listener.
    ///
    /// Requests already handed to handler threads finish on their own.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(addr = %self.addr, "Accept thread panicked");
            }
            info!(addr = %self.addr, "Test server stopped");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accepted sockets may inherit the listener's non-blocking mode.
fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    stream.set_nodelay(true)
}

fn accept_loop(listener: &TcpListener, running: &AtomicBool, handler: &RequestHandler) {
    while running.load(Ordering::Acquire) {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        if let Err(e) = configure(&stream) {
            warn!(peer = %peer, error = %e, "Failed to configure connection");
            continue;
        }
        let handler = handler.clone();
        let spawned = thread::Builder::new()
            .name("test-server-handler".into())
            .spawn(move || handler.handle(stream, peer));
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn handler thread");
        }
    }
}

/// Blocking HTTP/1.x listener serving one [`ServerState`], one request per
/// connection.
pub struct HttpServer;

impl HttpServer {
    /// Start the listener on `bind_addr`
    ///
    /// The socket is bound before this returns, so the server accepts
    /// connections as soon as the handle exists.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - Address to bind (e.g., `"127.0.0.1:0"`)
    /// * `state` - Queues, history and counter shared with the façade
    /// * `part_limit` - Multipart part-count ceiling for every request
    ///
    /// # Errors
    ///
    /// [`TestServerError::Bind`] if the address is invalid or cannot be bound.
    pub fn start(bind_addr: &str, state: Arc<ServerState>, part_limit: usize) -> Result<ServerHandle> {
        let bind_error = |e: io::Error| TestServerError::Bind {
            addr: bind_addr.to_string(),
            reason: e.to_string(),
        };
        let listener = TcpListener::bind(bind_addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);
        let handler = RequestHandler::new(state, addr.port(), part_limit);
        let thread = thread::Builder::new()
            .name("test-server-accept".into())
            .spawn(move || accept_loop(&listener, &loop_running, &handler))
            .map_err(bind_error)?;

        info!(addr = %addr, "Test server started");
        Ok(ServerHandle {
            addr,
            running,
            thread: Some(thread),
        })
    }
}
