use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use super::http_server::{HttpServer, ServerHandle};
use super::request::RequestSnapshot;
use super::service::ServerState;
use crate::canned::Response;
use crate::config::ServerConfig;
use crate::error::{Result, TestServerError};

/// Scriptable HTTP server for tests.
///
/// Queue canned responses with [`add_response`](Self::add_response), point the
/// code under test at [`get_url`](Self::get_url), then inspect what arrived with
/// [`get_request`](Self::get_request). Every method takes `&self`, so one
/// instance can live in a `static OnceLock` and be shared by a whole test
/// binary; call [`reset`](Self::reset) between tests.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use test_server::{Response, TestServer};
///
/// let server = TestServer::new("127.0.0.1", 0);
/// server.start()?;
/// server.add_response(Response::from_data("pong"), 1, Some("get"))?;
///
/// let url = server.get_url("/ping", None)?;
/// // ... issue a GET to `url` from the code under test ...
/// server.wait_request(Duration::from_secs(5))?;
/// assert_eq!(server.get_request()?.path, "/ping");
/// server.stop();
/// # Ok::<(), test_server::TestServerError>(())
/// ```
#[derive(Debug)]
pub struct TestServer {
    config: ServerConfig,
    state: Arc<ServerState>,
    handle: Mutex<Option<ServerHandle>>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self::with_config(ServerConfig::default())
    }
}

impl TestServer {
    /// Server bound to `address:port` once started; port `0` picks a free port.
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::with_config(
            ServerConfig::default()
                .with_address(address)
                .with_port(port),
        )
    }

    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(ServerState::new()),
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start serving. Returns once the listener accepts connections.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` when running, `Bind` when the address cannot be bound.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(TestServerError::AlreadyStarted);
        }
        let started = HttpServer::start(
            &self.config.bind_addr(),
            Arc::clone(&self.state),
            self.config.multipart_part_limit,
        )?;
        *handle = Some(started);
        Ok(())
    }

    /// Stop serving and release the port. A no-op when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.stop();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Bound port of the running server.
    ///
    /// # Errors
    ///
    /// `NotStarted` when the server is not running.
    pub fn port(&self) -> Result<u16> {
        self.handle
            .lock()
            .as_ref()
            .map(|h| h.addr().port())
            .ok_or(TestServerError::NotStarted)
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Absolute URL for `path`, resolved like a link relative to the server root.
    ///
    /// # Arguments
    ///
    /// * `path` - Path, optionally with a query string (`""` yields the root `/`)
    /// * `port` - Port override; defaults to the bound port
    ///
    /// # Errors
    ///
    /// `NotStarted` when no port is given and the server is not running.
    pub fn get_url(&self, path: &str, port: Option<u16>) -> Result<String> {
        let port = match port {
            Some(port) => port,
            None => self.port()?,
        };
        let host = if self.config.address.contains(':') {
            format!("[{}]", self.config.address)
        } else {
            self.config.address.clone()
        };
        let invalid = |e: url::ParseError| {
            TestServerError::Internal(format!("Cannot build URL for {path:?}: {e}"))
        };
        let base = Url::parse(&format!("http://{host}:{port}/")).map_err(invalid)?;
        Ok(base.join(path).map_err(invalid)?.to_string())
    }

    /// Queue a canned response.
    ///
    /// # Arguments
    ///
    /// * `response` - What to send back
    /// * `count` - `-1` to reuse forever, otherwise how many requests it answers
    /// * `method` - `get`, `post`, `put`, `delete`, `options` or `patch` (any case);
    ///   `None` answers any method once the method's own queue is empty
    ///
    /// # Errors
    ///
    /// `InvalidMethod` or `InvalidCount`.
    pub fn add_response(&self, response: Response, count: i64, method: Option<&str>) -> Result<()> {
        self.state.resolver.add_response(response, count, method)
    }

    /// Forget queued responses, captured requests and the processed counter.
    pub fn reset(&self) {
        self.state.reset();
        debug!("Test server state reset");
    }

    /// The most recently captured request.
    ///
    /// # Errors
    ///
    /// `RequestNotProcessed` when nothing has been captured since start or reset.
    pub fn get_request(&self) -> Result<Arc<RequestSnapshot>> {
        self.state
            .last_request()
            .ok_or(TestServerError::RequestNotProcessed)
    }

    /// Every captured request, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Arc<RequestSnapshot>> {
        self.state.requests()
    }

    /// Whether at least one exchange has finished since start or reset.
    #[must_use]
    pub fn request_is_done(&self) -> bool {
        self.state.processed() > 0
    }

    #[must_use]
    pub fn num_requests_processed(&self) -> usize {
        self.state.processed()
    }

    /// Block until an exchange finishes after this call began.
    ///
    /// # Errors
    ///
    /// `WaitTimeout` when nothing finishes within `timeout`.
    pub fn wait_request(&self, timeout: Duration) -> Result<()> {
        let baseline = self.state.processed();
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.processed() > baseline {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                info!(timeout_ms = timeout.as_millis() as u64, "wait_request timed out");
                return Err(TestServerError::WaitTimeout { timeout });
            }
            thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}
