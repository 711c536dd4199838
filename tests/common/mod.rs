#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Write `req` verbatim and collect whatever comes back until the peer
    /// closes or goes quiet for 200ms.
    pub fn send_request(addr: &SocketAddr, req: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = Vec::new();
        loop {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {:?}", e),
            }
        }
        buf
    }

    /// Write `req` verbatim and read until the server closes the connection.
    ///
    /// Panics if the connection is still open after `timeout`, so a reply
    /// that never terminates fails the test instead of passing on silence.
    pub fn send_request_until_eof(addr: &SocketAddr, req: &[u8], timeout: Duration) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req).unwrap();
        stream.set_read_timeout(Some(timeout)).unwrap();
        let mut buf = Vec::new();
        match stream.read_to_end(&mut buf) {
            Ok(_) => buf,
            Err(e) => panic!(
                "no EOF within {timeout:?} ({e}); received {:?}",
                String::from_utf8_lossy(&buf)
            ),
        }
    }

    /// Split a raw HTTP/1.x response into status, header lines and body.
    pub fn parse_response(resp: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
        let split = resp
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header block");
        let head = String::from_utf8_lossy(&resp[..split]).to_string();
        let body = resp[split + 4..].to_vec();
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        (status, headers, body)
    }
}

pub mod fixture {
    use std::ops::Deref;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::{Duration, Instant};
    use test_server::{ServerConfig, TestServer};

    /// Test fixture with automatic setup and teardown using RAII
    ///
    /// Starts a server on an ephemeral port; `Drop` stops it.
    pub struct ServerFixture {
        server: TestServer,
    }

    impl ServerFixture {
        pub fn start() -> Self {
            Self::with_config(ServerConfig::default())
        }

        pub fn with_config(config: ServerConfig) -> Self {
            crate::tracing_util::init();
            let server = TestServer::with_config(config);
            server.start().expect("test server starts");
            Self { server }
        }

        pub fn url(&self, path: &str) -> String {
            self.server.get_url(path, None).unwrap()
        }

        pub fn addr(&self) -> std::net::SocketAddr {
            format!("{}:{}", self.server.address(), self.server.port().unwrap())
                .parse()
                .unwrap()
        }
    }

    impl Deref for ServerFixture {
        type Target = TestServer;

        fn deref(&self) -> &TestServer {
            &self.server
        }
    }

    impl Drop for ServerFixture {
        fn drop(&mut self) {
            self.server.stop();
        }
    }

    static SHARED: OnceLock<TestServer> = OnceLock::new();
    static SHARED_LOCK: Mutex<()> = Mutex::new(());

    /// One long-lived server per test binary.
    ///
    /// The guard serialises tests that use it; state is reset on every call.
    pub fn shared_server() -> (MutexGuard<'static, ()>, &'static TestServer) {
        let guard = SHARED_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let server = SHARED.get_or_init(|| {
            crate::tracing_util::init();
            let server = TestServer::default();
            server.start().expect("shared test server starts");
            server
        });
        server.reset();
        (guard, server)
    }

    /// Poll until the processed counter reaches `n`; the counter is bumped just
    /// after the reply is written, so a client can see the reply first.
    pub fn wait_processed(server: &TestServer, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while server.num_requests_processed() < n {
            assert!(Instant::now() < deadline, "only {} of {n} requests processed", server.num_requests_processed());
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

pub fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap()
}
