//! # Server Configuration Module
//!
//! Environment-driven defaults for [`TestServer`](crate::TestServer).
//!
//! ## Environment Variables
//!
//! ### `TEST_SERVER_ADDRESS`
//!
//! Interface to bind. Default: `127.0.0.1`
//!
//! ### `TEST_SERVER_PORT`
//!
//! Port to bind; `0` asks the OS for an ephemeral port. Default: `0`
//!
//! ### `TEST_SERVER_MULTIPART_LIMIT`
//!
//! Maximum number of parts accepted in one `multipart/form-data` body before the
//! request is rejected with status 555. Default: `1000`
//!
//! ### `TEST_SERVER_POLL_INTERVAL_MS`
//!
//! How often `wait_request` re-checks the processed counter. Default: `10`
//!
//! Absent or unparsable values fall back to the default.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use test_server::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .with_port(0)
//!     .with_poll_interval(Duration::from_millis(5));
//! assert_eq!(config.poll_interval, Duration::from_millis(5));
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::multipart::DEFAULT_PART_LIMIT;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings used when starting a test server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind (default: `127.0.0.1`)
    pub address: String,
    /// Port to bind, `0` for ephemeral (default: `0`)
    pub port: u16,
    /// Multipart part-count ceiling (default: 1000)
    pub multipart_part_limit: usize,
    /// `wait_request` polling period (default: 10 ms)
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: 0,
            multipart_part_limit: DEFAULT_PART_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let address = env::var("TEST_SERVER_ADDRESS")
            .ok()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(defaults.address);
        ServerConfig {
            address,
            port: env_or("TEST_SERVER_PORT", defaults.port),
            multipart_part_limit: env_or(
                "TEST_SERVER_MULTIPART_LIMIT",
                defaults.multipart_part_limit,
            ),
            poll_interval: Duration::from_millis(env_or(
                "TEST_SERVER_POLL_INTERVAL_MS",
                10u64,
            )),
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_multipart_part_limit(mut self, limit: usize) -> Self {
        self.multipart_part_limit = limit;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `address:port` as handed to the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
