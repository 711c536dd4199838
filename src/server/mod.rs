pub mod http1;
pub mod http_server;
pub mod request;
pub mod response;
pub mod service;
mod test_server;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_cookies, parse_query_params, Cookie, RequestSnapshot};
pub use response::{Reply, INTERNAL_ERROR};
pub use service::{RequestHandler, ServerState};
pub use test_server::TestServer;
