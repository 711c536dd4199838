#![allow(clippy::unwrap_used, clippy::expect_used)]
//! One long-lived server shared by every test in this binary, reset per test.

use std::time::Duration;
use test_server::{Response, TestServerError};

mod tracing_util;
mod common;
use common::client;
use common::fixture::shared_server;

#[test]
fn test_shared_server_starts_clean() {
    let (_guard, server) = shared_server();
    assert!(server.is_running());
    assert!(matches!(
        server.get_request(),
        Err(TestServerError::RequestNotProcessed)
    ));
    assert_eq!(server.num_requests_processed(), 0);
}

#[test]
fn test_shared_server_serves_queued_response() {
    let (_guard, server) = shared_server();
    server
        .add_response(
            Response::from_data("shared").with_sleep(Duration::from_millis(50)),
            1,
            Some("put"),
        )
        .unwrap();

    let url = server.get_url("/item/7", None).unwrap();
    let sender = std::thread::spawn(move || client().put(url).body("payload").send().unwrap());
    server.wait_request(Duration::from_secs(5)).unwrap();
    assert_eq!(sender.join().unwrap().text().unwrap(), "shared");

    let req = server.get_request().unwrap();
    assert_eq!(req.method, "PUT");
    assert_eq!(req.path, "/item/7");
    assert_eq!(req.text(), "payload");
}

#[test]
fn test_shared_server_leftovers_do_not_leak() {
    let (guard, server) = shared_server();
    server.add_response(Response::from_data("leftover"), -1, None).unwrap();
    drop(guard);

    let (_guard, server) = shared_server();
    let resp = client().get(server.get_url("/", None).unwrap()).send().unwrap();
    assert_eq!(resp.status().as_u16(), 555);
}
