use super::*;
use crate::canned::{Response, ResponseBody};
use crate::error::TestServerError;
use http::Method;
use std::sync::Arc;

fn body_of(response: &Response) -> &[u8] {
    match &response.body {
        ResponseBody::Data(data) => data,
        _ => panic!("expected a data body"),
    }
}

fn resolve(resolver: &ResponseResolver, method: Method) -> Vec<u8> {
    body_of(&resolver.get_response(&method).unwrap()).to_vec()
}

#[test]
fn test_empty_resolver_has_no_response() {
    let resolver = ResponseResolver::new();
    assert!(matches!(
        resolver.get_response(&Method::GET),
        Err(TestServerError::NoResponse)
    ));
}

#[test]
fn test_unlimited_response_is_reused() {
    let resolver = ResponseResolver::new();
    resolver
        .add_response(Response::from_data("zzz"), -1, None)
        .unwrap();
    for _ in 0..5 {
        assert_eq!(resolve(&resolver, Method::GET), b"zzz");
    }
    assert_eq!(resolver.pending(), 1);
}

#[test]
fn test_finite_counts_are_served_in_order() {
    let resolver = ResponseResolver::new();
    resolver.add_response(Response::from_data("a"), 2, None).unwrap();
    resolver.add_response(Response::from_data("b"), 1, None).unwrap();
    assert_eq!(resolve(&resolver, Method::GET), b"a");
    assert_eq!(resolve(&resolver, Method::POST), b"a");
    assert_eq!(resolve(&resolver, Method::GET), b"b");
    assert!(resolver.get_response(&Method::GET).is_err());
    assert_eq!(resolver.pending(), 0);
}

#[test]
fn test_method_queue_takes_precedence_over_wildcard() {
    let resolver = ResponseResolver::new();
    resolver
        .add_response(Response::from_data("any"), -1, None)
        .unwrap();
    resolver
        .add_response(Response::from_data("post"), 1, Some("POST"))
        .unwrap();
    assert_eq!(resolve(&resolver, Method::GET), b"any");
    assert_eq!(resolve(&resolver, Method::POST), b"post");
    // method queue exhausted, falls back to the wildcard
    assert_eq!(resolve(&resolver, Method::POST), b"any");
}

#[test]
fn test_method_only_queue_rejects_other_methods() {
    let resolver = ResponseResolver::new();
    resolver
        .add_response(Response::from_data("get"), -1, Some("get"))
        .unwrap();
    assert!(matches!(
        resolver.get_response(&Method::POST),
        Err(TestServerError::NoResponse)
    ));
}

#[test]
fn test_invalid_method_is_rejected() {
    let resolver = ResponseResolver::new();
    let err = resolver
        .add_response(Response::new(), 1, Some("foo"))
        .unwrap_err();
    assert!(matches!(err, TestServerError::InvalidMethod { ref method } if method == "foo"));
    assert!(resolver
        .add_response(Response::new(), 1, Some("HEAD"))
        .is_err());
    assert_eq!(resolver.pending(), 0);
}

#[test]
fn test_invalid_counts_are_rejected() {
    let resolver = ResponseResolver::new();
    for count in [0, -2, -100] {
        let err = resolver
            .add_response(Response::new(), count, None)
            .unwrap_err();
        assert!(matches!(err, TestServerError::InvalidCount { count: c } if c == count));
    }
    assert_eq!(resolver.pending(), 0);
}

#[test]
fn test_parse_method_is_case_insensitive() {
    for name in VALID_METHODS {
        let upper = name.to_ascii_uppercase();
        assert_eq!(parse_method(name).unwrap().as_str(), upper);
        assert_eq!(parse_method(&upper).unwrap().as_str(), upper);
    }
    assert_eq!(parse_method("PaTcH").unwrap(), Method::PATCH);
}

#[test]
fn test_reset_clears_every_queue() {
    let resolver = ResponseResolver::new();
    resolver.add_response(Response::new(), -1, None).unwrap();
    resolver
        .add_response(Response::new(), 3, Some("put"))
        .unwrap();
    resolver.reset();
    assert_eq!(resolver.pending(), 0);
    assert!(resolver.get_response(&Method::PUT).is_err());
}

#[test]
fn test_remaining_from_count() {
    assert_eq!(Remaining::from_count(-1).unwrap(), Remaining::Unlimited);
    assert_eq!(Remaining::from_count(3).unwrap(), Remaining::Times(3));
    assert!(Remaining::from_count(0).is_err());
}

#[test]
fn test_concurrent_resolution_serves_each_use_once() {
    let resolver = Arc::new(ResponseResolver::new());
    resolver
        .add_response(Response::from_data("x"), 40, None)
        .unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            std::thread::spawn(move || {
                (0..10)
                    .filter(|_| resolver.get_response(&Method::GET).is_ok())
                    .count()
            })
        })
        .collect();
    let served: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(served, 40);
}
