//! Transport-level resolver tests against an in-process HTTP stub.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use route_backfill::resolver::{OsrmConfig, RouteResolver, RoutingError};
use route_backfill::route::{CoordinatePair, RouteSource};
use route_backfill::traits::Resolve;

const OK_BODY: &str =
    r#"{"code":"Ok","routes":[{"geometry":"AA","distance":2450.5,"duration":612.2}]}"#;

/// Serves one canned response per expected request, then reports how
/// many requests actually arrived.
fn serve_responses(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut served = 0usize;
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line).unwrap_or(0);
                if read == 0 || line == "\r\n" || line == "\n" {
                    break;
                }
            }

            let reason = match status {
                200 => "OK",
                400 => "Bad Request",
                429 => "Too Many Requests",
                500 => "Internal Server Error",
                _ => "Error",
            };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            served += 1;
        }
        served
    });

    (base_url, handle)
}

fn stub_config(base_url: String) -> OsrmConfig {
    OsrmConfig {
        base_url,
        timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_backoff: Duration::from_millis(10),
        ..OsrmConfig::default()
    }
}

fn moving_pair() -> CoordinatePair {
    CoordinatePair::new(-0.1276, 51.5074, -0.099, 51.514)
}

#[test]
fn resolves_a_route_from_the_service() {
    let (base_url, handle) = serve_responses(vec![(200, OK_BODY)]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let result = resolver.resolve(&moving_pair()).unwrap();
    assert_eq!(result.source, RouteSource::Osrm);
    assert_eq!(result.geometry, "AA");
    assert_eq!(result.distance_m, 2450.5);
    assert_eq!(result.duration_s, 612.2);
    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn retries_server_errors_until_success() {
    let (base_url, handle) = serve_responses(vec![(500, "{}"), (200, OK_BODY)]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let result = resolver.resolve(&moving_pair()).unwrap();
    assert_eq!(result.source, RouteSource::Osrm);
    assert_eq!(handle.join().unwrap(), 2);
}

#[test]
fn retries_throttling_responses() {
    let (base_url, handle) = serve_responses(vec![(429, "{}"), (200, OK_BODY)]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    assert!(resolver.resolve(&moving_pair()).is_ok());
    assert_eq!(handle.join().unwrap(), 2);
}

#[test]
fn exhausted_retries_surface_the_transport_error() {
    let (base_url, handle) = serve_responses(vec![(500, "{}"), (500, "{}"), (500, "{}")]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let err = resolver.resolve(&moving_pair()).unwrap_err();
    assert!(matches!(err, RoutingError::Status(status) if status.as_u16() == 500));
    // max_retries = 2 means three attempts in total.
    assert_eq!(handle.join().unwrap(), 3);
}

#[test]
fn missing_routes_are_definitive_failures() {
    let (base_url, handle) = serve_responses(vec![(200, r#"{"code":"NoRoute","routes":[]}"#)]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let err = resolver.resolve(&moving_pair()).unwrap_err();
    assert!(matches!(err, RoutingError::NoRoute(code) if code == "NoRoute"));
    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn ok_code_with_empty_route_list_fails() {
    let (base_url, handle) = serve_responses(vec![(200, r#"{"code":"Ok","routes":[]}"#)]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let err = resolver.resolve(&moving_pair()).unwrap_err();
    assert!(matches!(err, RoutingError::NoRoute(_)));
    assert_eq!(handle.join().unwrap(), 1);
}

#[test]
fn client_errors_do_not_retry() {
    let (base_url, handle) = serve_responses(vec![(400, "{}")]);
    let resolver = RouteResolver::new(stub_config(base_url)).unwrap();

    let err = resolver.resolve(&moving_pair()).unwrap_err();
    assert!(matches!(err, RoutingError::Status(status) if status.as_u16() == 400));
    assert_eq!(handle.join().unwrap(), 1);
}
