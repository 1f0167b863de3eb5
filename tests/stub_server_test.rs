use httpstub::{ContentType, RequestCaptureFn, StubOption, StubServer};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

fn server_url(server: &StubServer, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", server.port(), path)
}

fn start_server() -> StubServer {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("httpstub=warn")),
        )
        .try_init();
    StubServer::start().unwrap()
}

#[test]
fn serves_registered_json_response_then_reports_exhaustion() {
    let server = start_server();
    server
        .add_interaction(
            "GET",
            "/",
            200,
            Some(json!({ "foo": "bar" })),
            ContentType::Json,
            None,
            &[],
        )
        .unwrap();

    let client = reqwest::blocking::Client::new();
    let response = client.get(server_url(&server, "/")).send().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    assert_eq!(response.json::<Value>().unwrap(), json!({ "foo": "bar" }));

    // The single interaction is consumed; the next request must get the
    // clearly-labeled no-mock error.
    let response = client.get(server_url(&server, "/")).send().unwrap();
    assert_eq!(response.status().as_u16(), 501);
    let error_body = response.json::<Value>().unwrap();
    assert_eq!(
        error_body["message"],
        "[MOCK WEB SERVER ERROR] does not have (any more) mock interactions for path/method"
    );
    assert_eq!(error_body["path"], "/");
    assert_eq!(error_body["method"], "GET");
}

#[test]
fn serves_status_only_response_with_empty_body() {
    let server = start_server();
    server
        .add_interaction("POST", "/", 204, None, ContentType::Json, None, &[])
        .unwrap();

    let client = reqwest::blocking::Client::new();
    let response = client.post(server_url(&server, "/")).send().unwrap();
    assert_eq!(response.status().as_u16(), 204);
    assert!(response.bytes().unwrap().is_empty());
}

#[test]
fn replays_interactions_for_the_same_key_in_order() {
    let server = start_server();
    for status in &[200u16, 404, 500] {
        server
            .add_interaction("GET", "/seq", *status, None, ContentType::Json, None, &[])
            .unwrap();
    }

    let client = reqwest::blocking::Client::new();
    for status in &[200u16, 404, 500] {
        let response = client.get(server_url(&server, "/seq")).send().unwrap();
        assert_eq!(response.status().as_u16(), *status);
    }
}

#[test]
fn unmatched_method_gets_the_no_mock_error() {
    let server = start_server();
    server
        .add_interaction("GET", "/resource", 200, None, ContentType::Json, None, &[])
        .unwrap();

    // Same path, different method: keys are method+path.
    let client = reqwest::blocking::Client::new();
    let response = client.post(server_url(&server, "/resource")).send().unwrap();
    assert_eq!(response.status().as_u16(), 501);
    let error_body = response.json::<Value>().unwrap();
    assert_eq!(error_body["method"], "POST");
    assert_eq!(error_body["path"], "/resource");
}

#[test]
fn delays_the_response_by_at_least_the_configured_duration() {
    let server = start_server();
    server
        .add_interaction(
            "GET",
            "/slow",
            200,
            Some(json!({ "foo": "bar" })),
            ContentType::Json,
            None,
            &[StubOption::DelayResponse(Duration::from_millis(300))],
        )
        .unwrap();

    let client = reqwest::blocking::Client::new();
    let start = Instant::now();
    let response = client.get(server_url(&server, "/slow")).send().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[test]
fn delayed_response_exceeding_the_client_timeout_times_out() {
    let server = start_server();
    server
        .add_interaction(
            "GET",
            "/",
            200,
            Some(json!({ "foo": "bar" })),
            ContentType::Json,
            None,
            &[StubOption::DelayResponse(Duration::from_millis(500))],
        )
        .unwrap();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.get(server_url(&server, "/")).send().unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn capture_callback_runs_once_per_consumed_interaction() {
    let times = 3;
    let counter = Arc::new(AtomicUsize::new(0));
    let callback_counter = counter.clone();
    let capture_fn: RequestCaptureFn = Arc::new(move |_, _| {
        callback_counter.fetch_add(1, Ordering::SeqCst);
    });

    let server = start_server();
    let client = reqwest::blocking::Client::new();

    for _ in 0..times {
        server
            .add_interaction(
                "GET",
                "/",
                200,
                None,
                ContentType::Json,
                Some(capture_fn.clone()),
                &[],
            )
            .unwrap();
        let response = client.get(server_url(&server, "/")).send().unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    assert_eq!(counter.load(Ordering::SeqCst), times);
}

#[test]
fn captures_the_request_body_and_headers_for_assertions() {
    let seen = Arc::new(Mutex::new(None));
    let callback_seen = seen.clone();
    let capture_fn: RequestCaptureFn = Arc::new(move |body, headers| {
        *callback_seen.lock().unwrap() = Some((
            body.to_vec(),
            headers
                .get("x-test")
                .and_then(|value| value.to_str().ok())
                .map(String::from),
        ));
    });

    let server = start_server();
    server
        .add_interaction(
            "POST",
            "/payload",
            201,
            None,
            ContentType::Json,
            Some(capture_fn),
            &[],
        )
        .unwrap();

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(server_url(&server, "/payload"))
        .header("x-test", "1")
        .body("ping")
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let (body, header) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body, b"ping");
    assert_eq!(header.as_deref(), Some("1"));

    // The same capture is observable on the stored record afterwards.
    let stored = server.interactions().interaction("POST", "/payload", 0).unwrap();
    let captured = stored.captured_request().unwrap();
    assert_eq!(captured.body, b"ping");
    assert_eq!(captured.headers.get("x-test").unwrap(), "1");
}

#[test]
fn renders_xml_when_the_interaction_asks_for_it() {
    let server = start_server();
    server
        .add_interaction(
            "GET",
            "/xml",
            200,
            Some(json!({ "foo": "bar" })),
            ContentType::Xml,
            None,
            &[],
        )
        .unwrap();

    let client = reqwest::blocking::Client::new();
    let response = client.get(server_url(&server, "/xml")).send().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/xml"));
    assert_eq!(
        response.text().unwrap(),
        "<response><foo>bar</foo></response>"
    );
}

#[test]
fn reset_clears_interactions_on_a_live_server() {
    let server = start_server();
    server
        .add_interaction("GET", "/", 200, None, ContentType::Json, None, &[])
        .unwrap();

    server.reset();

    let client = reqwest::blocking::Client::new();
    let response = client.get(server_url(&server, "/")).send().unwrap();
    assert_eq!(response.status().as_u16(), 501);
}

#[test]
fn concurrent_add_and_request_pairs_all_succeed() {
    const WORKERS: usize = 100;

    let server = Arc::new(start_server());
    let client = reqwest::blocking::Client::new();

    let mut handles = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let server = server.clone();
        let client = client.clone();
        handles.push(thread::spawn(move || {
            server
                .add_interaction(
                    "POST",
                    "/entitlement",
                    202,
                    Some(json!({ "foo": "bar" })),
                    ContentType::Json,
                    None,
                    &[],
                )
                .unwrap();
            let response = client
                .post(server_url(&server, "/entitlement"))
                .send()
                .unwrap();
            response.status().as_u16()
        }));
    }

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 202);
    }

    assert_eq!(
        server.interactions().all_interactions("POST", "/entitlement").len(),
        WORKERS
    );
}

#[test]
fn shutdown_completes_and_frees_the_port() {
    let server = start_server();
    let url = server_url(&server, "/");
    server.shutdown().unwrap();

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    assert!(client.get(url).send().is_err());
}
