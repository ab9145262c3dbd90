//! End-to-end requests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives controllers over
//! real HTTP through the default ureq transport. Each test owns its server,
//! its `HttpManager` and a `MainLoop` on the test thread, which plays the
//! consumer role.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    Controller, DecodeTarget, Envelope, HttpConfig, HttpManager, Listener, MainLoop, Outcome,
    RequestDescriptor,
};
use mock_server::{Echo, Item};
use parking_lot::Mutex;
use serde_json::Value;

const WAIT: Duration = Duration::from_secs(5);

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

struct Recorder<T> {
    outcomes: Mutex<Vec<Outcome<T>>>,
}

impl<T> Recorder<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(Vec::new()),
        })
    }

    fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    fn take(&self) -> Vec<Outcome<T>> {
        std::mem::take(&mut *self.outcomes.lock())
    }
}

impl<T: Send + 'static> Listener<T> for Recorder<T> {
    fn on_success(&self, output: T) {
        self.outcomes.lock().push(Outcome::Success(output));
    }

    fn on_error(&self, error: String) {
        self.outcomes.lock().push(Outcome::Failure(error));
    }
}

struct Harness {
    base: String,
    manager: Arc<HttpManager>,
    main_loop: MainLoop,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(HttpConfig::default())
    }

    fn with_config(config: HttpConfig) -> Self {
        Self {
            base: start_server(),
            manager: Arc::new(HttpManager::new(config).unwrap()),
            main_loop: MainLoop::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn controller<T>(&self, recorder: &Arc<Recorder<T>>) -> Controller<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let mut controller = Controller::new(self.manager.clone(), self.main_loop.dispatcher());
        controller.set_listener(recorder.clone());
        controller
    }

    fn wait_for<T>(&self, recorder: &Recorder<T>, count: usize) -> Vec<Outcome<T>> {
        assert!(
            self.main_loop.run_until(WAIT, || recorder.len() >= count),
            "timed out waiting for {count} deliveries"
        );
        recorder.take()
    }
}

fn success<T: std::fmt::Debug>(mut outcomes: Vec<Outcome<T>>) -> T {
    assert_eq!(outcomes.len(), 1, "expected exactly one outcome");
    match outcomes.remove(0) {
        Outcome::Success(value) => value,
        Outcome::Failure(error) => panic!("expected success, got failure: {error}"),
    }
}

fn failure<T: std::fmt::Debug>(mut outcomes: Vec<Outcome<T>>) -> String {
    assert_eq!(outcomes.len(), 1, "expected exactly one outcome");
    match outcomes.remove(0) {
        Outcome::Failure(error) => error,
        Outcome::Success(value) => panic!("expected failure, got {value:?}"),
    }
}

#[test]
fn get_sends_params_in_query() {
    let h = Harness::new();
    let recorder = Recorder::<Echo>::new();
    let mut controller = h.controller(&recorder);

    let mut params = BTreeMap::new();
    params.insert("q", "x y");
    params.insert("page", "2");
    controller
        .load(&RequestDescriptor::get(h.url("/api/echo")), &params, DecodeTarget::single())
        .unwrap();

    let echo = success(h.wait_for(&recorder, 1));
    assert_eq!(echo.method, "GET");
    assert_eq!(echo.query.as_deref(), Some("page=2&q=x%20y"));
    assert!(echo.body.is_empty());
}

#[test]
fn post_sends_form_and_list_reads_it_back() {
    let h = Harness::new();
    let created = Recorder::<Item>::new();
    let mut create = h.controller(&created);
    create
        .load(
            &RequestDescriptor::post(h.url("/api/items")),
            &[("name", "Buy milk")],
            DecodeTarget::single(),
        )
        .unwrap();
    let item = success(h.wait_for(&created, 1));
    assert_eq!(item.name, "Buy milk");

    let listed = Recorder::<Vec<Item>>::new();
    let mut list = h.controller(&listed);
    list.load_list(&RequestDescriptor::get(h.url("/api/items")), &())
        .unwrap();
    assert_eq!(success(h.wait_for(&listed, 1)), vec![item]);
}

#[test]
fn put_sends_plain_text_body() {
    let h = Harness::new();
    let recorder = Recorder::<Echo>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(
            &RequestDescriptor::put(h.url("/api/echo")),
            &[("a", "1"), ("b", "2 3")],
            DecodeTarget::single(),
        )
        .unwrap();

    let echo = success(h.wait_for(&recorder, 1));
    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.body, "a=1&b=2%203");
    assert_eq!(echo.query.as_deref(), Some("a=1&b=2%203"));
    assert_eq!(echo.content_type.as_deref(), Some("text/plain;charset=utf-8"));
}

#[test]
fn patch_sends_plain_text_and_keeps_url() {
    let h = Harness::new();
    let recorder = Recorder::<Echo>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(
            &RequestDescriptor::patch(h.url("/api/echo")),
            &[("done", "true")],
            DecodeTarget::single(),
        )
        .unwrap();

    let echo = success(h.wait_for(&recorder, 1));
    assert_eq!(echo.method, "PATCH");
    assert_eq!(echo.body, "done=true");
    assert!(echo.query.is_none());
}

#[test]
fn delete_sends_params_in_query() {
    let h = Harness::new();
    let recorder = Recorder::<Echo>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(
            &RequestDescriptor::delete(h.url("/api/echo")),
            &[("id", "7")],
            DecodeTarget::single(),
        )
        .unwrap();

    let echo = success(h.wait_for(&recorder, 1));
    assert_eq!(echo.method, "DELETE");
    assert_eq!(echo.query.as_deref(), Some("id=7"));
}

#[test]
fn head_response_has_no_envelope() {
    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(&RequestDescriptor::head(h.url("/api/echo")), &(), DecodeTarget::single())
        .unwrap();
    assert_eq!(failure(h.wait_for(&recorder, 1)), "data parse failed");
}

#[test]
fn list_with_null_or_empty_data_is_empty() {
    let h = Harness::new();
    for path in ["/api/items/null", "/api/items/empty"] {
        let recorder = Recorder::<Vec<Item>>::new();
        let mut controller = h.controller(&recorder);
        controller
            .load_list(&RequestDescriptor::get(h.url(path)), &())
            .unwrap();
        assert_eq!(success(h.wait_for(&recorder, 1)), Vec::new(), "{path}");
    }
}

#[test]
fn single_with_empty_data_delivers_nothing() {
    let h = Harness::new();
    let recorder = Recorder::<Item>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(&RequestDescriptor::get(h.url("/api/items/empty")), &(), DecodeTarget::single())
        .unwrap();

    assert!(!h.main_loop.run_until(Duration::from_millis(500), || recorder.len() > 0));
    assert_eq!(recorder.len(), 0);
}

#[test]
fn envelope_target_receives_whole_envelope() {
    let h = Harness::new();
    let recorder = Recorder::<Envelope>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(&RequestDescriptor::get(h.url("/api/items")), &(), DecodeTarget::envelope())
        .unwrap();

    let envelope = success(h.wait_for(&recorder, 1));
    assert_eq!(envelope.status, "1");
    assert_eq!(envelope.message, "ok");
    assert_eq!(envelope.data, Value::Array(Vec::new()));
}

#[test]
fn malformed_body_reports_parse_failure() {
    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(&RequestDescriptor::get(h.url("/api/malformed")), &(), DecodeTarget::single())
        .unwrap();
    assert_eq!(failure(h.wait_for(&recorder, 1)), "data parse failed");
}

#[test]
fn non_200_status_reports_failure() {
    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);
    for code in [404, 500] {
        controller
            .load(
                &RequestDescriptor::get(h.url(&format!("/api/status/{code}"))),
                &(),
                DecodeTarget::single(),
            )
            .unwrap();
        assert_eq!(
            failure(h.wait_for(&recorder, 1)),
            format!("unexpected HTTP status {code}")
        );
    }
}

#[test]
fn connection_refused_reports_transport_failure() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);
    controller
        .load(
            &RequestDescriptor::get(format!("http://{addr}/api/echo")),
            &(),
            DecodeTarget::single(),
        )
        .unwrap();

    let error = failure(h.wait_for(&recorder, 1));
    assert!(!error.is_empty());
    assert_ne!(error, "data parse failed");
}

#[test]
fn later_completion_is_delivered_first() {
    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);

    controller
        .load(&RequestDescriptor::get(h.url("/api/slow/400")), &(), DecodeTarget::single())
        .unwrap();
    controller
        .load(&RequestDescriptor::get(h.url("/api/slow/10")), &(), DecodeTarget::single())
        .unwrap();

    let outcomes = h.wait_for(&recorder, 2);
    let delays: Vec<Value> = outcomes
        .into_iter()
        .map(|outcome| match outcome {
            Outcome::Success(data) => data["ms"].clone(),
            Outcome::Failure(error) => panic!("unexpected failure: {error}"),
        })
        .collect();
    assert_eq!(delays, vec![Value::from(10), Value::from(400)]);
}

#[test]
fn destroy_before_completion_suppresses_callbacks() {
    let h = Harness::new();
    let recorder = Recorder::<Value>::new();
    let mut controller = h.controller(&recorder);

    controller
        .load(&RequestDescriptor::get(h.url("/api/slow/300")), &(), DecodeTarget::single())
        .unwrap();
    let call = controller.in_flight().cloned().unwrap();
    controller.on_destroy();

    assert!(call.is_cancelled());
    assert!(!h.main_loop.run_until(Duration::from_millis(800), || recorder.len() > 0));
}

#[test]
fn cached_get_is_served_until_cleared() {
    let cache_dir = tempfile::tempdir().unwrap();
    let h = Harness::with_config(HttpConfig::builder().cache_dir(cache_dir.path()).build());
    let listed = Recorder::<Vec<Item>>::new();
    let mut list = h.controller(&listed);
    let items_url = RequestDescriptor::get(h.url("/api/items"));

    list.load_list(&items_url, &()).unwrap();
    assert!(success(h.wait_for(&listed, 1)).is_empty());

    let created = Recorder::<Item>::new();
    let mut create = h.controller(&created);
    create
        .load(
            &RequestDescriptor::post(h.url("/api/items")),
            &[("name", "cached")],
            DecodeTarget::single(),
        )
        .unwrap();
    success(h.wait_for(&created, 1));

    list.load_list(&items_url, &()).unwrap();
    assert!(success(h.wait_for(&listed, 1)).is_empty(), "served from cache");

    h.manager.clear_cache();
    list.load_list(&items_url, &()).unwrap();
    assert_eq!(success(h.wait_for(&listed, 1)).len(), 1);
}
