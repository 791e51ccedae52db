use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ctx_request::{
    AdapterTask, Client, ErrorKind, ExtOverrides, RequestConfig, RequestOptions, Response,
    TaskHandle, TransportError, X_REQUEST_ID, X_REQUEST_TIME,
};
use serde_json::{json, Value as JsonValue};

/// In-process adapter replaying scripted outcomes and recording every request.
#[derive(Clone, Default)]
struct ScriptedAdapter {
    outcomes: Arc<Mutex<VecDeque<Result<Response, TransportError>>>>,
    seen: Arc<Mutex<Vec<RequestConfig>>>,
}

impl ScriptedAdapter {
    fn new(outcomes: Vec<Result<Response, TransportError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            seen: Arc::default(),
        }
    }

    fn ok(body: JsonValue) -> Self {
        Self::new(vec![Ok(Response::new(200, body))])
    }

    fn calls(&self) -> usize {
        self.seen.lock().expect("seen mutex must not be poisoned").len()
    }

    fn last_request(&self) -> RequestConfig {
        self.seen
            .lock()
            .expect("seen mutex must not be poisoned")
            .last()
            .cloned()
            .expect("adapter must have been called")
    }
}

impl ctx_request::Adapter for ScriptedAdapter {
    fn send(&self, req: &RequestConfig) -> AdapterTask {
        self.seen
            .lock()
            .expect("seen mutex must not be poisoned")
            .push(req.clone());
        let next = self
            .outcomes
            .lock()
            .expect("outcome mutex must not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(Response::new(500, JsonValue::Null)));
        AdapterTask::ready(next)
    }
}

fn client_with(adapter: &ScriptedAdapter) -> Client {
    Client::new().with_options(ExtOverrides::new().adapter(adapter.clone()))
}

#[tokio::test]
async fn disabled_business_check_accepts_any_body() {
    for overrides in [
        ExtOverrides::new().disable_retcode(),
        ExtOverrides::new().disable_white_list(),
    ] {
        let adapter = ScriptedAdapter::ok(json!({ "retcode": 99, "message": "ignored" }));
        let client = client_with(&adapter);

        let res = client
            .get(RequestOptions::new("https://api.x/a").ext(overrides))
            .await
            .expect("business check is off");
        assert_eq!(res.data["retcode"], json!(99));
    }
}

#[tokio::test]
async fn zero_retcode_resolves_with_payload() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 0, "items": [1, 2] }));
    let res = client_with(&adapter)
        .get("https://api.x/items")
        .await
        .expect("retcode 0 must resolve");

    assert_eq!(res.status_code, 200);
    assert_eq!(res.data["items"], json!([1, 2]));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn business_failure_rejects_once_without_retry() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 7, "message": "bad" }));
    let client = client_with(&adapter);
    client.update_options(ExtOverrides::new().repeat_num(5));

    let err = client.get("https://api.x/a").await.expect_err("must reject");

    assert_eq!(err.kind(), ErrorKind::Logic);
    assert_eq!(err.retcode(), Some(7));
    assert_eq!(err.message(), "bad");
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn nested_logic_message_key() {
    let adapter = ScriptedAdapter::ok(json!({ "err": { "text": "oops" }, "retcode": 3 }));
    let client = client_with(&adapter);

    let err = client
        .post(
            RequestOptions::new("https://api.x/a")
                .ext(ExtOverrides::new().logic_error_msg_key("err.text")),
        )
        .await
        .expect_err("must reject");

    assert_eq!(err.message(), "oops");
    assert_eq!(err.retcode(), Some(3));
}

#[tokio::test]
async fn server_errors_are_retried_repeat_num_times() {
    for repeat_num in [0u32, 1, 3] {
        let adapter = ScriptedAdapter::new(Vec::new());
        let client = client_with(&adapter);
        client.update_options(ExtOverrides::new().repeat_num(repeat_num));

        let err = client.get("https://api.x/a").await.expect_err("must reject");

        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(adapter.calls(), repeat_num as usize + 1);
    }
}

#[tokio::test]
async fn transport_failure_surfaces_as_network_error() {
    let adapter = ScriptedAdapter::new(vec![Err(TransportError::new("Request Error"))]);
    let client = client_with(&adapter);

    let err = client
        .get(RequestOptions::new("https://api.x/a").ext(ExtOverrides::new().repeat_num(0)))
        .await
        .expect_err("must reject");

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.message(), "Request Error");
}

#[tokio::test]
async fn base_url_is_prepended_for_relative_urls() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 0 }));
    let client = client_with(&adapter).with_header("Accept", "application/json");
    client.update_options(ExtOverrides::new().base_url("https://api.x"));

    client.get("/a").await.expect("must resolve");

    let sent = adapter.last_request();
    assert_eq!(sent.url, "https://api.x/a");
    assert_eq!(sent.method, ctx_request::Method::GET);
    assert_eq!(sent.header.get("Accept").map(String::as_str), Some("application/json"));
    assert!(sent.header.contains_key(X_REQUEST_ID));
    assert!(sent.header.contains_key(X_REQUEST_TIME));
}

#[tokio::test]
async fn plugins_shape_request_and_response() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 0, "value": 1 }));
    let mut client = client_with(&adapter);
    client
        .use_request(|ctx| {
            ctx.req.url = format!("{}?sig=abc", ctx.req.url);
            Ok(())
        })
        .use_response(|ctx| {
            if let Some(res) = ctx.res.as_mut() {
                res.data["value"] = json!(2);
            }
            Ok(())
        });

    let res = client.get("https://api.x/a").await.expect("must resolve");

    assert_eq!(adapter.last_request().url, "https://api.x/a?sig=abc");
    assert_eq!(res.data["value"], json!(2));
}

#[tokio::test]
async fn request_plugin_error_stops_before_transport() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 0 }));
    let mut client = client_with(&adapter);
    client.use_request(|_| Err(ctx_request::RequestError::network("signing failed")));

    let err = client.get("https://api.x/a").await.expect_err("must reject");

    assert_eq!(err.message(), "signing failed");
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn custom_retcode_key_is_normalized_before_plugins() {
    let adapter = ScriptedAdapter::ok(json!({ "code": 0 }));
    let seen = Arc::new(Mutex::new(None));
    let mut client = client_with(&adapter);
    client.update_options(ExtOverrides::new().retcode_key("code"));
    {
        let seen = Arc::clone(&seen);
        client.use_response(move |ctx| {
            *seen.lock().expect("seen mutex must not be poisoned") =
                ctx.res.as_ref().map(|res| res.data["retcode"].clone());
            Ok(())
        });
    }

    client.get("https://api.x/a").await.expect("must resolve");
    assert_eq!(*seen.lock().expect("seen mutex must not be poisoned"), Some(json!(0)));
}

#[tokio::test]
async fn completion_hook_observes_success() {
    let adapter = ScriptedAdapter::ok(json!({ "retcode": 0 }));
    let completed = Arc::new(AtomicUsize::new(0));
    let mut client = client_with(&adapter);
    {
        let completed = Arc::clone(&completed);
        client.on_complete(move |ctx, err| {
            assert!(err.is_none());
            assert!(ctx.res.is_some());
            assert!(ctx.ext.request_cost_time.is_some());
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    client.get("https://api.x/a").await.expect("must resolve");
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

/// Adapter that never settles on its own; aborting it makes it fail.
fn hanging_adapter(
    aborts: Arc<AtomicUsize>,
    aborted_at: Arc<Mutex<Option<tokio::time::Instant>>>,
) -> impl Fn(&RequestConfig) -> AdapterTask + Send + Sync {
    move |_req: &RequestConfig| {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let aborts = Arc::clone(&aborts);
        let aborted_at = Arc::clone(&aborted_at);
        let handle = TaskHandle::new(move || {
            aborts.fetch_add(1, Ordering::SeqCst);
            *aborted_at.lock().expect("instant mutex must not be poisoned") =
                Some(tokio::time::Instant::now());
            if let Some(tx) = tx.lock().expect("sender mutex must not be poisoned").take() {
                let _ = tx.send(());
            }
        });
        AdapterTask::new(
            async move {
                let _ = rx.await;
                Err(TransportError::aborted())
            },
            handle,
        )
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_aborts_hanging_task() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let aborted_at = Arc::new(Mutex::new(None));
    let client = Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::clone(&aborts), Arc::clone(&aborted_at)))
            .timeout_ms(200)
            .repeat_num(0),
    );

    let started = tokio::time::Instant::now();
    let err = client.get("https://api.x/slow").await.expect_err("must time out");

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.message(), "Request Abort");
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    let aborted_at = aborted_at
        .lock()
        .expect("instant mutex must not be poisoned")
        .expect("abort must have been recorded");
    assert!(aborted_at.duration_since(started) >= Duration::from_millis(200));
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_applies_to_every_retry() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let client = Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::clone(&aborts), Arc::default()))
            .timeout_ms(50)
            .repeat_num(2),
    );

    let err = client.get("https://api.x/slow").await.expect_err("must time out");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(aborts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn abort_cancels_in_flight_requests() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let client = Arc::new(Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::clone(&aborts), Arc::default()))
            .repeat_num(0),
    ));

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get("https://api.x/a").await })
    };
    while client.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(client.abort(), 1);
    let err = pending
        .await
        .expect("request task must not panic")
        .expect_err("aborted request must reject");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert_eq!(client.abort(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_calls_release_their_tasks() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let client = Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::clone(&aborts), Arc::default()))
            .repeat_num(0),
    );

    for _ in 0..3 {
        let outcome =
            tokio::time::timeout(Duration::from_millis(10), client.get("https://api.x/a")).await;
        assert!(outcome.is_err(), "call must still be pending when dropped");
    }

    assert_eq!(client.in_flight(), 0);
    assert_eq!(aborts.load(Ordering::SeqCst), 3);
    assert_eq!(client.abort(), 0);
}

#[tokio::test]
async fn concurrent_calls_to_one_url_get_distinct_tasks() {
    let aborts = Arc::new(AtomicUsize::new(0));
    let client = Arc::new(Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::clone(&aborts), Arc::default()))
            .repeat_num(0),
    ));

    let pending: Vec<_> = (0..2)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.get("https://api.x/same").await })
        })
        .collect();
    while client.in_flight() < 2 {
        tokio::task::yield_now().await;
    }

    assert_eq!(client.in_flight(), 2);
    assert_eq!(client.abort(), 2);
    for call in pending {
        let err = call
            .await
            .expect("request task must not panic")
            .expect_err("aborted request must reject");
        assert_eq!(err.kind(), ErrorKind::Network);
    }
    assert_eq!(aborts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn update_options_leaves_pending_calls_on_their_snapshot() {
    let finished = Arc::new(Mutex::new(None));
    let mut client = Client::new().with_options(
        ExtOverrides::new()
            .adapter(hanging_adapter(Arc::default(), Arc::default()))
            .base_url("https://a")
            .repeat_num(0),
    );
    {
        let finished = Arc::clone(&finished);
        client.on_complete(move |ctx, _err| {
            *finished.lock().expect("finished mutex must not be poisoned") = Some((
                ctx.req.url.clone(),
                ctx.ext.options.repeat_num,
                ctx.ext.attempts,
            ));
        });
    }
    let client = Arc::new(client);

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.get("/x").await })
    };
    while client.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    client.update_options(ExtOverrides::new().base_url("https://b").repeat_num(3));
    assert_eq!(client.abort(), 1);
    pending
        .await
        .expect("request task must not panic")
        .expect_err("aborted request must reject");

    assert_eq!(
        *finished.lock().expect("finished mutex must not be poisoned"),
        Some(("https://a/x".to_owned(), 0, 1))
    );
    assert_eq!(client.options().base_url, "https://b");
    assert_eq!(client.options().repeat_num, 3);
}

// Real transport against a local axum server.

#[derive(Clone)]
struct MockState {
    statuses: Arc<Mutex<VecDeque<StatusCode>>>,
    hits: Arc<AtomicUsize>,
}

async fn echo_query(
    State(state): State<MockState>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let status = state
        .statuses
        .lock()
        .expect("status queue mutex must not be poisoned")
        .pop_front()
        .unwrap_or(StatusCode::OK);
    let request_id = headers
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    (
        status,
        Json(json!({ "retcode": 0, "query": query, "requestId": request_id })),
    )
}

async fn echo_body(headers: HeaderMap, body: String) -> impl IntoResponse {
    let content_type = headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let parsed: JsonValue = serde_json::from_str(&body).unwrap_or(JsonValue::Null);
    Json(json!({ "retcode": 0, "contentType": content_type, "echo": parsed }))
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Json(json!({ "retcode": 0 }))
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn spawn_server(statuses: Vec<StatusCode>) -> TestServer {
    let state = MockState {
        statuses: Arc::new(Mutex::new(statuses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/query", get(echo_query))
        .route("/echo", post(echo_body))
        .route("/slow", get(slow))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        task,
    }
}

#[tokio::test]
async fn reqwest_adapter_sends_get_body_as_query() {
    let server = spawn_server(Vec::new()).await;
    let client = Client::new().with_options(ExtOverrides::new().base_url(server.base_url.clone()));

    let res = client
        .get(RequestOptions::new("/query").json(json!({ "q": "kit", "page": 2 })))
        .await
        .expect("must resolve");

    assert_eq!(res.data["query"], json!({ "q": "kit", "page": "2" }));
    assert_eq!(res.data["requestId"].as_str().map(str::len), Some(32));
    assert!(res.header.contains_key("content-type"));
}

#[tokio::test]
async fn reqwest_adapter_posts_json() {
    let server = spawn_server(Vec::new()).await;
    let client = Client::new().with_options(ExtOverrides::new().base_url(server.base_url.clone()));

    let res = client
        .post(RequestOptions::new("/echo").json(json!({ "name": "kit" })))
        .await
        .expect("must resolve");

    assert_eq!(res.data["echo"], json!({ "name": "kit" }));
    assert_eq!(res.data["contentType"], json!("application/json; charset=utf-8"));
}

#[tokio::test]
async fn reqwest_adapter_retries_server_errors() {
    let server = spawn_server(vec![
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
    ])
    .await;
    let client = Client::new().with_options(ExtOverrides::new().base_url(server.base_url.clone()));

    client.get("/query").await.expect("third attempt must succeed");
    assert_eq!(server.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn reqwest_adapter_is_aborted_on_timeout() {
    let server = spawn_server(Vec::new()).await;
    let client = Client::new().with_options(
        ExtOverrides::new()
            .base_url(server.base_url.clone())
            .timeout_ms(30)
            .repeat_num(0),
    );

    let err = client.get("/slow").await.expect_err("must time out");
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.message(), "Request Abort");
}
