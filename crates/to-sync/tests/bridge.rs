//! End-to-end scenarios over the in-memory broker, with an in-process
//! axum router standing in for the fleet's callback endpoint.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::routing::any;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceExt;

use to_sync::{
    callback_handler, default_callback_handler, init_with_messager, to_sync, CallOptions,
    CallbackRequest, Client, Config, InMemoryBroker, InitError, Signer, ToSyncError,
};

type SubmitFut = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct TestReq {
    callback_url: String,
}

impl TestReq {
    fn new() -> Self {
        Self {
            callback_url: String::new(),
        }
    }
}

impl CallbackRequest for TestReq {
    fn callback_url(&self) -> &str {
        &self.callback_url
    }

    fn set_callback_url(&mut self, url: String) {
        self.callback_url = url;
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct TestCallbackData {
    msg: String,
}

fn config(max_callback_bytes: u64, timeout_seconds: u64) -> Config {
    Config {
        callback_url: "http://gateway.test/callback".to_string(),
        max_callback_bytes,
        stream: "to_sync_test".to_string(),
        timeout_seconds,
        secret: None,
    }
}

fn client_over(broker: &InMemoryBroker, cfg: &Config) -> Arc<Client> {
    Client::with_messager(Arc::new(broker.messager()), cfg).unwrap()
}

fn router_over(client: Arc<Client>) -> Router {
    Router::new()
        .route("/callback", any(callback_handler))
        .with_state(client)
}

async fn post(router: Router, url: &str, body: Vec<u8>) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(url)
        .body(Body::from(body))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// A submission that fires the callback through the router, the way an
/// external system would after finishing the job.
fn post_back(router: Router, body: Vec<u8>) -> impl FnOnce(&TestReq) -> SubmitFut {
    move |req: &TestReq| {
        let url = req.callback_url().to_string();
        Box::pin(async move {
            tokio::spawn(async move {
                let (status, text) = post(router, &url, body).await;
                assert_eq!(status, StatusCode::OK, "callback rejected: {text}");
            });
            Ok(())
        }) as SubmitFut
    }
}

#[tokio::test]
async fn test_happy_path_record_result() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let router = router_over(Arc::clone(&client));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let start = Instant::now();
    let mut req = TestReq::new();
    let body = serde_json::to_vec(&json!({"msg": "hello"})).unwrap();
    let data: TestCallbackData = to_sync(&mut req, post_back(router, body), &opts)
        .await
        .unwrap();

    assert_eq!(data.msg, "hello");
    assert!(start.elapsed() < Duration::from_secs(1));
    client.shutdown().await;
}

#[tokio::test]
async fn test_happy_path_map_result() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let router = router_over(Arc::clone(&client));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let mut req = TestReq::new();
    let body = serde_json::to_vec(&json!({"msg": "mapped"})).unwrap();
    let data: HashMap<String, String> = to_sync(&mut req, post_back(router, body), &opts)
        .await
        .unwrap();

    assert_eq!(data["msg"], "mapped");
    client.shutdown().await;
}

#[tokio::test]
async fn test_happy_path_sequence_results() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let router = router_over(Arc::clone(&client));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let body = serde_json::to_vec(&json!(["listed"])).unwrap();

    let mut req = TestReq::new();
    let data: Vec<String> = to_sync(&mut req, post_back(router.clone(), body.clone()), &opts)
        .await
        .unwrap();
    assert_eq!(data, vec!["listed".to_string()]);

    // Same payload into a fixed-size sequence.
    let mut req = TestReq::new();
    let data: [String; 1] = to_sync(&mut req, post_back(router, body), &opts)
        .await
        .unwrap();
    assert_eq!(data[0], "listed");

    client.shutdown().await;
}

#[tokio::test]
async fn test_happy_path_boxed_record_result() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let router = router_over(Arc::clone(&client));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let mut req = TestReq::new();
    let body = serde_json::to_vec(&json!({"msg": "boxed"})).unwrap();
    let data: Box<TestCallbackData> = to_sync(&mut req, post_back(router, body), &opts)
        .await
        .unwrap();

    assert_eq!(data.msg, "boxed");
    client.shutdown().await;
}

#[tokio::test]
async fn test_fan_out_across_clients() {
    let broker = InMemoryBroker::new();
    let cfg = config(1024 * 1024, 10);
    let client_a = client_over(&broker, &cfg);
    let client_b = client_over(&broker, &cfg);
    // The callback lands on A's endpoint; B only watches the stream.
    let router = router_over(Arc::clone(&client_a));
    let opts = [CallOptions::new().with_client(Arc::clone(&client_a))];

    let mut req = TestReq::new();
    let body = serde_json::to_vec(&json!({"msg": "fanned"})).unwrap();
    let data: TestCallbackData = to_sync(&mut req, post_back(router, body), &opts)
        .await
        .unwrap();
    assert_eq!(data.msg, "fanned");

    // B's listener saw the same entry, found no local waiter, dropped
    // it, and acknowledged.
    let deadline = Instant::now() + Duration::from_secs(3);
    while client_b.stats().dropped.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(client_b.stats().dropped.load(Ordering::Relaxed) >= 1);
    assert_eq!(client_b.stats().delivered.load(Ordering::Relaxed), 0);

    client_a.shutdown().await;
    client_b.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_callbacks_deliver_once() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let router = router_over(Arc::clone(&client));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let body = serde_json::to_vec(&json!({"msg": "once"})).unwrap();
    let router_for_submit = router.clone();
    let repeated_body = body.clone();

    let mut req = TestReq::new();
    let data: TestCallbackData = to_sync(
        &mut req,
        move |req: &TestReq| {
            let url = req.callback_url().to_string();
            Box::pin(async move {
                tokio::spawn(async move {
                    for _ in 0..3 {
                        let (status, _) =
                            post(router_for_submit.clone(), &url, repeated_body.clone()).await;
                        assert_eq!(status, StatusCode::OK);
                    }
                });
                Ok(())
            }) as SubmitFut
        },
        &opts,
    )
    .await
    .unwrap();
    assert_eq!(data.msg, "once");

    // All three stream entries are eventually accounted for, and the
    // caller saw exactly one of them.
    let stats = client.stats();
    let deadline = Instant::now() + Duration::from_secs(3);
    while stats.delivered.load(Ordering::Relaxed) + stats.dropped.load(Ordering::Relaxed) < 3
        && Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(
        stats.delivered.load(Ordering::Relaxed) + stats.dropped.load(Ordering::Relaxed),
        3
    );

    client.shutdown().await;
}

#[tokio::test]
async fn test_timeout_with_default_deadline() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 1));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let start = Instant::now();
    let mut req = TestReq::new();
    let err = to_sync::<_, TestCallbackData, _, _>(
        &mut req,
        |_req: &TestReq| async { Ok(()) },
        &opts,
    )
    .await
    .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ToSyncError::DeadlineExceeded));
    assert!(
        elapsed >= Duration::from_secs(1) && elapsed <= Duration::from_millis(1200),
        "deadline fired at {elapsed:?}"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_timeout_override_wins() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let opts = [CallOptions::new()
        .with_client(Arc::clone(&client))
        .with_timeout(Duration::from_millis(500))];

    let start = Instant::now();
    let mut req = TestReq::new();
    let err = to_sync::<_, TestCallbackData, _, _>(
        &mut req,
        |_req: &TestReq| async { Ok(()) },
        &opts,
    )
    .await
    .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ToSyncError::DeadlineExceeded));
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(700),
        "deadline fired at {elapsed:?}"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_waiter_released_after_timeout() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let opts = [CallOptions::new()
        .with_client(Arc::clone(&client))
        .with_timeout(Duration::from_millis(100))];

    let mut req = TestReq::new();
    let _ = to_sync::<_, TestCallbackData, _, _>(
        &mut req,
        |_req: &TestReq| async { Ok(()) },
        &opts,
    )
    .await
    .unwrap_err();

    // A callback arriving now addresses a released waiter: dropped.
    let router = router_over(Arc::clone(&client));
    let body = serde_json::to_vec(&json!({"msg": "late"})).unwrap();
    let (status, _) = post(router, req.callback_url(), body).await;
    assert_eq!(status, StatusCode::OK);

    let deadline = Instant::now() + Duration::from_secs(3);
    while client.stats().dropped.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(client.stats().dropped.load(Ordering::Relaxed) >= 1);
    assert_eq!(client.stats().delivered.load(Ordering::Relaxed), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_failed_submission_propagates() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let mut req = TestReq::new();
    let err = to_sync::<_, TestCallbackData, _, _>(
        &mut req,
        |_req: &TestReq| async { Err(anyhow::anyhow!("queue unavailable")) },
        &opts,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ToSyncError::Submit(_)));
    assert!(err.to_string().contains("queue unavailable"));
    client.shutdown().await;
}

#[tokio::test]
async fn test_oversized_body_returns_500() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(10, 10));
    let router = router_over(Arc::clone(&client));

    let (random, sign) = Signer::default().sign("async_id");
    let url = format!(
        "http://gateway.test/callback?async_id=async_id&random={random}&sign={sign}"
    );
    let (status, text) = post(router, &url, b"12345678901".to_vec()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        text.contains("body limited to 10 bytes"),
        "unexpected body: {text}"
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_bad_signature_returns_500_and_publishes_nothing() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(10, 10));
    let router = router_over(Arc::clone(&client));

    let (status, text) = post(
        router,
        "http://gateway.test/callback",
        b"12345678901".to_vec(),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(text.contains("invalid sign"), "unexpected body: {text}");
    assert!(broker.is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_result_shape_skips_submission() {
    let broker = InMemoryBroker::new();
    let client = client_over(&broker, &config(1024 * 1024, 10));
    let opts = [CallOptions::new().with_client(Arc::clone(&client))];

    let submitted = Arc::new(AtomicBool::new(false));
    let submitted_flag = Arc::clone(&submitted);

    let mut req = TestReq::new();
    let err = to_sync::<_, String, _, _>(
        &mut req,
        move |_req: &TestReq| {
            submitted_flag.store(true, Ordering::SeqCst);
            async { Ok(()) }
        },
        &opts,
    )
    .await
    .unwrap_err();

    assert!(
        err.to_string().contains("unexpected type: string"),
        "unexpected error: {err}"
    );
    assert!(!submitted.load(Ordering::SeqCst), "submission ran");
    // The request was never decorated either.
    assert!(req.callback_url().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn test_default_client_is_one_shot() {
    let broker = InMemoryBroker::new();
    let cfg = config(1024 * 1024, 10);

    init_with_messager(Arc::new(broker.messager()), &cfg).unwrap();
    let err = init_with_messager(Arc::new(broker.messager()), &cfg).unwrap_err();
    assert!(matches!(err, InitError::AlreadyInitialized));

    // The default path works end to end: no per-call client, callbacks
    // through the default handler.
    let router = Router::new().route("/callback", any(default_callback_handler));

    let mut req = TestReq::new();
    let body = serde_json::to_vec(&json!({"msg": "default"})).unwrap();
    let data: TestCallbackData = to_sync(&mut req, post_back(router, body), &[])
        .await
        .unwrap();
    assert_eq!(data.msg, "default");
}

#[tokio::test]
async fn test_missing_client_everywhere_fails() {
    // Another test in this binary may install the process-wide default
    // first; the no-client failure is only observable before that.
    if to_sync::default_client().is_none() {
        let mut req = TestReq::new();
        let err = to_sync::<_, TestCallbackData, _, _>(
            &mut req,
            |_req: &TestReq| async { Ok(()) },
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToSyncError::NotInitialized));
    }
}
