// tests/stub_server.rs

//! The local Invoke-API stub, exercised over real HTTP: an ephemeral
//! listener plus a reqwest client, the same way an aws cli points at
//! `--endpoint http://localhost:<port>`.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use relaydag::lambda::stub::stub_router;
use relaydag::{Dag, DagOptions, LambdaHandler};
use relaydag_test_utils::builders::DagBuilder;
use relaydag_test_utils::init_tracing;
use serde_json::{json, Value};

async fn start_stub(dag: Dag) -> SocketAddr {
    let router = stub_router(dag.id().to_string(), LambdaHandler::new(Arc::new(dag)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn invoke_url(addr: SocketAddr, function_name: &str) -> String {
    format!("http://{addr}/2015-03-31/functions/{function_name}/invocations")
}

#[tokio::test]
async fn drives_a_dag_to_completion_over_http() {
    init_tracing();
    let (dag, log) = DagBuilder::new("my-dag", DagOptions::new())
        .task("t1")
        .task("t2")
        .edge("t1", "t2")
        .build();
    let addr = start_stub(dag).await;
    let client = reqwest::Client::new();

    let mut payload = json!({"k": 1});
    let mut last = Value::Null;
    for _ in 0..5 {
        let resp = client
            .post(invoke_url(addr, "my-dag"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()
                .get("x-amz-executed-version")
                .and_then(|v| v.to_str().ok()),
            Some("1")
        );
        last = resp.json().await.unwrap();
        if last["Continue"] == json!(false) {
            break;
        }
        payload = last.clone();
    }

    assert_eq!(last["Continue"], json!(false));
    assert_eq!(
        last["TaskResponses"],
        json!({"t1": "t1 success", "t2": "t2 success"})
    );
    assert_eq!(log.handled_sorted(), vec!["t1", "t2"]);
}

#[tokio::test]
async fn accepts_the_function_arn() {
    let (dag, _) = DagBuilder::new("my-dag", DagOptions::new()).task("t1").build();
    let addr = start_stub(dag).await;

    let arn = "arn:aws:lambda:us-east-1:123456789012:function:my-dag";
    let resp = reqwest::Client::new()
        .post(invoke_url(addr, arn))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unknown_function_name_is_resource_not_found() {
    let (dag, _) = DagBuilder::new("my-dag", DagOptions::new()).task("t1").build();
    let addr = start_stub(dag).await;

    let resp = reqwest::Client::new()
        .post(invoke_url(addr, "other-function"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(
        resp.headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok()),
        Some("ResourceNotFoundException")
    );
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("Function not found: "), "got: {body}");
}

#[tokio::test]
async fn invalid_payload_is_a_bad_request() {
    let (dag, _) = DagBuilder::new("my-dag", DagOptions::new()).task("t1").build();
    let addr = start_stub(dag).await;

    let resp = reqwest::Client::new()
        .post(invoke_url(addr, "my-dag"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok()),
        Some("InvalidRequestContentException")
    );
}

#[tokio::test]
async fn qualifier_is_echoed_as_executed_version() {
    let (dag, _) = DagBuilder::new("my-dag", DagOptions::new()).task("t1").build();
    let addr = start_stub(dag).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}?Qualifier=7", invoke_url(addr, "my-dag")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("x-amz-executed-version")
            .and_then(|v| v.to_str().ok()),
        Some("7")
    );

    let resp = client
        .post(format!("{}?Qualifier=$LATEST", invoke_url(addr, "my-dag")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("x-amz-executed-version")
            .and_then(|v| v.to_str().ok()),
        Some("$LATEST")
    );
}

#[tokio::test]
async fn tail_log_type_returns_a_base64_log_result() {
    init_tracing();
    let (dag, _) = DagBuilder::new("my-dag", DagOptions::new()).task("t1").build();
    let addr = start_stub(dag).await;

    let resp = reqwest::Client::new()
        .post(invoke_url(addr, "my-dag"))
        .header("X-Amz-Log-Type", "Tail")
        .json(&json!({"k": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let encoded = resp
        .headers()
        .get("x-amz-log-result")
        .and_then(|v| v.to_str().ok())
        .expect("log result header present")
        .to_string();
    let tail = String::from_utf8(STANDARD_NO_PAD.decode(encoded).unwrap()).unwrap();
    assert!(tail.contains("START RequestId: "), "tail: {tail}");
    assert!(tail.contains(r#"{"k":1}"#), "tail: {tail}");
    assert!(tail.contains("END RequestId: "), "tail: {tail}");
    assert!(tail.contains("REPORT RequestId: "), "tail: {tail}");

    // Without the header there is no log result.
    let resp = reqwest::Client::new()
        .post(invoke_url(addr, "my-dag"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("x-amz-log-result").is_none());
}

#[tokio::test]
async fn handler_errors_set_the_function_error_header() {
    init_tracing();
    let (dag, _) = DagBuilder::new(
        "my-dag",
        DagOptions::new().with_circuit_breaker(1),
    )
    .task("t1")
    .build();
    let addr = start_stub(dag).await;

    let resp = reqwest::Client::new()
        .post(invoke_url(addr, "my-dag"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("x-amz-function-error")
            .and_then(|v| v.to_str().ok()),
        Some("RelayDAG.CircuitBreak")
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorType"], "RelayDAG.CircuitBreak");
    assert!(body["errorMessage"].as_str().unwrap().contains("circuit break"));
}
