// src/lambda/stub.rs

//! Local HTTP stub of the Lambda Invoke API.
//!
//! Serves `POST /2015-03-31/functions/{functionName}/invocations` so a DAG
//! can be driven locally with the same client code that talks to the real
//! service, e.g.:
//!
//! ```text
//! aws lambda --endpoint http://localhost:3001 invoke --function-name my-dag out.json
//! ```
//!
//! The stub validates the function name (bare name or ARN), sets the
//! `X-Amz-Executed-Version` / `X-Amz-Function-Error` headers, and builds a
//! synthetic `START`/`END`/`REPORT` log tail returned base64-encoded in
//! `X-Amz-Log-Result` when the request asks for `X-Amz-Log-Type: Tail`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::dag::Dag;
use super::handler::LambdaHandler;

// https://docs.aws.amazon.com/lambda/latest/dg/API_Invoke.html
const FUNCTION_NAME_PATTERN: &str = r"^(arn:(aws[a-zA-Z-]*)?:lambda:)?([a-z]{2}(-gov)?-[a-z]+-\d{1}:)?(\d{12}:)?(function:)?([a-zA-Z0-9-_\.]+)(:(\$LATEST|[a-zA-Z0-9-_]+))?$";

const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";
const EXECUTED_VERSION_HEADER: &str = "x-amz-executed-version";
const FUNCTION_ERROR_HEADER: &str = "x-amz-function-error";
const LOG_RESULT_HEADER: &str = "x-amz-log-result";

struct StubState {
    function_name: String,
    handler: LambdaHandler,
    pattern: Regex,
}

/// Build the stub router for a single function.
pub fn stub_router(function_name: impl Into<String>, handler: LambdaHandler) -> Router {
    let state = Arc::new(StubState {
        function_name: function_name.into(),
        handler,
        pattern: Regex::new(FUNCTION_NAME_PATTERN).expect("function name pattern is valid"),
    });
    Router::new()
        .route(
            "/2015-03-31/functions/{function_name}/invocations",
            post(invoke),
        )
        .with_state(state)
}

/// Serve the stub for `dag` until ctrl-c.
pub async fn serve(dag: Arc<Dag>, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding stub Lambda API to {addr}"))?;
    info!(addr = %addr, "starting stub Lambda API");

    let router = stub_router(dag.id().to_string(), LambdaHandler::new(dag));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving stub Lambda API")?;
    info!("stub Lambda API shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}

async fn invoke(
    State(state): State<Arc<StubState>>,
    Path(function_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.pattern.is_match(&function_name) {
        return error_response(
            StatusCode::NOT_FOUND,
            "InvalidParameterValueException",
            "FunctionName is invalid".to_string(),
        );
    }
    let mut qualifier = params.get("Qualifier").cloned().unwrap_or_default();

    let (resolved_name, function_arn) = resolve_function(&function_name, &qualifier);
    if resolved_name != state.function_name {
        return error_response(
            StatusCode::NOT_FOUND,
            "ResourceNotFoundException",
            format!("Function not found: {function_arn}"),
        );
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "InvalidRequestContentException",
                format!("can not read payload: {err}"),
            );
        }
    };

    let mut out_headers = HeaderMap::new();
    if qualifier == "$LATEST" {
        set_header(&mut out_headers, EXECUTED_VERSION_HEADER, "$LATEST");
    } else if let Ok(version) = qualifier.parse::<u64>() {
        set_header(&mut out_headers, EXECUTED_VERSION_HEADER, &version.to_string());
    } else {
        set_header(&mut out_headers, EXECUTED_VERSION_HEADER, "1");
        if qualifier.is_empty() {
            qualifier = "$LATEST".to_string();
        }
    }

    let request_id = Uuid::new_v4().to_string();
    let clock = state.handler.clock().clone();
    let started = clock.now();
    let ts = |at: chrono::DateTime<chrono::Utc>| at.format("%Y/%m/%d %H:%M:%S");

    let mut log_tail = String::new();
    log_tail.push_str(&format!(
        "{} START RequestId: {} Version: {}\n",
        ts(started),
        request_id,
        qualifier
    ));
    log_tail.push_str(&format!(
        "{} {}\n",
        ts(started),
        String::from_utf8_lossy(&body)
    ));
    info!(request_id = %request_id, "START stub invocation");

    let invocation_type = headers
        .get("x-amz-invocation-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("RequestResponse");

    let result = state
        .handler
        .invoke(CancellationToken::new(), payload)
        .await;

    let ended = clock.now();
    let output = match result {
        Ok(response) => response,
        Err(err) => {
            set_header(&mut out_headers, FUNCTION_ERROR_HEADER, &err.error_type);
            err.record()
        }
    };
    let output_body = output.to_string();
    log_tail.push_str(&format!("{} {}\n", ts(ended), output_body));
    log_tail.push_str(&format!("{} END RequestId: {}\n", ts(ended), request_id));
    let duration_ms = (ended - started).num_microseconds().unwrap_or(0) as f64 / 1000.0;
    log_tail.push_str(&format!(
        "{} REPORT RequestId: {}\tDuration: {:.2} ms\tBilled Duration: {:.0} ms\tMemory Size: 128 MB\tMax Memory Used: 128 MB\n",
        ts(ended),
        request_id,
        duration_ms,
        duration_ms.ceil()
    ));
    info!(request_id = %request_id, duration_ms, "END stub invocation");

    let wants_tail = headers
        .get("x-amz-log-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Tail");
    if wants_tail && invocation_type == "RequestResponse" {
        set_header(
            &mut out_headers,
            LOG_RESULT_HEADER,
            &STANDARD_NO_PAD.encode(log_tail.as_bytes()),
        );
    }

    (StatusCode::OK, out_headers, output_body).into_response()
}

/// Resolve a bare function name or ARN to `(name, full ARN)`.
///
/// Bare names are expanded to a synthetic ARN in the default region with a
/// placeholder account, mirroring what the real Invoke API reports back.
/// An ARN keeps any qualifier inside its resource part, so a qualified ARN
/// for the right function still mismatches a bare registered name, exactly
/// like the real service's name resolution.
fn resolve_function(function_name: &str, qualifier: &str) -> (String, String) {
    if let Some(resource) = parse_lambda_arn(function_name) {
        let name = resource
            .strip_prefix("function:")
            .unwrap_or(&resource)
            .to_string();
        return (name, function_name.to_string());
    }

    let region = std::env::var("AWS_DEFAULT_REGION").unwrap_or_default();
    let region = if region.is_empty() {
        "us-east-1".to_string()
    } else {
        region
    };
    let mut resource = format!("function:{function_name}");
    if !qualifier.is_empty() {
        resource.push_str(&format!(":{qualifier}"));
    }
    let arn = format!("arn:aws:lambda:{region}:123456789012:{resource}");
    (function_name.to_string(), arn)
}

/// Resource part of a Lambda ARN (`function:name[:qualifier]`), or `None`
/// when the input is not an ARN.
fn parse_lambda_arn(input: &str) -> Option<String> {
    let mut parts = input.splitn(6, ':');
    if parts.next()? != "arn" {
        return None;
    }
    let _partition = parts.next()?;
    if parts.next()? != "lambda" {
        return None;
    }
    let _region = parts.next()?;
    let _account = parts.next()?;
    Some(parts.next()?.to_string())
}

fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, ERROR_TYPE_HEADER, error_type);
    (status, headers, message).into_response()
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::try_from(name),
        HeaderValue::try_from(value),
    ) {
        headers.insert(name, value);
    }
}
