// src/lambda/runtime.rs

//! Minimal client for the Lambda custom-runtime API.
//!
//! When the entry point detects a hosted Lambda environment it blocks on
//! this loop: long-poll the next invocation, run the handler, post the
//! response (or the structured error record) back. The host terminates the
//! process; the loop itself never returns under normal operation.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::handler::LambdaHandler;

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";

pub(crate) async fn run(handler: LambdaHandler) -> Result<()> {
    let api = std::env::var("AWS_LAMBDA_RUNTIME_API")
        .context("AWS_LAMBDA_RUNTIME_API not set")?;
    let base = format!("http://{api}/{RUNTIME_API_VERSION}/runtime");
    let client = Client::new();
    info!(api = %api, "registered with the Lambda runtime API");

    loop {
        let next = client
            .get(format!("{base}/invocation/next"))
            .send()
            .await
            .context("polling next invocation")?;

        let request_id = next
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let payload: Value = next
            .json()
            .await
            .context("decoding invocation payload")?;

        match handler.invoke(CancellationToken::new(), payload).await {
            Ok(response) => {
                client
                    .post(format!("{base}/invocation/{request_id}/response"))
                    .json(&response)
                    .send()
                    .await
                    .context("posting invocation response")?;
            }
            Err(err) => {
                error!(request_id = %request_id, error = %err, "invocation failed");
                client
                    .post(format!("{base}/invocation/{request_id}/error"))
                    .json(&err.record())
                    .send()
                    .await
                    .context("posting invocation error")?;
            }
        }
    }
}
