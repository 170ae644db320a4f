use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context, Result};
use reqwest::Url;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::tensor::InferInput;
use crate::wire::{self, InferResponseHeader, OutputTensor};

/// Async client against one inference endpoint. Cheap to clone the inner
/// pieces; the semaphore caps requests in flight across all pending calls.
pub struct InferenceClient {
    http: reqwest::Client,
    base: Url,
    permits: Arc<Semaphore>,
}

impl InferenceClient {
    /// Builds a client for `url` (`host:port`, scheme optional) allowing at
    /// most `concurrency` requests in flight. Does not contact the server.
    pub fn connect(url: &str, concurrency: usize) -> Result<Self> {
        ensure!(concurrency > 0, "concurrency must be at least 1");

        let with_scheme = if url.contains("://") {
            url.to_string()
        } else {
            format!("http://{url}")
        };
        let base = Url::parse(&with_scheme)
            .with_context(|| format!("invalid inference server url: {url}"))?;
        if base.host_str().is_none() {
            bail!("inference server url has no host: {url}");
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(concurrency)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base,
            permits: Arc::new(Semaphore::new(concurrency)),
        })
    }

    /// Dispatches an inference request without waiting for the result.
    /// The returned handle resolves once the server responds.
    pub fn async_infer(&self, model: &str, inputs: Vec<InferInput>) -> Result<PendingInference> {
        let endpoint = self
            .base
            .join(&format!("v2/models/{model}/infer"))
            .with_context(|| format!("invalid model name: {model}"))?;
        let (body, header_len) = wire::encode_request(&inputs)?;

        let http = self.http.clone();
        let permits = self.permits.clone();
        let model = model.to_string();

        let task = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("client closed"))?;

            debug!(model = %model, bytes = body.len(), "sending inference request");
            let response = http
                .post(endpoint)
                .header(wire::INFER_HEADER_LEN, header_len)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body)
                .send()
                .await
                .with_context(|| format!("inference request to model '{model}' failed"))?;

            let status = response.status();
            let json_len = response
                .headers()
                .get(wire::INFER_HEADER_LEN)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let bytes = response
                .bytes()
                .await
                .context("failed to read inference response body")?;

            if !status.is_success() {
                let message = serde_json::from_slice::<wire::ErrorBody>(&bytes)
                    .map(|e| e.error)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
                bail!("model '{model}' returned {status}: {message}");
            }

            let (header, outputs) = wire::decode_response(bytes, json_len)?;
            Ok(InferResult { header, outputs })
        });

        Ok(PendingInference { task })
    }
}

/// Handle for a dispatched request; resolved by an explicit wait.
pub struct PendingInference {
    task: JoinHandle<Result<InferResult>>,
}

impl PendingInference {
    /// Blocks until the server responds. Consumes the handle.
    pub async fn get_result(self) -> Result<InferResult> {
        self.task.await.context("inference task panicked")?
    }
}

#[derive(Debug)]
pub struct InferResult {
    header: InferResponseHeader,
    outputs: Vec<OutputTensor>,
}

impl InferResult {
    pub fn model_name(&self) -> &str {
        &self.header.model_name
    }

    /// Response descriptor as the server sent it.
    pub fn response(&self) -> &InferResponseHeader {
        &self.header
    }

    pub fn outputs(&self) -> &[OutputTensor] {
        &self.outputs
    }

    /// Looks up a named output; absent names are a request failure.
    pub fn output(&self, name: &str) -> Result<&OutputTensor> {
        self.outputs
            .iter()
            .find(|out| out.name == name)
            .with_context(|| {
                format!(
                    "output '{name}' missing from response for model '{}'",
                    self.header.model_name
                )
            })
    }
}
