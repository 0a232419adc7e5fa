//! HTTP client for the local inference server

use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::entities::{GenerateBody, GenerationRequest};
use crate::infrastructure::errors::RelayError;
use crate::infrastructure::traits::InferenceBackend;
use async_trait::async_trait;
use bytes::Bytes;
use di::{Ref, inject, injectable};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use log::{debug, error};
use serde_json::Value;

/// Open response body of a streaming generation.
///
/// Dropping or cancelling the handle closes the underlying connection.
pub struct UpstreamStream {
    body: BoxStream<'static, Result<Bytes, RelayError>>,
}

impl UpstreamStream {
    pub fn new(body: impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static) -> Self {
        UpstreamStream {
            body: body.boxed(),
        }
    }

    /// Next chunk of raw bytes, `None` once the upstream ended the body.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, RelayError>> {
        self.body.next().await
    }

    /// Aborts the connection. Consuming `self` makes a second call impossible.
    pub fn cancel(self) {
        debug!("closing upstream stream");
        drop(self.body);
    }
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

#[injectable(InferenceBackend)]
impl OllamaClient {
    #[inject]
    pub fn create(config: Ref<RelayConfig>) -> OllamaClient {
        OllamaClient::new(&config.upstream_base_url)
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> OllamaClient {
        OllamaClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_generate(&self, body: &GenerateBody<'_>) -> Result<reqwest::Response, RelayError> {
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("upstream answered {status}: {body}");
    Err(RelayError::Upstream {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn open(&self, request: &GenerationRequest) -> Result<UpstreamStream, RelayError> {
        debug!("opening stream for model {}", request.model);
        let response = self.post_generate(&GenerateBody::streaming(request)).await?;

        Ok(UpstreamStream::new(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| RelayError::Stream(e.to_string()))),
        ))
    }

    async fn list_models(&self) -> Result<Value, RelayError> {
        let response = self
            .http
            .get(self.endpoint("/api/tags"))
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        Ok(ensure_success(response).await?.json().await?)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, RelayError> {
        let response = self
            .post_generate(&GenerateBody::single_shot(request))
            .await?;

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_stream_yields_chunks_then_ends() {
        let mut upstream = UpstreamStream::new(stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":")),
            Ok(Bytes::from_static(b"\"hi\"}\n")),
        ]));

        assert_eq!(
            upstream.next_chunk().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"response\":")
        );
        assert!(upstream.next_chunk().await.unwrap().is_ok());
        assert!(upstream.next_chunk().await.is_none());

        // Cancelling a finished stream is harmless.
        upstream.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_a_connection_error() {
        // Port 9 (discard) is closed on test machines.
        let client = OllamaClient::new("http://127.0.0.1:9/");
        let result = client
            .open(&GenerationRequest::new("llama3", "hello"))
            .await;

        assert!(matches!(result, Err(RelayError::Connection(_))));
    }
}
