//! Implementations for the service the app needs.
//!

use crate::core::session::{RelaySession, SessionReport};
use crate::core::traits::RelayService;
use crate::core::transport::TransportSink;
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::entities::GenerationRequest;
use crate::infrastructure::errors::RelayError;
use crate::infrastructure::traits::InferenceBackend;
use async_trait::async_trait;
use di::{Ref, injectable};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

#[injectable(RelayService)]
pub struct OllamaRelayService {
    backend: Ref<dyn InferenceBackend>,
    config: Ref<RelayConfig>,
}

#[async_trait]
impl RelayService for OllamaRelayService {
    async fn relay(
        &self,
        session: String,
        request: GenerationRequest,
        sink: Arc<dyn TransportSink>,
        disconnect: BoxFuture<'static, ()>,
    ) -> SessionReport {
        RelaySession::new(session, request, sink)
            .with_idle_timeout(self.config.stream_idle_timeout)
            .run(self.backend.as_ref(), disconnect)
            .await
    }

    async fn list_models(&self) -> Result<Value, RelayError> {
        self.backend.list_models().await
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Value, RelayError> {
        self.backend.generate(&request).await
    }
}
