//! DI "Interfaces"

use crate::core::session::SessionReport;
use crate::core::transport::TransportSink;
use crate::infrastructure::entities::GenerationRequest;
use crate::infrastructure::errors::RelayError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait RelayService: Send + Sync {
    /// Relays one generation to `sink` and returns once the session ended.
    ///
    /// `disconnect` is the client-gone signal; when it resolves the upstream
    /// is cancelled and the sink receives nothing more.
    async fn relay(
        &self,
        session: String,
        request: GenerationRequest,
        sink: Arc<dyn TransportSink>,
        disconnect: BoxFuture<'static, ()>,
    ) -> SessionReport;

    /// Lists models known to the inference server.
    async fn list_models(&self) -> Result<Value, RelayError>;

    /// Runs a single non-streaming generation.
    async fn generate(&self, request: GenerationRequest) -> Result<Value, RelayError>;
}
