//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities::GenerationRequest;
use crate::infrastructure::errors::RelayError;
use crate::infrastructure::upstream::UpstreamStream;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Opens a streaming generation.
    ///
    /// Returns `Err(RelayError::Connection)` if the server is unreachable and
    /// `Err(RelayError::Upstream)` if it answers with a failure status.
    async fn open(&self, request: &GenerationRequest) -> Result<UpstreamStream, RelayError>;

    /// Lists installed models, as returned by the server.
    async fn list_models(&self) -> Result<Value, RelayError>;

    /// Runs one generation to completion and returns the server's JSON.
    async fn generate(&self, request: &GenerationRequest) -> Result<Value, RelayError>;
}
