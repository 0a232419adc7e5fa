//! Plain, non-streaming forwarders to the inference server

use crate::api::schemas::{ChatRequest, ErrorBody};
use crate::core::traits::RelayService;
use crate::infrastructure::entities::GenerationRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use di_axum::Inject;
use log::{error, info};
use serde::Deserialize;

pub fn router() -> Router {
    Router::new()
        .route("/models", get(list_models))
        .route("/generate", post(generate))
        .route("/chat", post(chat))
}

fn failure(message: &'static str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: message }),
    )
        .into_response()
}

async fn list_models(Inject(relay): Inject<dyn RelayService>) -> Response {
    match relay.list_models().await {
        Ok(models) => Json(models).into_response(),
        Err(e) => {
            error!("error fetching models: {e}");
            failure("Failed to fetch models from Ollama")
        }
    }
}

#[derive(Deserialize, Debug)]
struct GenerateRequest {
    prompt: String,
    model: String,
}

async fn generate(
    Inject(relay): Inject<dyn RelayService>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    match relay
        .generate(GenerationRequest::new(body.model, body.prompt))
        .await
    {
        Ok(generation) => Json(generation).into_response(),
        Err(e) => {
            error!("error generating response: {e}");
            failure("Failed to generate response")
        }
    }
}

async fn chat(
    Inject(relay): Inject<dyn RelayService>,
    Json(chat_request): Json<ChatRequest>,
) -> Response {
    let request = GenerationRequest::from(chat_request);
    info!("processing chat request with model: {}", request.model);

    let generation = match relay.generate(request.clone()).await {
        Ok(generation) => generation,
        Err(e) => {
            error!("error in chat API: {e}");
            return failure("Failed to generate chat response");
        }
    };

    let Some(text) = generation["response"].as_str().filter(|t| !t.is_empty()) else {
        error!("invalid response format from upstream: {generation}");
        return failure("Failed to generate chat response");
    };
    let id = generation["id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());

    Json(serde_json::json!({
        "id": id,
        "text": text,
        "model": request.model,
    }))
    .into_response()
}
