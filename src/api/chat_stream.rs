//! Event-stream transport: one HTTP response per session

use crate::api::schemas::ChatRequest;
use crate::core::traits::RelayService;
use crate::core::transport::{EventStreamSink, TransportMessage, TransportSink};
use crate::infrastructure::entities::GenerationRequest;
use async_stream::stream;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::post;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::{FutureExt, Stream};
use log::{debug, info};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new().route("/chat-stream", post(chat_stream))
}

async fn chat_stream(
    Inject(relay): Inject<dyn RelayService>,
    Json(chat_request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request = GenerationRequest::from(chat_request);
    let session = Uuid::new_v4().to_string();
    info!(
        "processing streaming chat request {session} with model {}",
        request.model
    );

    let (sink, receiver) = EventStreamSink::new();
    let sink = Arc::new(sink);

    // The response body owns the receiver, so axum dropping the body on
    // client disconnect closes the sink.
    let disconnect = {
        let sink = sink.clone();
        async move { sink.closed().await }.boxed()
    };

    tokio::spawn(async move {
        let report = relay.relay(session, request, sink, disconnect).await;
        debug!("session {} ended as {:?}", report.id, report.state);
    });

    Sse::new(event_stream(receiver)).keep_alive(KeepAlive::default())
}

/// Ends right after the terminal message.
fn event_stream(
    mut receiver: mpsc::UnboundedReceiver<TransportMessage>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        while let Some(message) = receiver.recv().await {
            let terminal = message.is_terminal();
            yield Ok(event_for(&message));
            if terminal {
                break;
            }
        }
    }
}

fn event_for(message: &TransportMessage) -> Event {
    let payload = match message {
        TransportMessage::Chunk(text) => json!({ "text": text }),
        TransportMessage::Complete(id) => json!({ "done": true, "id": id }),
        TransportMessage::Error(message) => json!({ "error": message }),
    };

    Event::default().data(payload.to_string())
}
