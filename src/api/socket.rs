//! Channel transport: many sessions multiplexed over one WebSocket.
//!
//! Every frame is a JSON text message `{"event", "session"?, "data"?}`.
//! Outbound events always name the session they belong to.

use crate::api::schemas::ChatRequest;
use crate::core::registry::SessionRegistry;
use crate::core::traits::RelayService;
use crate::core::transport::{ChannelEvent, ChannelSink, TransportSink};
use crate::infrastructure::entities::GenerationRequest;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use di::Ref;
use di_axum::Inject;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const CHAT_MESSAGE: &str = "chat message";
pub const CHAT_CANCEL: &str = "chat cancel";
pub const CHAT_RESPONSE_CHUNK: &str = "chat response chunk";
pub const CHAT_RESPONSE_COMPLETE: &str = "chat response complete";
pub const CHAT_RESPONSE_ERROR: &str = "chat response error";

pub fn router() -> Router {
    Router::new().route("/socket", get(upgrade))
}

async fn upgrade(
    Inject(relay): Inject<dyn RelayService>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket.on_upgrade(move |socket| serve_connection(relay, socket))
}

/// Shared state of one client connection.
struct Connection {
    relay: Ref<dyn RelayService>,
    registry: SessionRegistry,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    notices: mpsc::UnboundedSender<String>,
}

pub async fn serve_connection(relay: Ref<dyn RelayService>, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    info!("client connected: {connection_id}");

    let (mut writer, mut reader) = socket.split();
    let (outbound, mut events) = mpsc::unbounded_channel::<ChannelEvent>();
    let (notices, mut pending_notices) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(event) = events.recv() => schemas::encode_event(&event),
                Some(notice) = pending_notices.recv() => notice,
                else => break,
            };
            if writer.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let connection = Connection {
        relay,
        registry: SessionRegistry::new(),
        outbound,
        notices,
    };

    while let Some(Ok(message)) = reader.next().await {
        match message {
            Message::Text(text) => connection.dispatch(&text),
            Message::Close(_) => break,
            // Pings are answered by axum.
            _ => {}
        }
    }

    let cancelled = connection.registry.cancel_all();
    info!("client disconnected: {connection_id}, cancelled {cancelled} session(s)");
    drop(connection);
    writer_task.abort();
}

impl Connection {
    fn dispatch(&self, text: &str) {
        let inbound = match serde_json::from_str::<schemas::Inbound>(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                self.notice(&format!("invalid message: {e}"));
                return;
            }
        };

        let schemas::Inbound {
            event,
            session,
            data,
        } = inbound;

        match event.as_str() {
            CHAT_MESSAGE => self.start_session(session, data),
            CHAT_CANCEL => match session {
                Some(session) => {
                    if !self.registry.cancel(&session) {
                        debug!("cancel for inactive session {session}");
                    }
                }
                None => self.notice("chat cancel needs a session"),
            },
            other => self.notice(&format!("unknown event {other:?}")),
        }
    }

    fn start_session(&self, session: Option<String>, data: Option<Value>) {
        let request = match data.map(serde_json::from_value::<ChatRequest>).transpose() {
            Ok(Some(request)) => GenerationRequest::from(request),
            Ok(None) => return self.notice("chat message needs data"),
            Err(e) => return self.notice(&format!("invalid chat message: {e}")),
        };

        let session = session.unwrap_or_else(|| Uuid::new_v4().to_string());
        let signal = match self.registry.register(&session) {
            Ok(signal) => signal,
            Err(e) => return self.notice(&e.to_string()),
        };
        let ticket = signal.ticket();
        info!(
            "processing chat {session} with model {} via socket",
            request.model
        );

        let sink = Arc::new(ChannelSink::new(session.clone(), self.outbound.clone()));
        let disconnect = {
            let sink = sink.clone();
            async move {
                tokio::select! {
                    _ = signal.cancelled() => {}
                    _ = sink.closed() => {}
                }
            }
            .boxed()
        };

        let relay = self.relay.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let report = relay.relay(session, request, sink, disconnect).await;
            registry.deregister(&report.id, ticket);
            debug!("session {} ended as {:?}", report.id, report.state);
        });
    }

    /// Error not tied to any session.
    fn notice(&self, message: &str) {
        let _ = self.notices.send(schemas::encode_notice(message));
    }
}

pub mod schemas {
    use super::{CHAT_RESPONSE_CHUNK, CHAT_RESPONSE_COMPLETE, CHAT_RESPONSE_ERROR};
    use crate::core::transport::{ChannelEvent, TransportMessage};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Deserialize, Debug)]
    pub struct Inbound {
        pub event: String,
        #[serde(default)]
        pub session: Option<String>,
        #[serde(default)]
        pub data: Option<Value>,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
    pub struct Outbound {
        pub event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub session: Option<String>,
        pub data: String,
    }

    pub fn encode_event(event: &ChannelEvent) -> String {
        let (name, data) = match &event.message {
            TransportMessage::Chunk(text) => (CHAT_RESPONSE_CHUNK, text),
            TransportMessage::Complete(id) => (CHAT_RESPONSE_COMPLETE, id),
            TransportMessage::Error(message) => (CHAT_RESPONSE_ERROR, message),
        };
        encode(Outbound {
            event: name.to_owned(),
            session: Some(event.session.clone()),
            data: data.clone(),
        })
    }

    pub fn encode_notice(message: &str) -> String {
        encode(Outbound {
            event: CHAT_RESPONSE_ERROR.to_owned(),
            session: None,
            data: message.to_owned(),
        })
    }

    fn encode(outbound: Outbound) -> String {
        // Strings-only struct, serialization cannot fail.
        serde_json::to_string(&outbound).unwrap_or_default()
    }
}
