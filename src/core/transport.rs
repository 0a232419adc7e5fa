//! Downstream transports.
//!
//! A session only sees a [`TransportSink`]. Two sinks exist: the
//! [`EventStreamSink`], bound to one HTTP response, and the [`ChannelSink`],
//! one per session on a multiplexed connection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// What a session tells its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Chunk(String),
    Complete(String),
    Error(String),
}

impl TransportMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportMessage::Chunk(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("downstream transport is closed")]
pub struct TransportWriteError;

#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn deliver(&self, message: TransportMessage) -> Result<(), TransportWriteError>;

    /// Resolves once the client went away. Used as the disconnect signal.
    async fn closed(&self);

    async fn push(&self, text: &str) -> Result<(), TransportWriteError> {
        self.deliver(TransportMessage::Chunk(text.to_owned())).await
    }

    async fn push_complete(&self, id: &str) -> Result<(), TransportWriteError> {
        self.deliver(TransportMessage::Complete(id.to_owned())).await
    }

    async fn push_error(&self, message: &str) -> Result<(), TransportWriteError> {
        self.deliver(TransportMessage::Error(message.to_owned())).await
    }
}

/// Sink feeding exactly one event-stream response.
///
/// Nothing may be written after the terminal message; the response ends
/// once the receiver has yielded it.
pub struct EventStreamSink {
    sender: mpsc::UnboundedSender<TransportMessage>,
    finished: AtomicBool,
}

impl EventStreamSink {
    pub fn new() -> (EventStreamSink, mpsc::UnboundedReceiver<TransportMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            EventStreamSink {
                sender,
                finished: AtomicBool::new(false),
            },
            receiver,
        )
    }
}

#[async_trait]
impl TransportSink for EventStreamSink {
    async fn deliver(&self, message: TransportMessage) -> Result<(), TransportWriteError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(TransportWriteError);
        }
        if message.is_terminal() {
            self.finished.store(true, Ordering::Release);
        }
        self.sender.send(message).map_err(|_| TransportWriteError)
    }

    async fn closed(&self) {
        self.sender.closed().await
    }
}

/// A message on a multiplexed connection, addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub session: String,
    pub message: TransportMessage,
}

/// Per-session view of a multiplexed connection.
///
/// Every message is stamped with the session id before it reaches the
/// shared outbound queue, so the connection writer never has to guess.
#[derive(Clone)]
pub struct ChannelSink {
    session: String,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelSink {
    pub fn new(session: impl Into<String>, outbound: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        ChannelSink {
            session: session.into(),
            outbound,
        }
    }
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn deliver(&self, message: TransportMessage) -> Result<(), TransportWriteError> {
        self.outbound
            .send(ChannelEvent {
                session: self.session.clone(),
                message,
            })
            .map_err(|_| TransportWriteError)
    }

    async fn closed(&self) {
        self.outbound.closed().await
    }
}
