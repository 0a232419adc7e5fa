//! Per-request relay state machine.
//!
//! A session owns one upstream stream and talks to one transport sink. It is
//! driven by a single task: upstream chunks and the disconnect signal are
//! awaited side by side, and every state change happens in that task.
//!
//! ```text
//! Created -> Streaming -> Completed | Failed | Cancelled
//! Created ------------------------> Failed | Cancelled
//! ```

use crate::core::decoder::{DecodeError, FrameDecoder};
use crate::core::transport::TransportSink;
use crate::infrastructure::entities::{Frame, GenerationRequest};
use crate::infrastructure::errors::RelayError;
use crate::infrastructure::traits::InferenceBackend;
use crate::infrastructure::upstream::UpstreamStream;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// What is left of a session once it ended.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: String,
    pub state: SessionState,
    /// Every fragment that reached the client, in order.
    pub text: String,
    pub decode_errors: usize,
}

enum Wakeup {
    Disconnected,
    Upstream(Option<Result<Bytes, RelayError>>),
}

pub struct RelaySession {
    id: String,
    request: GenerationRequest,
    state: SessionState,
    accumulated_text: String,
    decoder: FrameDecoder,
    decode_errors: usize,
    sink: Arc<dyn TransportSink>,
    idle_timeout: Option<Duration>,
}

impl RelaySession {
    pub fn new(
        id: impl Into<String>,
        request: GenerationRequest,
        sink: Arc<dyn TransportSink>,
    ) -> RelaySession {
        RelaySession {
            id: id.into(),
            request,
            state: SessionState::Created,
            accumulated_text: String::new(),
            decoder: FrameDecoder::new(),
            decode_errors: 0,
            sink,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> RelaySession {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Drives the session until a terminal state.
    ///
    /// `disconnect` resolving means the client is gone: the upstream is
    /// cancelled right away and nothing more is pushed.
    pub async fn run<D>(mut self, backend: &dyn InferenceBackend, disconnect: D) -> SessionReport
    where
        D: Future<Output = ()> + Send,
    {
        tokio::pin!(disconnect);
        info!(
            "session {} opening stream for model {}",
            self.id, self.request.model
        );

        let opened = tokio::select! {
            biased;
            _ = &mut disconnect => None,
            opened = backend.open(&self.request) => Some(opened),
        };

        let mut upstream = match opened {
            None => {
                self.disconnected();
                return self.into_report();
            }
            Some(Err(e)) => {
                self.fail(e).await;
                return self.into_report();
            }
            Some(Ok(upstream)) => upstream,
        };
        self.state = SessionState::Streaming;

        let idle_timeout = self.idle_timeout;
        while !self.state.is_terminal() {
            let wakeup = tokio::select! {
                biased;
                _ = &mut disconnect => Wakeup::Disconnected,
                next = read_chunk(&mut upstream, idle_timeout) => Wakeup::Upstream(next),
            };

            match wakeup {
                Wakeup::Disconnected => self.disconnected(),
                Wakeup::Upstream(Some(Ok(bytes))) => {
                    self.decoder.feed(&bytes);
                    self.drain_frames().await;
                }
                Wakeup::Upstream(Some(Err(e))) => self.fail(e).await,
                Wakeup::Upstream(None) => self.end_of_stream().await,
            }
        }

        upstream.cancel();
        self.into_report()
    }

    async fn drain_frames(&mut self) {
        while !self.state.is_terminal() {
            let Some(decoded) = self.decoder.next_frame() else {
                break;
            };
            self.apply(decoded).await;
        }
    }

    async fn end_of_stream(&mut self) {
        debug!("session {} upstream ended", self.id);
        if let Some(decoded) = self.decoder.finish() {
            self.apply(decoded).await;
        }
        self.complete(None).await;
    }

    async fn apply(&mut self, decoded: Result<Frame, DecodeError>) {
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                self.decode_errors += 1;
                warn!("session {} skipping line: {e}", self.id);
                return;
            }
        };

        if let Some(fragment) = frame.fragment() {
            if self.sink.push(fragment).await.is_err() {
                self.transport_lost();
                return;
            }
            self.accumulated_text.push_str(fragment);
        }

        if frame.done {
            self.complete(frame.completion_id()).await;
        }
    }

    async fn complete(&mut self, id: Option<&str>) {
        if self.state.is_terminal() {
            return;
        }

        let id = id.map(str::to_owned).unwrap_or_else(fallback_id);
        match self.sink.push_complete(&id).await {
            Ok(()) => {
                info!(
                    "session {} completed as {id} after {} bytes",
                    self.id,
                    self.accumulated_text.len()
                );
                self.state = SessionState::Completed;
            }
            Err(_) => self.transport_lost(),
        }
    }

    async fn fail(&mut self, e: RelayError) {
        if self.state.is_terminal() {
            return;
        }

        error!("session {} failed: {e}", self.id);
        match self.sink.push_error(&e.to_string()).await {
            Ok(()) => self.state = SessionState::Failed,
            Err(_) => self.transport_lost(),
        }
    }

    fn transport_lost(&mut self) {
        warn!("session {} lost its transport, cancelling", self.id);
        self.state = SessionState::Cancelled;
    }

    fn disconnected(&mut self) {
        info!("session {} cancelled by client disconnect", self.id);
        self.state = SessionState::Cancelled;
    }

    fn into_report(self) -> SessionReport {
        SessionReport {
            id: self.id,
            state: self.state,
            text: self.accumulated_text,
            decode_errors: self.decode_errors,
        }
    }
}

async fn read_chunk(
    upstream: &mut UpstreamStream,
    idle_timeout: Option<Duration>,
) -> Option<Result<Bytes, RelayError>> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, upstream.next_chunk()).await {
            Ok(next) => next,
            Err(_) => Some(Err(RelayError::Stalled(limit))),
        },
        None => upstream.next_chunk().await,
    }
}

/// Completion id used when the upstream did not send one.
fn fallback_id() -> String {
    Utc::now().timestamp_millis().to_string()
}
