//! Active sessions of one multiplexed connection

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session {0} is already active")]
pub struct DuplicateSession(pub String);

/// Resolves when the session should stop: on an explicit cancel, or when
/// the registry entry is dropped together with its connection.
pub struct CancelSignal {
    ticket: u64,
    receiver: oneshot::Receiver<()>,
}

impl CancelSignal {
    /// Identifies this registration of the session id. An id can be
    /// registered again once cancelled, each time with a fresh ticket.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub async fn cancelled(self) {
        let _ = self.receiver.await;
    }
}

struct Entry {
    ticket: u64,
    trigger: oneshot::Sender<()>,
}

#[derive(Default)]
struct Sessions {
    next_ticket: u64,
    active: HashMap<String, Entry>,
}

/// Maps session ids to their cancel triggers.
///
/// The lock is only held for single map operations.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<Sessions>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        // A poisoned map is still a valid map.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, session: &str) -> Result<CancelSignal, DuplicateSession> {
        let mut sessions = self.lock();
        if sessions.active.contains_key(session) {
            return Err(DuplicateSession(session.to_owned()));
        }

        let ticket = sessions.next_ticket;
        sessions.next_ticket += 1;
        let (trigger, receiver) = oneshot::channel();
        sessions
            .active
            .insert(session.to_owned(), Entry { ticket, trigger });
        debug!(
            "registered session {session} (ticket {ticket}), {} active",
            sessions.active.len()
        );
        Ok(CancelSignal { ticket, receiver })
    }

    /// Fires the cancel trigger. Returns `false` for unknown sessions.
    pub fn cancel(&self, session: &str) -> bool {
        match self.lock().active.remove(session) {
            Some(entry) => {
                let _ = entry.trigger.send(());
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `session` only if it still belongs to the
    /// registration identified by `ticket`.
    pub fn deregister(&self, session: &str, ticket: u64) {
        let mut sessions = self.lock();
        match sessions.active.get(session) {
            Some(entry) if entry.ticket == ticket => {
                sessions.active.remove(session);
                debug!("deregistered session {session}");
            }
            Some(_) => debug!("session {session} was reused, keeping the newer registration"),
            None => {}
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().active.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.trigger.send(());
        }
        count
    }

    #[cfg(test)]
    fn is_active(&self, session: &str) -> bool {
        self.lock().active.contains_key(session)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().active.len()
    }
}
