use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::ToolError;

const STREAM_BUFFER: usize = 64;

/// Sessions keyed by generated id. A session either owns an event stream
/// (responses are pushed through `outbound`) or was created by a
/// synchronous `initialize` and only serves as client bookkeeping.
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

struct Session {
    outbound: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    last_seen: Instant,
}

/// What a POST needs to answer on a session's stream.
#[derive(Clone)]
pub struct SessionRoute {
    pub outbound: mpsc::Sender<String>,
    pub cancel: CancellationToken,
}

/// Receiving half of a freshly opened stream session.
pub struct OpenStream {
    pub id: String,
    pub inbound: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
}

impl SessionTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Session without a stream, as handed out by synchronous `initialize`.
    pub fn create(&self) -> String {
        self.insert(None).0
    }

    pub fn open_stream(&self) -> OpenStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (id, cancel) = self.insert(Some(tx));
        OpenStream {
            id,
            inbound: rx,
            cancel,
        }
    }

    fn insert(&self, outbound: Option<mpsc::Sender<String>>) -> (String, CancellationToken) {
        let id = Uuid::new_v4().simple().to_string();
        let cancel = CancellationToken::new();
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        self.sweep_locked(&mut sessions, now);
        sessions.insert(
            id.clone(),
            Session {
                outbound,
                cancel: cancel.clone(),
                last_seen: now,
            },
        );
        debug!(session = %id, total = sessions.len(), "session opened");
        (id, cancel)
    }

    /// Renews the lease of a known session. Returns false for unknown or
    /// expired ids.
    pub fn touch(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        self.sweep_locked(&mut sessions, now);
        sessions
            .get_mut(id)
            .map(|session| session.last_seen = now)
            .is_some()
    }

    /// Resolves the stream that owns `id`.
    pub fn route(&self, id: &str) -> Result<SessionRoute, ToolError> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        self.sweep_locked(&mut sessions, now);
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| ToolError::TransportState(format!("unknown session {id}")))?;
        session.last_seen = now;
        let outbound = session
            .outbound
            .clone()
            .ok_or_else(|| ToolError::TransportState(format!("session {id} has no open stream")))?;
        Ok(SessionRoute {
            outbound,
            cancel: session.cancel.clone(),
        })
    }

    /// Removes the session and cancels whatever is still running for it.
    pub fn close(&self, id: &str) {
        if let Some(session) = self.sessions.lock().remove(id) {
            session.cancel.cancel();
            debug!(session = %id, "session closed");
        }
    }

    pub fn close_all(&self) {
        let drained = std::mem::take(&mut *self.sessions.lock());
        for session in drained.into_values() {
            session.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Streams stay alive while connected; only stream-less sessions expire.
    fn sweep_locked(&self, sessions: &mut HashMap<String, Session>, now: Instant) {
        sessions.retain(|id, session| {
            let stream_open = session
                .outbound
                .as_ref()
                .is_some_and(|tx| !tx.is_closed());
            let keep = stream_open || now.duration_since(session.last_seen) < self.ttl;
            if !keep {
                session.cancel.cancel();
                debug!(session = %id, "session expired");
            }
            keep
        });
    }
}

/// Closes its session when dropped; held by the event stream so a client
/// disconnect tears the session down.
pub struct SessionGuard {
    table: std::sync::Arc<SessionTable>,
    id: String,
}

impl SessionGuard {
    pub fn new(table: std::sync::Arc<SessionTable>, id: String) -> Self {
        Self { table, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.table.close(&self.id);
    }
}
