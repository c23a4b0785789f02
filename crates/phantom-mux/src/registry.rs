use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::process::lock;
use crate::session::{Session, SessionId};

/// Owns every live session, keyed by id.
///
/// The registry is the only place session membership changes. Callers get
/// `Arc<Session>` clones and must do any process or transport work after
/// the registry lock is released.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, session: Arc<Session>) {
        lock(&self.sessions).insert(session.id().clone(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Remove a session from the registry, returning it if it was present.
    pub fn take(&self, id: &SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).remove(id)
    }

    /// Remove and return every session, oldest first.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        sessions.sort_by_key(|s| s.seq());
        sessions
    }

    /// All live sessions in creation order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = lock(&self.sessions).values().cloned().collect();
        sessions.sort_by_key(|s| s.seq());
        sessions
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
