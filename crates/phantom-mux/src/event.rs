//! Session lifecycle notifications.
//!
//! Events are serialized as tagged JSON so a server layer can forward them
//! to clients unchanged.

use serde::Serialize;

use crate::session::{SessionId, SessionInfo};

/// Events published by a [`Multiplexer`](crate::Multiplexer).
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum PtyEvent {
    /// A session was spawned and registered.
    Created { info: SessionInfo },
    /// A session's title or size changed.
    Updated { info: SessionInfo },
    /// The session's process exited, either on its own or after a kill.
    Exited { id: SessionId, code: u32 },
    /// The session was torn down and removed from the registry.
    Deleted { id: SessionId },
}

impl PtyEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            PtyEvent::Created { info } | PtyEvent::Updated { info } => &info.id,
            PtyEvent::Exited { id, .. } | PtyEvent::Deleted { id } => id,
        }
    }
}
