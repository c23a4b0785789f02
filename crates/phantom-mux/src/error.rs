use crate::session::SessionId;

/// Errors from multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// A connection id did not fit in the single length byte of a frame.
    #[error("connection id is {len} bytes, frames allow at most 255")]
    Encoding { len: usize },

    #[error("PTY session {0} not found")]
    NotFound(SessionId),

    #[error("PTY spawn failed: {0}")]
    Spawn(String),

    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY resize failed: {0}")]
    Resize(String),
}

/// Errors reported by a [`Transport`](crate::transport::Transport) send.
///
/// These never escape a connection binding; they are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport send failed: {0}")]
    Send(String),
}
