//! The socket-like object a client connection is carried over.
//!
//! The socket-accept layer owns real sockets and adapts them to
//! [`Transport`]. A transport object may be reused by its owner across
//! logical connections, so the multiplexer never treats its identity as
//! meaningful; only [`ConnectionId`](crate::binding::ConnectionId)s are.

use crate::error::TransportError;

/// Connection state, numbered like a WebSocket's `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connecting),
            1 => Some(Self::Open),
            2 => Some(Self::Closing),
            3 => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// A message-oriented, WebSocket-shaped connection.
///
/// Implementations must tolerate calls in any state: `send` after close
/// should return an error, and `close` on a closed transport is a no-op.
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Send one binary frame.
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_numbering() {
        assert_eq!(ReadyState::Open as u8, 1);
        assert_eq!(ReadyState::from_u8(3), Some(ReadyState::Closed));
        assert_eq!(ReadyState::from_u8(4), None);
        assert!(ReadyState::Open.is_open());
        assert!(!ReadyState::Connecting.is_open());
    }
}
