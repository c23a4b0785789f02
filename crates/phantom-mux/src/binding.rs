//! Attachments of transports to sessions.
//!
//! A [`ConnectionBinding`] captures its connection id by value when it is
//! created. Output is always tagged with that stored id and input is only
//! accepted when it carries the same id, no matter what the transport
//! object does afterwards.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;

use crate::error::PtyError;
use crate::frame::{self, MAX_ID_LEN};
use crate::process::lock;
use crate::session::Session;
use crate::transport::{ReadyState, Transport};

/// Called with `(cols, rows)` when the bound session is resized.
pub type ResizeHook = Box<dyn Fn(u16, u16) + Send + Sync>;

/// Identifies one logical client attachment.
///
/// Supplied by the socket-accept layer and independent of any transport
/// object. Always short enough to be framed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Validate that `id` fits in a frame header.
    pub fn new(id: impl Into<String>) -> Result<Self, PtyError> {
        let id = id.into();
        if id.len() > MAX_ID_LEN {
            return Err(PtyError::Encoding { len: id.len() });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Frames waiting to be sent, in order. At most one caller drains at a time.
#[derive(Default)]
struct Outbox {
    frames: VecDeque<Vec<u8>>,
    draining: bool,
}

/// One transport attached to one session under one connection id.
pub struct ConnectionBinding {
    connection_id: ConnectionId,
    transport: Arc<dyn Transport>,
    resize: Option<ResizeHook>,
    closed: AtomicBool,
    outbox: Mutex<Outbox>,
}

impl ConnectionBinding {
    pub fn new(
        connection_id: ConnectionId,
        transport: Arc<dyn Transport>,
        resize: Option<ResizeHook>,
    ) -> Self {
        Self {
            connection_id,
            transport,
            resize,
            closed: AtomicBool::new(false),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frame `chunk` with this binding's id and send it.
    #[cfg(test)]
    pub(crate) fn deliver(&self, chunk: &[u8]) {
        self.enqueue(chunk);
        self.flush();
    }

    /// Frame `chunk` and queue it without touching the transport.
    ///
    /// Sessions queue under their own lock, which fixes the order frames go
    /// out in, and call [`ConnectionBinding::flush`] after releasing it.
    pub(crate) fn enqueue(&self, chunk: &[u8]) {
        if self.is_closed() {
            return;
        }
        match frame::encode_output(self.connection_id.as_str(), chunk) {
            Ok(frame) => lock(&self.outbox).frames.push_back(frame),
            // Unreachable for a validated ConnectionId.
            Err(e) => log::warn!("dropping output for connection {}: {e}", self.connection_id),
        }
    }

    /// Send every queued frame.
    ///
    /// No lock is held while the transport runs, so `send` may call back
    /// into the multiplexer. A call made while another is draining, including
    /// a re-entrant one from inside `send`, returns at once and leaves its
    /// frames to the active drainer.
    pub(crate) fn flush(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let frame = {
                let mut outbox = lock(&self.outbox);
                match outbox.frames.pop_front() {
                    Some(frame) => frame,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.send(frame);
        }
    }

    /// Does nothing once the binding is closed or while the transport is not
    /// open. Send failures are swallowed: a dead connection must not affect
    /// the session or its other bindings.
    fn send(&self, frame: Vec<u8>) {
        if self.is_closed() || !self.transport.ready_state().is_open() {
            return;
        }
        if let Err(e) = self.transport.send(frame) {
            log::debug!("send to connection {} failed: {e}", self.connection_id);
        }
    }

    /// Mark the binding closed. With `notify`, also close the transport if it
    /// still looks alive. Returns `false` if the binding was already closed.
    pub(crate) fn close(&self, notify: bool) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        lock(&self.outbox).frames.clear();
        if notify {
            match self.transport.ready_state() {
                ReadyState::Closing | ReadyState::Closed => {}
                _ => self.transport.close(),
            }
        }
        true
    }

    pub(crate) fn notify_resize(&self, cols: u16, rows: u16) {
        if self.is_closed() {
            return;
        }
        if let Some(resize) = &self.resize {
            resize(cols, rows);
        }
    }
}

impl fmt::Debug for ConnectionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBinding")
            .field("connection_id", &self.connection_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Receives raw frames from a client connection, returned by `connect`.
///
/// Only input frames carrying this handler's connection id reach the
/// process; everything else is dropped without error.
pub struct InputHandler {
    binding: Arc<ConnectionBinding>,
    session: Weak<Session>,
}

impl InputHandler {
    pub(crate) fn new(binding: Arc<ConnectionBinding>, session: Weak<Session>) -> Self {
        Self { binding, session }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.binding.connection_id()
    }

    /// Whether the binding has been closed (by `remove`, process exit,
    /// replacement, or [`InputHandler::close`]).
    pub fn is_closed(&self) -> bool {
        self.binding.is_closed()
    }

    /// Handle one message from the client.
    pub fn on_message(&self, frame: &[u8]) {
        let Some(input) = frame::decode_input(frame) else {
            log::trace!("dropping malformed input frame ({} bytes)", frame.len());
            return;
        };
        if input.connection_id != self.binding.connection_id().as_str() {
            log::trace!(
                "dropping input for {} on connection {}",
                input.connection_id,
                self.binding.connection_id()
            );
            return;
        }
        if self.binding.is_closed() {
            return;
        }
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if let Err(e) = session.write(input.data) {
            log::debug!("write from connection {} failed: {e}", self.binding.connection_id());
        }
    }

    /// Detach this connection from its session. The process and any other
    /// bindings are unaffected.
    pub fn close(&self) {
        if let Some(session) = self.session.upgrade() {
            session.detach(&self.binding);
        }
        self.binding.close(false);
    }
}

impl fmt::Debug for InputHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputHandler")
            .field("binding", &self.binding)
            .finish()
    }
}
