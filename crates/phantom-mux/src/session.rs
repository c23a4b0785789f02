use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::binding::ConnectionBinding;
use crate::error::PtyError;
use crate::process::{lock, ProcessHandle, SpawnRequest};

/// Opaque identifier for one spawned process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh, unique id.
    pub fn generate() -> Self {
        Self(format!("pty_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A snapshot of a session's public state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub title: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    /// Number of currently attached connections.
    pub connections: usize,
}

/// The most recent output of a session, capped at `limit` bytes.
struct Scrollback {
    data: Vec<u8>,
    limit: usize,
}

impl Scrollback {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.limit == 0 {
            return;
        }
        if chunk.len() >= self.limit {
            self.data.clear();
            self.data.extend_from_slice(&chunk[chunk.len() - self.limit..]);
            return;
        }
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
        }
    }
}

/// Bindings and scrollback share a lock so that replay-then-attach is
/// atomic with respect to live output.
struct Output {
    bindings: Vec<Arc<ConnectionBinding>>,
    scrollback: Scrollback,
}

/// A spawned process plus the connections attached to it.
///
/// Sessions are created and torn down by the [`Multiplexer`](crate::Multiplexer);
/// the registry is the only owner that outlives a single call.
pub struct Session {
    id: SessionId,
    seq: u64,
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    title: Mutex<String>,
    size: Mutex<(u16, u16)>,
    process: Box<dyn ProcessHandle>,
    output: Mutex<Output>,
    closed: AtomicBool,
}

impl Session {
    /// Wrap a freshly spawned process and start fanning its output out to
    /// attached bindings.
    pub(crate) fn start(
        id: SessionId,
        seq: u64,
        title: String,
        request: &SpawnRequest,
        process: Box<dyn ProcessHandle>,
        scrollback_limit: usize,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id,
            seq,
            command: request.command.clone(),
            args: request.args.clone(),
            cwd: request.cwd.clone(),
            title: Mutex::new(title),
            size: Mutex::new((request.cols, request.rows)),
            process,
            output: Mutex::new(Output {
                bindings: Vec::new(),
                scrollback: Scrollback::new(scrollback_limit),
            }),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&session);
        session.process.on_data(Box::new(move |chunk| {
            if let Some(session) = weak.upgrade() {
                session.broadcast(chunk);
            }
        }));

        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Creation order within the owning multiplexer.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn process(&self) -> &dyn ProcessHandle {
        self.process.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn title(&self) -> String {
        lock(&self.title).clone()
    }

    pub(crate) fn set_title(&self, title: String) {
        *lock(&self.title) = title;
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.output).bindings.len()
    }

    pub fn info(&self) -> SessionInfo {
        let (cols, rows) = *lock(&self.size);
        SessionInfo {
            id: self.id.clone(),
            title: self.title(),
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            pid: self.process.pid(),
            cols,
            rows,
            connections: self.connection_count(),
        }
    }

    /// Record a chunk of process output and deliver it to every open binding.
    ///
    /// Frames are queued under the output lock and sent after it is released,
    /// so a transport may call back into the multiplexer from `send`.
    fn broadcast(&self, chunk: &[u8]) {
        let bindings = {
            let mut output = lock(&self.output);
            // Checked under the lock: output that races with teardown is dropped.
            if self.is_closed() {
                return;
            }
            output.scrollback.push(chunk);
            for binding in &output.bindings {
                binding.enqueue(chunk);
            }
            output.bindings.clone()
        };
        for binding in &bindings {
            binding.flush();
        }
    }

    /// Attach a binding, replaying recent output to it first.
    ///
    /// A binding already attached under the same connection id is replaced
    /// and marked closed; its transport is left open because the caller may
    /// be reusing it. Returns `false` if the session has been torn down.
    pub(crate) fn attach(&self, binding: Arc<ConnectionBinding>) -> bool {
        let mut output = lock(&self.output);
        if self.is_closed() {
            drop(output);
            binding.close(false);
            return false;
        }

        output.bindings.retain(|existing| {
            if existing.connection_id() == binding.connection_id() {
                existing.close(false);
                log::debug!("connection {} replaced on session {}", binding.connection_id(), self.id);
                false
            } else {
                true
            }
        });

        // Queued before the binding becomes visible to `broadcast`, so live
        // output always follows the replay.
        if !output.scrollback.data.is_empty() {
            binding.enqueue(&output.scrollback.data);
        }
        output.bindings.push(Arc::clone(&binding));
        drop(output);

        binding.flush();
        true
    }

    pub(crate) fn detach(&self, binding: &Arc<ConnectionBinding>) {
        let mut output = lock(&self.output);
        let before = output.bindings.len();
        output.bindings.retain(|existing| !Arc::ptr_eq(existing, binding));
        if output.bindings.len() != before {
            log::debug!("connection {} detached from session {}", binding.connection_id(), self.id);
        }
    }

    /// Write input straight to the process.
    pub(crate) fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.process.write(data)
    }

    /// Resize the PTY, then tell every open binding.
    pub(crate) fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.process.resize(cols, rows)?;
        *lock(&self.size) = (cols, rows);

        // Hooks are caller code; run them without holding the output lock.
        let bindings = lock(&self.output).bindings.clone();
        for binding in &bindings {
            binding.notify_resize(cols, rows);
        }
        Ok(())
    }

    /// Close every binding (and its transport), then kill the process.
    ///
    /// Returns `false` if the session was already shut down.
    pub(crate) fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let bindings = std::mem::take(&mut lock(&self.output).bindings);
        for binding in &bindings {
            binding.close(true);
        }
        self.process.kill();
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("pid", &self.process.pid())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
