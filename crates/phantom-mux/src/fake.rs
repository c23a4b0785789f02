//! Deterministic stand-ins for the OS process layer and client transports.
//!
//! Enabled for this crate's tests and, via the `testing` feature, for
//! downstream test suites.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{PtyError, TransportError};
use crate::frame::decode_output;
use crate::process::{lock, DataListener, ExitListener, Listeners, ProcessHandle, SpawnRequest, Spawner};
use crate::transport::{ReadyState, Transport};

/// Exit code reported by a killed [`FakeProcess`].
pub const KILLED_EXIT_CODE: u32 = 137;

/// Spawns [`FakeProcess`]es and remembers them for inspection.
pub struct FakeSpawner {
    echo: bool,
    failure: Mutex<Option<String>>,
    next_pid: AtomicU32,
    processes: Mutex<Vec<FakeProcess>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    /// Processes that produce output only when told to via [`FakeProcess::emit`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_echo(false))
    }

    /// Processes that echo every write back as output, like `cat`.
    ///
    /// The echo is emitted synchronously, before `write` returns, whereas a
    /// real PTY delivers it later from its reader thread. Tests can check
    /// output right after a write without polling.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self::with_echo(true))
    }

    fn with_echo(echo: bool) -> Self {
        Self {
            echo,
            failure: Mutex::new(None),
            next_pid: AtomicU32::new(1000),
            processes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make every later spawn fail with `message` (or succeed again with `None`).
    pub fn set_failure(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_string);
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        lock(&self.processes).clone()
    }

    pub fn last(&self) -> Option<FakeProcess> {
        lock(&self.processes).last().cloned()
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        lock(&self.requests).clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ProcessHandle>, PtyError> {
        lock(&self.requests).push(request.clone());
        if let Some(message) = lock(&self.failure).clone() {
            return Err(PtyError::Spawn(message));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let process = FakeProcess::new(pid, self.echo);
        lock(&self.processes).push(process.clone());
        Ok(Box::new(process))
    }
}

struct FakeState {
    pid: u32,
    echo: bool,
    listeners: Listeners,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<(u16, u16)>>,
    kills: AtomicUsize,
}

/// An in-memory process. Clones share state, so a test can keep one while
/// the multiplexer owns another.
#[derive(Clone)]
pub struct FakeProcess {
    state: Arc<FakeState>,
}

impl FakeProcess {
    pub fn new(pid: u32, echo: bool) -> Self {
        Self {
            state: Arc::new(FakeState {
                pid,
                echo,
                listeners: Listeners::new(),
                written: Mutex::new(Vec::new()),
                sizes: Mutex::new(Vec::new()),
                kills: AtomicUsize::new(0),
            }),
        }
    }

    /// Produce output as if the process printed `data`.
    pub fn emit(&self, data: &[u8]) {
        self.state.listeners.emit_data(data);
    }

    /// Exit on its own with `code`. Returns `false` if already exited.
    pub fn exit(&self, code: u32) -> bool {
        self.state.listeners.emit_exit(code)
    }

    /// Everything written to the process so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state.written).clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub fn sizes(&self) -> Vec<(u16, u16)> {
        lock(&self.state.sizes).clone()
    }

    /// Number of times `kill` was called, including no-op repeats.
    pub fn kill_count(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.state.listeners.exit_code()
    }
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.state.pid)
    }

    fn on_data(&self, listener: DataListener) {
        self.state.listeners.add_data(listener);
    }

    fn on_exit(&self, listener: ExitListener) {
        self.state.listeners.add_exit(listener);
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.state.listeners.has_exited() {
            return Err(PtyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "process has exited",
            )));
        }
        lock(&self.state.written).extend_from_slice(data);
        if self.state.echo {
            self.state.listeners.emit_data(data);
        }
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        lock(&self.state.sizes).push((cols, rows));
        Ok(())
    }

    fn kill(&self) {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.state.listeners.emit_exit(KILLED_EXIT_CODE);
    }
}

/// Shared storage for frames captured by a [`MockTransport`].
pub type FrameBucket = Arc<Mutex<Vec<Vec<u8>>>>;

pub fn new_bucket() -> FrameBucket {
    Arc::new(Mutex::new(Vec::new()))
}

/// Concatenate the payloads of every frame in `frames` addressed to `id`.
pub fn output_text(frames: &[Vec<u8>], id: &str) -> String {
    let mut bytes = Vec::new();
    for frame in frames {
        if let Some(payload) = decode_output(frame, id) {
            bytes.extend_from_slice(payload);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A WebSocket-shaped transport that records sent frames.
///
/// Where frames go can be changed at any time with [`MockTransport::redirect`],
/// mimicking a socket library that reuses one object for a new client.
pub struct MockTransport {
    state: Mutex<ReadyState>,
    sink: Mutex<FrameBucket>,
    fail: AtomicBool,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReadyState::Open),
            sink: Mutex::new(new_bucket()),
            fail: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    /// Send all later frames into `bucket`.
    pub fn redirect(&self, bucket: FrameBucket) {
        *lock(&self.sink) = bucket;
    }

    pub fn bucket(&self) -> FrameBucket {
        lock(&self.sink).clone()
    }

    /// Frames captured in the current bucket.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        lock(&*self.bucket()).clone()
    }

    pub fn set_ready_state(&self, state: ReadyState) {
        *lock(&self.state) = state;
    }

    /// Make sends fail as if the peer had vanished.
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        *lock(&self.state)
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Send("connection reset".into()));
        }
        if !self.ready_state().is_open() {
            return Err(TransportError::Closed);
        }
        lock(&*self.bucket()).push(frame);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.set_ready_state(ReadyState::Closed);
    }
}
