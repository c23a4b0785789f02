//! The process boundary: what the multiplexer needs from a spawned child.
//!
//! [`Spawner`] produces [`ProcessHandle`]s. The OS-backed implementation
//! lives in [`crate::pty`]; tests swap in [`crate::fake`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PtyError;

/// Callback invoked with each chunk of process output.
pub type DataListener = Box<dyn Fn(&[u8]) + Send + Sync>;
/// Callback invoked once with the process exit code.
pub type ExitListener = Box<dyn Fn(u32) + Send + Sync>;

/// Everything a spawner needs to start a process on a PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        }
    }
}

/// A running child process attached to a PTY.
///
/// Handles are shared by every binding of a session, so all methods take
/// `&self`.
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if the platform reports one.
    fn pid(&self) -> Option<u32>;

    /// Subscribe to output. Every subscriber sees every chunk.
    fn on_data(&self, listener: DataListener);

    /// Subscribe to exit. Each subscriber is called at most once; a
    /// subscriber added after exit is called immediately.
    fn on_exit(&self, listener: ExitListener);

    /// Write input bytes to the process.
    fn write(&self, data: &[u8]) -> Result<(), PtyError>;

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError>;

    /// Terminate the process. Calling this again, or after the process has
    /// already exited, does nothing.
    fn kill(&self);
}

/// Produces process handles for new sessions.
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ProcessHandle>, PtyError>;
}

struct ExitState {
    code: Option<u32>,
    listeners: Vec<ExitListener>,
}

/// Subscriber lists shared by handle implementations.
///
/// Exit is latched: [`Listeners::emit_exit`] fires only the first time.
pub struct Listeners {
    data: Mutex<Vec<Arc<dyn Fn(&[u8]) + Send + Sync>>>,
    exit: Mutex<ExitState>,
}

impl Listeners {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            exit: Mutex::new(ExitState {
                code: None,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn add_data(&self, listener: DataListener) {
        lock(&self.data).push(Arc::from(listener));
    }

    /// Listeners run without the subscriber lock held, so they may write to
    /// the process or subscribe again.
    pub fn emit_data(&self, chunk: &[u8]) {
        let listeners = lock(&self.data).clone();
        for listener in &listeners {
            listener(chunk);
        }
    }

    pub fn add_exit(&self, listener: ExitListener) {
        let mut state = lock(&self.exit);
        match state.code {
            Some(code) => {
                drop(state);
                listener(code);
            }
            None => state.listeners.push(listener),
        }
    }

    /// Record the exit and notify subscribers. Returns `false` if exit was
    /// already recorded, in which case nobody is notified.
    pub fn emit_exit(&self, code: u32) -> bool {
        let listeners = {
            let mut state = lock(&self.exit);
            if state.code.is_some() {
                return false;
            }
            state.code = Some(code);
            std::mem::take(&mut state.listeners)
        };
        // Lock released: a listener may call back into the handle (e.g. kill).
        for listener in &listeners {
            listener(code);
        }
        true
    }

    pub fn exit_code(&self) -> Option<u32> {
        lock(&self.exit).code
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_data_fans_out_to_every_subscriber() {
        let listeners = Listeners::new();
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&first);
        listeners.add_data(Box::new(move |chunk| sink.lock().unwrap().extend_from_slice(chunk)));
        let sink = Arc::clone(&second);
        listeners.add_data(Box::new(move |chunk| sink.lock().unwrap().extend_from_slice(chunk)));

        listeners.emit_data(b"abc");
        listeners.emit_data(b"def");

        assert_eq!(first.lock().unwrap().as_slice(), b"abcdef");
        assert_eq!(second.lock().unwrap().as_slice(), b"abcdef");
    }

    #[test]
    fn test_exit_fires_once() {
        let listeners = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        listeners.add_exit(Box::new(move |code| {
            assert_eq!(code, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(listeners.emit_exit(3));
        assert!(!listeners.emit_exit(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.exit_code(), Some(3));
    }

    #[test]
    fn test_late_exit_subscriber_called_immediately() {
        let listeners = Listeners::new();
        listeners.emit_exit(0);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        listeners.add_exit(Box::new(move |code| *slot.lock().unwrap() = Some(code)));
        assert_eq!(*seen.lock().unwrap(), Some(0));
    }

    #[test]
    fn test_exit_listener_may_reenter() {
        let listeners = Arc::new(Listeners::new());
        let inner = Arc::clone(&listeners);
        listeners.add_exit(Box::new(move |_| {
            // Re-entrant emit (a kill from inside an exit handler) is a no-op.
            assert!(!inner.emit_exit(9));
            assert!(inner.has_exited());
        }));
        assert!(listeners.emit_exit(1));
    }

    #[test]
    fn test_data_listener_may_reenter() {
        let listeners = Arc::new(Listeners::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&listeners);
        let sink = Arc::clone(&seen);
        listeners.add_data(Box::new(move |chunk| {
            sink.lock().unwrap().extend_from_slice(chunk);
            if chunk == b"ping" {
                inner.emit_data(b"pong");
            }
        }));

        listeners.emit_data(b"ping");
        assert_eq!(seen.lock().unwrap().as_slice(), b"pingpong");
    }

    #[test]
    fn test_spawn_request_defaults() {
        let request = SpawnRequest::new("/bin/sh");
        assert_eq!(request.command, "/bin/sh");
        assert!(request.args.is_empty());
        assert_eq!((request.cols, request.rows), (80, 24));
    }
}
