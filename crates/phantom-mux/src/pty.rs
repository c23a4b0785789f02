//! OS-backed process handles built on `portable-pty`.
//!
//! Each process gets two dedicated OS threads: one blocking on PTY reads
//! and fanning chunks out to data listeners, and one blocking on the child's
//! exit. Neither thread holds any multiplexer lock while blocked.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::error::PtyError;
use crate::process::{lock, DataListener, ExitListener, Listeners, ProcessHandle, SpawnRequest, Spawner};

/// Spawns real processes on native PTYs.
#[derive(Debug, Clone)]
pub struct NativeSpawner {
    term: String,
    read_buffer_size: usize,
}

impl NativeSpawner {
    pub fn new(term: impl Into<String>, read_buffer_size: usize) -> Self {
        Self {
            term: term.into(),
            read_buffer_size: read_buffer_size.max(1),
        }
    }
}

impl Default for NativeSpawner {
    fn default() -> Self {
        Self::new("xterm-256color", 65536)
    }
}

impl Spawner for NativeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ProcessHandle>, PtyError> {
        let process = NativeProcess::spawn(request, &self.term, self.read_buffer_size)?;
        Ok(Box::new(process))
    }
}

/// Owns a portable-pty child process and master, plus its I/O threads.
pub struct NativeProcess {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    listeners: Arc<Listeners>,
    stop_tx: mpsc::Sender<()>,
}

impl NativeProcess {
    /// Spawn `request.command` on a new PTY sized `request.cols` x `request.rows`.
    pub fn spawn(request: &SpawnRequest, term: &str, read_buffer_size: usize) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(request.cols, request.rows))
            .map_err(|e| PtyError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.cwd(cwd);
        }
        cmd.env("TERM", term);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("failed to spawn {}: {e}", request.command)))?;
        // Only the child keeps the slave open, so reads hit EOF once it exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("failed to take writer: {e}")))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        let listeners = Arc::new(Listeners::new());
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let io_listeners = Arc::clone(&listeners);
        let thread_tag = pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());
        std::thread::Builder::new()
            .name(format!("pty-io-{thread_tag}"))
            .spawn(move || io_loop(reader, io_listeners, stop_rx, read_buffer_size))
            .map_err(|e| PtyError::Spawn(format!("failed to start I/O thread: {e}")))?;

        let exit_listeners = Arc::clone(&listeners);
        std::thread::Builder::new()
            .name(format!("pty-wait-{thread_tag}"))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.exit_code(),
                    Err(e) => {
                        log::warn!("waiting on PTY child failed: {e}");
                        1
                    }
                };
                exit_listeners.emit_exit(code);
            })
            .map_err(|e| PtyError::Spawn(format!("failed to start exit watcher: {e}")))?;

        log::debug!("spawned {} on PTY (pid {thread_tag})", request.command);

        Ok(Self {
            pid,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            listeners,
            stop_tx,
        })
    }
}

impl ProcessHandle for NativeProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn on_data(&self, listener: DataListener) {
        self.listeners.add_data(listener);
    }

    fn on_exit(&self, listener: ExitListener) {
        self.listeners.add_exit(listener);
    }

    fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        lock(&self.master)
            .resize(pty_size(cols, rows))
            .map_err(|e| PtyError::Resize(format!("{e}")))
    }

    fn kill(&self) {
        let _ = self.stop_tx.try_send(());
        if self.listeners.has_exited() {
            return;
        }
        if let Err(e) = lock(&self.killer).kill() {
            // Usually a race with a natural exit.
            log::debug!("killing PTY child {:?} failed: {e}", self.pid);
        }
    }
}

impl Drop for NativeProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn io_loop(
    mut reader: Box<dyn Read + Send>,
    listeners: Arc<Listeners>,
    mut stop_rx: mpsc::Receiver<()>,
    read_buffer_size: usize,
) {
    let mut buf = vec![0u8; read_buffer_size];

    loop {
        match stop_rx.try_recv() {
            Ok(()) => return,
            Err(mpsc::error::TryRecvError::Disconnected) => return,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        // Blocks until data is available or the PTY closes.
        let n = match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return, // EIO once the child side is gone
        };

        listeners.emit_data(&buf[..n]);
    }
}
