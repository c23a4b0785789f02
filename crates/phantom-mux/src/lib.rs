//! phantom-mux: PTY session multiplexing for Phantom.
//!
//! Spawns terminal-backed processes and lets any number of client
//! connections attach to and detach from a process's live output. Client
//! connections are identified by an opaque connection id, never by the
//! identity of the transport object carrying them, because socket layers
//! recycle those objects.
//!
//! # Architecture
//!
//! - [`frame`] — Length-prefixed binary frames tagging payloads with a
//!   connection id.
//! - [`ProcessHandle`] / [`Spawner`] — The process boundary. [`NativeSpawner`]
//!   runs real processes on PTYs; the `fake` module provides test doubles.
//! - [`ConnectionBinding`] — One transport attached to one session under one
//!   connection id, with the [`InputHandler`] that filters its input.
//! - [`Session`] / [`SessionRegistry`] — A spawned process with its
//!   bindings, and the owner of all live sessions.
//! - [`Multiplexer`] — The public API: `create`, `connect`, `write`,
//!   `resize`, `update`, `remove`, `set_spawn`.
//!
//! Bytes are moved, never interpreted: terminal emulation happens elsewhere.

pub mod binding;
pub mod config;
pub mod error;
pub mod event;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod frame;
pub mod multiplexer;
pub mod process;
pub mod pty;
pub mod registry;
pub mod session;
pub mod transport;

pub use binding::{ConnectionBinding, ConnectionId, InputHandler, ResizeHook};
pub use config::PtyConfig;
pub use error::{PtyError, TransportError};
pub use event::PtyEvent;
pub use multiplexer::{CreateOptions, Multiplexer, Size, UpdateOptions};
pub use process::{DataListener, ExitListener, ProcessHandle, SpawnRequest, Spawner};
pub use pty::{NativeProcess, NativeSpawner};
pub use registry::SessionRegistry;
pub use session::{Session, SessionId, SessionInfo};
pub use transport::{ReadyState, Transport};
