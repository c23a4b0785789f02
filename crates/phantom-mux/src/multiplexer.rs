use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::binding::{ConnectionBinding, ConnectionId, InputHandler, ResizeHook};
use crate::config::PtyConfig;
use crate::error::PtyError;
use crate::event::PtyEvent;
use crate::process::{SpawnRequest, Spawner};
use crate::pty::NativeSpawner;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId, SessionInfo};
use crate::transport::Transport;

/// Parameters for [`Multiplexer::create`]. Unset fields come from
/// [`PtyConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub title: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl CreateOptions {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

/// Parameters for [`Multiplexer::update`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    pub title: Option<String>,
    pub size: Option<Size>,
}

/// Spawns PTY-backed processes and multiplexes client connections onto them.
///
/// Output from a session is framed with each attached connection's own id;
/// input is accepted only when framed with the id it was connected under.
/// Every operation on an unknown session id returns [`PtyError::NotFound`]
/// without side effects.
pub struct Multiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    config: PtyConfig,
    spawner: RwLock<Arc<dyn Spawner>>,
    registry: SessionRegistry,
    events: broadcast::Sender<PtyEvent>,
    next_seq: AtomicU64,
}

impl Multiplexer {
    /// Create a multiplexer that spawns real processes on native PTYs.
    pub fn new(config: PtyConfig) -> Self {
        let spawner = native_spawner(&config);
        Self::with_spawner(config, spawner)
    }

    /// Create a multiplexer with an explicit spawner.
    pub fn with_spawner(config: PtyConfig, spawner: Arc<dyn Spawner>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                spawner: RwLock::new(spawner),
                registry: SessionRegistry::new(),
                events,
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PtyConfig {
        &self.inner.config
    }

    /// Replace the spawner used by later `create` calls, or restore the
    /// native one with `None`. Existing sessions are unaffected.
    pub fn set_spawn(&self, spawner: Option<Arc<dyn Spawner>>) {
        let spawner = spawner.unwrap_or_else(|| native_spawner(&self.inner.config));
        *self
            .inner
            .spawner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = spawner;
    }

    /// Spawn a process and register a new session for it.
    pub fn create(&self, options: CreateOptions) -> Result<SessionInfo, PtyError> {
        let config = &self.inner.config;
        let request = SpawnRequest {
            command: options.command.unwrap_or_else(|| config.default_command()),
            args: options.args,
            cwd: options.cwd,
            env: options.env,
            cols: options.cols.unwrap_or(config.cols),
            rows: options.rows.unwrap_or(config.rows),
        };

        let spawner = self
            .inner
            .spawner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let process = spawner.spawn(&request).map_err(|e| {
            log::warn!("failed to spawn {}: {e}", request.command);
            e
        })?;

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = SessionId::generate();
        let title = options.title.unwrap_or_else(|| format!("Terminal {seq}"));
        let session = Session::start(
            id.clone(),
            seq,
            title,
            &request,
            process,
            config.scrollback_limit,
        );
        self.inner.registry.insert(Arc::clone(&session));

        let info = session.info();
        log::info!("created PTY session {id} running {} (pid {:?})", info.command, info.pid);
        self.inner.publish(PtyEvent::Created { info: info.clone() });

        // Hooked after insert and `Created`: a process that already exited
        // reports it here immediately, and teardown must find the session.
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let exit_id = id.clone();
        session.process().on_exit(Box::new(move |code| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_exit(&exit_id, code);
            }
        }));
        Ok(info)
    }

    /// Attach `transport` to a session under `connection_id`.
    ///
    /// Output is framed with `connection_id` as captured here; later changes
    /// to the transport cannot alter it. Recent output is replayed first.
    /// The returned handler accepts input frames carrying the same id.
    pub fn connect(
        &self,
        id: &SessionId,
        transport: Arc<dyn Transport>,
        resize: Option<ResizeHook>,
        connection_id: impl Into<String>,
    ) -> Result<InputHandler, PtyError> {
        let connection_id = ConnectionId::new(connection_id)?;
        let session = self.session(id)?;

        let binding = Arc::new(ConnectionBinding::new(connection_id, transport, resize));
        if !session.attach(Arc::clone(&binding)) {
            // Torn down between lookup and attach.
            return Err(PtyError::NotFound(id.clone()));
        }
        log::debug!("connection {} attached to session {id}", binding.connection_id());

        Ok(InputHandler::new(binding, Arc::downgrade(&session)))
    }

    /// Write directly to a session's process, bypassing connection framing.
    pub fn write(&self, id: &SessionId, data: impl AsRef<[u8]>) -> Result<(), PtyError> {
        self.session(id)?.write(data.as_ref())
    }

    /// Resize a session's PTY and notify its connections' resize hooks.
    pub fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), PtyError> {
        let session = self.session(id)?;
        session.resize(cols, rows)?;
        self.inner.publish(PtyEvent::Updated {
            info: session.info(),
        });
        Ok(())
    }

    /// Change a session's title and/or size.
    pub fn update(&self, id: &SessionId, options: UpdateOptions) -> Result<SessionInfo, PtyError> {
        let session = self.session(id)?;
        if let Some(title) = options.title {
            session.set_title(title);
        }
        if let Some(size) = options.size {
            session.resize(size.cols, size.rows)?;
        }
        let info = session.info();
        self.inner.publish(PtyEvent::Updated { info: info.clone() });
        Ok(info)
    }

    /// Close every connection of a session, kill its process, and forget it.
    ///
    /// An unknown (or already removed) id returns `NotFound` and changes
    /// nothing, so repeated removal is harmless.
    pub fn remove(&self, id: &SessionId) -> Result<(), PtyError> {
        let session = self
            .inner
            .registry
            .take(id)
            .ok_or_else(|| PtyError::NotFound(id.clone()))?;
        self.inner.teardown(&session);
        Ok(())
    }

    /// Remove every session.
    pub fn shutdown(&self) {
        for session in self.inner.registry.drain() {
            self.inner.teardown(&session);
        }
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        self.inner.registry.get(id).map(|s| s.info())
    }

    /// All live sessions in creation order.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.inner.registry.list().iter().map(|s| s.info()).collect()
    }

    /// Receive lifecycle events for every session.
    pub fn subscribe(&self) -> broadcast::Receiver<PtyEvent> {
        self.inner.events.subscribe()
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Session>, PtyError> {
        self.inner
            .registry
            .get(id)
            .ok_or_else(|| PtyError::NotFound(id.clone()))
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new(PtyConfig::default())
    }
}

impl Inner {
    /// Called from the process's exit notification.
    fn handle_exit(&self, id: &SessionId, code: u32) {
        log::info!("PTY session {id} exited with code {code}");
        self.publish(PtyEvent::Exited {
            id: id.clone(),
            code,
        });
        // Absent when the exit was caused by `remove`.
        if let Some(session) = self.registry.take(id) {
            self.teardown(&session);
        }
    }

    /// The session must already be out of the registry.
    fn teardown(&self, session: &Session) {
        if session.shutdown() {
            log::info!("removed PTY session {}", session.id());
            self.publish(PtyEvent::Deleted {
                id: session.id().clone(),
            });
        }
    }

    fn publish(&self, event: PtyEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn native_spawner(config: &PtyConfig) -> Arc<dyn Spawner> {
    Arc::new(NativeSpawner::new(
        config.term.clone(),
        config.read_buffer_size,
    ))
}
