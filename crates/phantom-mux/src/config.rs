use serde::{Deserialize, Serialize};

/// Default number of bytes of output kept per session for replay.
pub const DEFAULT_SCROLLBACK_LIMIT: usize = 2 * 1024 * 1024;

/// Runtime configuration for a [`Multiplexer`](crate::Multiplexer).
///
/// Every field has a default, so a partial JSON document (or `{}`) is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Command used when `create` is called without one.
    ///
    /// If `None`, uses the user's default shell (`$SHELL` or `/bin/sh`).
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Value exported as `TERM` to spawned processes.
    pub term: String,
    /// Bytes of recent output replayed to a newly connected binding.
    /// Zero disables replay.
    pub scrollback_limit: usize,
    /// Size of the buffer used for each blocking PTY read.
    pub read_buffer_size: usize,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 24,
            term: "xterm-256color".to_string(),
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            read_buffer_size: 65536,
            event_capacity: 256,
        }
    }
}

impl PtyConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The command to run when none is given: the configured shell, then
    /// `$SHELL`, then `/bin/sh`.
    pub fn default_command(&self) -> String {
        match &self.shell {
            Some(shell) => shell.clone(),
            None => default_shell(),
        }
    }
}

/// Returns the user's default shell, falling back to `/bin/sh`.
pub(crate) fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}
