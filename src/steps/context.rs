use std::sync::Arc;

use crate::config::Config;
use crate::host::Host;
use crate::logging::Log;

/// Shared, read-only context for step execution.
#[derive(Clone)]
pub struct Context {
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Collaborators that touch the host.
    pub host: Host,
    /// Logger for output.
    pub log: Arc<dyn Log>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &"<Config>")
            .field("host", &self.host)
            .field("log", &"<dyn Log>")
            .finish()
    }
}

impl Context {
    /// Creates a new context for step execution.
    #[must_use]
    pub const fn new(config: Arc<Config>, host: Host, log: Arc<dyn Log>) -> Self {
        Self { config, host, log }
    }
}
