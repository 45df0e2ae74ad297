//! Service supervisor access.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::exec::Executor;
use crate::platform::InitSystem;

/// Query and start system services.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceManager: Send + Sync + std::fmt::Debug {
    /// Whether the service is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor cannot be invoked.
    fn is_active(&self, name: &str) -> Result<bool>;

    /// Start the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails to start.
    fn start(&self, name: &str) -> Result<()>;
}

/// [`ServiceManager`] backed by `systemctl` or SysV `service`.
#[derive(Debug)]
pub struct SystemServiceManager {
    init: InitSystem,
    executor: Arc<dyn Executor>,
}

impl SystemServiceManager {
    /// Create a service manager for the detected init system.
    #[must_use]
    pub const fn new(init: InitSystem, executor: Arc<dyn Executor>) -> Self {
        Self { init, executor }
    }
}

impl ServiceManager for SystemServiceManager {
    fn is_active(&self, name: &str) -> Result<bool> {
        let result = match self.init {
            InitSystem::Systemd => self
                .executor
                .run_unchecked("systemctl", &["is-active", "--quiet", name]),
            InitSystem::SysV => self.executor.run_unchecked("service", &[name, "status"]),
        }
        .with_context(|| format!("querying service {name}"))?;
        Ok(result.success)
    }

    fn start(&self, name: &str) -> Result<()> {
        match self.init {
            InitSystem::Systemd => self.executor.run("systemctl", &["start", name]),
            InitSystem::SysV => self.executor.run("service", &[name, "start"]),
        }
        .with_context(|| format!("starting service {name}"))?;
        Ok(())
    }
}
