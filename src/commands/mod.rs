//! Subcommand implementations.
pub mod apply;
pub mod check;
pub mod completions;
pub mod plan;
pub mod version;

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::GlobalOpts;
use crate::config::Config;
use crate::exec::SystemExecutor;
use crate::host::Host;
use crate::logging::{Log, Logger};
use crate::orchestrator::{CancelToken, Orchestrator, Policy, RunMode, RunReport};
use crate::platform::Platform;
use crate::steps::{Context, Plan};

/// Shared state produced by the common command setup sequence.
#[derive(Debug)]
pub struct CommandSetup {
    /// Detected platform.
    pub platform: Platform,
    /// Validated configuration.
    pub config: Arc<Config>,
}

impl CommandSetup {
    /// Resolve the configuration path, load and validate it, and detect the
    /// platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or is invalid.
    pub fn init(global: &GlobalOpts, log: &Logger) -> Result<Self> {
        let path = Config::resolve_path(global.config.as_deref());

        log.stage("Loading configuration");
        let config = Config::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;
        log.info(&format!("config: {}", path.display()));
        log.debug(&format!("{} packages", config.packages.len()));
        log.debug(&format!(
            "{} kernel parameters",
            config.kernel.parameters.len()
        ));

        let warnings = config.warnings();
        if !warnings.is_empty() {
            log.warn(&format!(
                "found {} configuration warning(s):",
                warnings.len()
            ));
            for warning in &warnings {
                log.warn(&format!(
                    "  {} [{}]: {}",
                    warning.key, warning.item, warning.message
                ));
            }
        }

        let platform = Platform::detect();
        log.info(&format!("platform: {platform}"));

        Ok(Self {
            platform,
            config: Arc::new(config),
        })
    }

    /// Build the step context wired to the real host.
    #[must_use]
    pub fn context(&self, log: Arc<dyn Log>) -> Arc<Context> {
        let host = Host::system(&self.platform, Arc::new(SystemExecutor), &self.config);
        Arc::new(Context::new(Arc::clone(&self.config), host, log))
    }
}

/// Cancel `token` on the first Ctrl-C.
///
/// The step in progress is allowed to finish; later steps are not started.
pub fn cancel_on_interrupt(token: &CancelToken, log: &Logger) {
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            tracing::warn!("interrupt received; finishing the current step");
        }
        handler_token.cancel();
    }) {
        log.warn(&format!("cannot install interrupt handler: {e}"));
    }
}

/// Run the standard plan, print the report, and fail if any step did not
/// converge.
///
/// # Errors
///
/// Returns an error if the report cannot be rendered or the run did not
/// succeed.
pub fn run_plan(
    setup: &CommandSetup,
    policy: Policy,
    mode: RunMode,
    json: bool,
    log: &Arc<Logger>,
) -> Result<RunReport> {
    let token = CancelToken::new();
    cancel_on_interrupt(&token, log);

    let ctx = setup.context(Arc::clone(log) as Arc<dyn Log>);
    let report = Orchestrator::new(policy, mode)
        .with_cancel_token(token)
        .run(&Plan::standard(), &ctx);

    if json {
        println!("{}", report.to_json()?);
    } else {
        log.print_report(&report);
    }
    Ok(report)
}
