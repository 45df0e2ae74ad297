//! Structured console logger and the end-of-run summary.
use std::path::PathBuf;

use super::subscriber::{DRY_RUN_TARGET, STAGE_TARGET};
use super::types::Log;
use super::utils::{format_duration, log_file_path};
use crate::orchestrator::{RunReport, StepResult};

/// Implement the methods of [`Log`] by delegating to inherent methods of the
/// same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Console logger backed by the global [`tracing`] subscriber.
///
/// All messages are also written to a persistent log file at
/// `$XDG_CACHE_HOME/oradock-provision/<command>.log` with timestamps and ANSI
/// codes stripped, regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary. The file
    /// itself is created by [`init_subscriber`](super::subscriber::init_subscriber).
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log what a check-only run would have changed.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Print one line per step followed by the totals.
    pub fn print_report(&self, report: &RunReport) {
        if report.records().is_empty() {
            return;
        }

        println!();
        self.stage("Summary");

        for record in report.records() {
            let (icon, color) = match record.result {
                StepResult::AlreadySatisfied => ("·", "\x1b[2m"),
                StepResult::Applied => ("✓", "\x1b[32m"),
                StepResult::WouldApply(_) => ("~", "\x1b[37m"),
                StepResult::Skipped(_) => ("○", "\x1b[33m"),
                StepResult::Failed(_) => ("✗", "\x1b[31m"),
            };
            let suffix = record
                .result
                .detail()
                .map_or_else(String::new, |msg| format!(" ({msg})"));
            self.info(&format!(
                "{color}{icon} {}{suffix}\x1b[0m \x1b[2m{}\x1b[0m",
                record.name,
                format_duration(record.duration)
            ));
        }

        println!();
        self.info(&format!(
            "{} steps in {}: \x1b[2m{} satisfied\x1b[0m, \x1b[32m{} applied\x1b[0m, \x1b[37m{} pending\x1b[0m, \x1b[33m{} skipped\x1b[0m, \x1b[31m{} failed\x1b[0m",
            report.records().len(),
            format_duration(report.elapsed()),
            report.count("already_satisfied"),
            report.count("applied"),
            report.count("would_apply"),
            report.count("skipped"),
            report.count("failed"),
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::logging::isolated_logger;
    use crate::orchestrator::{RunMode, SkipReason, StepRecord};
    use std::fs;
    use std::time::Duration;

    fn contents(log: &Logger) -> String {
        fs::read_to_string(log.log_path().expect("log path")).unwrap()
    }

    #[test]
    fn log_file_is_created() {
        let (log, _tmp, _guard) = isolated_logger();
        let path = log.log_path().expect("log path should exist");
        assert!(path.exists(), "log file should be created by the file layer");
    }

    #[test]
    fn log_file_has_run_header() {
        let (log, _tmp, _guard) = isolated_logger();
        assert!(contents(&log).contains("oradock-provision"));
    }

    #[test]
    fn debug_always_written_to_file() {
        let (log, _tmp, _guard) = isolated_logger();
        let marker = format!("debug-marker-{}", std::process::id());
        log.debug(&marker);
        let text = contents(&log);
        assert!(text.contains("[debug]"));
        assert!(
            text.contains(&marker),
            "debug messages should always appear in the log file"
        );
    }

    #[test]
    fn warn_and_error_are_tagged() {
        let (log, _tmp, _guard) = isolated_logger();
        log.warn("warn-marker");
        log.error("error-marker");
        let text = contents(&log);
        assert!(text.contains("[warn] warn-marker"));
        assert!(text.contains("[error] error-marker"));
    }

    #[test]
    fn stage_written_with_arrow() {
        let (log, _tmp, _guard) = isolated_logger();
        log.stage("Mount backup volume");
        assert!(contents(&log).contains("==> Mount backup volume"));
    }

    #[test]
    fn dry_run_written_with_check_tag() {
        let (log, _tmp, _guard) = isolated_logger();
        log.dry_run("would install git.x86_64");
        assert!(contents(&log).contains("[check] would install git.x86_64"));
    }

    #[test]
    fn events_inside_a_step_span_are_tagged() {
        let (log, _tmp, _guard) = isolated_logger();
        tracing::info_span!("converge", step = "mount-data").in_scope(|| {
            log.info("formatting /dev/sdc");
            log.warn("fstab entry differs");
        });
        log.info("outside");
        let text = contents(&log);
        assert!(text.contains("[mount-data] formatting /dev/sdc"));
        assert!(text.contains("[mount-data] [warn] fstab entry differs"));
        assert!(!text.contains("[mount-data] outside"));
    }

    #[test]
    fn log_trait_delegates_to_logger() {
        let (log, _tmp, _guard) = isolated_logger();
        let log_ref: &dyn Log = &log;
        log_ref.info("via-trait");
        assert!(contents(&log).contains("via-trait"));
    }

    #[test]
    fn report_lists_every_step_and_totals() {
        let (log, _tmp, _guard) = isolated_logger();
        let now = chrono::Utc::now();
        let report = RunReport::new(
            RunMode::Apply,
            now,
            now,
            vec![
                StepRecord::new(
                    "mount-backup",
                    StepResult::AlreadySatisfied,
                    Duration::from_millis(3),
                ),
                StepRecord::new(
                    "install-packages",
                    StepResult::Failed(StepError::PartialInstall {
                        failed: vec!["gcc44.x86_64".to_string()],
                    }),
                    Duration::from_millis(40),
                ),
                StepRecord::new(
                    "fetch-source",
                    StepResult::Skipped(SkipReason::PriorFailure(
                        "install-packages".to_string(),
                    )),
                    Duration::ZERO,
                ),
            ],
        );
        log.print_report(&report);
        let text = contents(&log);
        assert!(text.contains("==> Summary"));
        assert!(text.contains("· mount-backup"));
        assert!(text.contains("✗ install-packages (packages not installed: gcc44.x86_64)"));
        assert!(text.contains("○ fetch-source (install-packages failed)"));
        assert!(text.contains("3 steps in"));
        assert!(text.contains("1 satisfied, 0 applied, 0 pending, 1 skipped, 1 failed"));
    }

    #[test]
    fn empty_report_prints_nothing() {
        let (log, _tmp, _guard) = isolated_logger();
        let now = chrono::Utc::now();
        log.print_report(&RunReport::new(RunMode::Check, now, now, vec![]));
        assert!(!contents(&log).contains("Summary"));
    }
}
