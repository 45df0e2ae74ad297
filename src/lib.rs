//! Idempotent host provisioning for oradock.
//!
//! Prepares a single Linux host to run containerized Oracle databases: block
//! volumes are formatted and mounted, OS packages, a container runtime and a
//! pinned Python interpreter are installed, the deployment repository is
//! synced and kernel parameters are tuned. Every step checks the host before
//! changing it, so repeated runs converge without side effects.
//!
//! The public API is organised into four layers:
//!
//! - **[`config`]**: parse and validate the TOML configuration
//! - **[`host`]**: collaborators that inspect and change the machine
//! - **[`steps`]**: named `check + apply` units and the fixed [`steps::Plan`]
//! - **[`orchestrator`]**: runs a plan under a failure policy into a report
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod host;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod steps;
