#![deny(unsafe_op_in_unsafe_fn)]

//! Tracing setup for awdlguard hosts.
//!
//! Installs the global subscriber (stdout, a per-component daily file and
//! the `auth.log` / `net.log` subsystem files), reloads the filter when
//! `<root>/config/logging.json` changes and prunes old log files.

pub mod config;
pub mod fs;
pub mod init;
pub mod retention;
pub mod targets;
pub mod watch;

pub use config::LoggingConfig;
pub use init::{apply, init, LoggingGuards};
pub use retention::run_retention;
pub use watch::spawn_watcher;
