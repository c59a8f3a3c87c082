#![deny(unsafe_op_in_unsafe_fn)]

//! Keeps a kernel network interface administratively down.
//!
//! [`AwdlGuardian`] acquires administrator execute rights, watches the
//! kernel routing socket for any network change and, whenever the watched
//! interface shows up as administratively up, runs `<tool> <iface> down`
//! under those rights. Stopping control restores the interface.

#[cfg(not(unix))]
compile_error!("awdlguard-core requires a Unix target with a kernel routing socket");

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod guardian;
pub mod monitor;
pub mod privilege;
pub mod probe;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::GuardianConfig;
pub use control::{control_channel, ControlHandle, ControlRequest, GuardianStatus};
pub use error::{GuardianError, Result};
pub use events::{EventSink, GuardianEvent};
pub use guardian::{AwdlGuardian, ControlState, SystemGuardian};
pub use monitor::{KernelEventMonitor, KernelMonitorFactory, MonitorFactory, WakeSource};
pub use privilege::{AuthStatus, PrivilegeBackend, PrivilegeSession, RightsFlags, SystemBackend};
pub use probe::{InterfaceProbe, InterfaceRecord, SystemProbe};
pub use runner::{DesiredState, PrivilegedCommandRunner};

/// Log target for authorization and privileged dispatch.
pub const LOG_TARGET_AUTH: &str = privilege::T_AUTH;
/// Log target for monitoring, probing and reconciliation.
pub const LOG_TARGET_NET: &str = probe::T_NET;
