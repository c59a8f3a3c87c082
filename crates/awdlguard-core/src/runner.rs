use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{GuardianError, Result};
use crate::privilege::{PrivilegeBackend, PrivilegeSession, T_AUTH};

/// Kernel limit on interface names, excluding the trailing NUL.
const IFNAMSIZ_MAX: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Up,
    Down,
}

impl DesiredState {
    pub fn verb(self) -> &'static str {
        match self {
            DesiredState::Up => "up",
            DesiredState::Down => "down",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Runs the fixed interface command `<tool> <name> up|down` under a
/// privilege session. The command shape never comes from the caller.
#[derive(Debug, Clone)]
pub struct PrivilegedCommandRunner {
    tool: PathBuf,
}

impl PrivilegedCommandRunner {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Set the administrative state of `name`.
    ///
    /// # Errors
    ///
    /// * `NoAuthorization` - session not valid; no OS call is made
    /// * `InvalidInterfaceName` - `name` could be read as an option or path
    /// * `CommandDispatchFailed` - privileged dispatch reported failure
    pub fn run_interface_command<B: PrivilegeBackend>(
        &self,
        session: &mut PrivilegeSession<B>,
        name: &str,
        desired: DesiredState,
    ) -> Result<()> {
        if !session.is_valid() {
            return Err(GuardianError::NoAuthorization {
                interface: name.to_string(),
            });
        }
        validate_interface_name(name)?;

        let args = [name, desired.verb()];
        match session.execute(&self.tool, &args) {
            Ok(()) => {
                info!(target: T_AUTH, "Ran {} {} {}", self.tool.display(), name, desired);
                Ok(())
            }
            Err(err) => {
                warn!(target: T_AUTH, "{}", err);
                Err(err)
            }
        }
    }
}

pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GuardianError::invalid_name(name, "name cannot be empty"));
    }
    if name.len() > IFNAMSIZ_MAX {
        return Err(GuardianError::invalid_name(
            name,
            format!("name longer than {} bytes", IFNAMSIZ_MAX),
        ));
    }
    if name.starts_with('-') {
        return Err(GuardianError::invalid_name(name, "name cannot start with '-'"));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/')
    {
        return Err(GuardianError::invalid_name(
            name,
            "name contains whitespace, control characters or '/'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;
    use crate::testing::RecordingBackend;

    fn authorized(backend: &RecordingBackend) -> PrivilegeSession<RecordingBackend> {
        let mut session = PrivilegeSession::new(backend.clone(), EventSink::new());
        session.acquire().unwrap();
        session
    }

    #[test]
    fn invalid_session_issues_no_dispatch() {
        let backend = RecordingBackend::new();
        let mut session = PrivilegeSession::new(backend.clone(), EventSink::new());
        let runner = PrivilegedCommandRunner::new("/sbin/ifconfig");

        let result = runner.run_interface_command(&mut session, "awdl0", DesiredState::Down);

        assert!(matches!(result, Err(GuardianError::NoAuthorization { .. })));
        assert_eq!(backend.execute_count(), 0);
    }

    #[test]
    fn builds_two_token_argument_vector() {
        let backend = RecordingBackend::new();
        let mut session = authorized(&backend);
        let runner = PrivilegedCommandRunner::new("/sbin/ifconfig");

        runner
            .run_interface_command(&mut session, "awdl0", DesiredState::Down)
            .unwrap();
        runner
            .run_interface_command(&mut session, "awdl0", DesiredState::Up)
            .unwrap();

        let calls = backend.executions();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, PathBuf::from("/sbin/ifconfig"));
        assert_eq!(calls[0].args, vec!["awdl0", "down"]);
        assert_eq!(calls[1].args, vec!["awdl0", "up"]);
    }

    #[test]
    fn dispatch_failure_is_reported() {
        let backend = RecordingBackend::new();
        let mut session = authorized(&backend);
        backend.set_execute_status(crate::privilege::AuthStatus::Failed(-60031));
        let runner = PrivilegedCommandRunner::new("/sbin/ifconfig");

        let err = runner
            .run_interface_command(&mut session, "awdl0", DesiredState::Down)
            .unwrap_err();

        assert!(matches!(err, GuardianError::CommandDispatchFailed { status: -60031, .. }));
    }

    #[test]
    fn option_like_names_are_rejected_before_dispatch() {
        let backend = RecordingBackend::new();
        let mut session = authorized(&backend);
        let runner = PrivilegedCommandRunner::new("/sbin/ifconfig");

        for name in ["", "-a", "awdl0 up", "../x", "awdl0\0", "averyveryverylongname0"] {
            let result = runner.run_interface_command(&mut session, name, DesiredState::Down);
            assert!(
                matches!(result, Err(GuardianError::InvalidInterfaceName { .. })),
                "{name:?} accepted"
            );
        }
        assert_eq!(backend.execute_count(), 0);
    }
}
