//! Effective-root backend for Unix hosts without Authorization Services.
//!
//! The credential is the process's own root identity: rights are granted
//! only when running with euid 0 and there is nothing to prompt for. The
//! tool is spawned directly with its argument vector, never through a shell.
//!
//! This file is the only place in the workspace allowed to spawn processes
//! (see `ci/forbid_command_new.rs`).

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{AuthStatus, PrivilegeBackend, RightsFlags, T_AUTH};

#[derive(Debug, Default)]
pub struct RootBackend {
    held: bool,
}

impl RootBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrivilegeBackend for RootBackend {
    fn create(&mut self) -> AuthStatus {
        self.held = true;
        AuthStatus::Success
    }

    fn copy_rights(&mut self, flags: RightsFlags) -> AuthStatus {
        if !self.held {
            return AuthStatus::Failed(-1);
        }
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        if euid == 0 {
            AuthStatus::Success
        } else {
            debug!(
                target: T_AUTH,
                "euid {} lacks execute rights (flags {:#x})",
                euid,
                flags.bits()
            );
            AuthStatus::Denied(libc::EPERM)
        }
    }

    fn execute(&mut self, tool: &Path, args: &[&str]) -> AuthStatus {
        if !self.held {
            return AuthStatus::Failed(-1);
        }

        match Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
        {
            Ok(status) => {
                // Dispatch succeeded; the exit code is informational only.
                if !status.success() {
                    warn!(
                        target: T_AUTH,
                        "{} {:?} exited with {}",
                        tool.display(),
                        args,
                        status
                    );
                }
                AuthStatus::Success
            }
            Err(err) => AuthStatus::Failed(err.raw_os_error().unwrap_or(-1)),
        }
    }

    fn release(&mut self) {
        self.held = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rights_require_a_created_context() {
        let mut backend = RootBackend::new();
        assert_eq!(
            backend.copy_rights(RightsFlags::EXECUTE_REQUEST),
            AuthStatus::Failed(-1)
        );
    }

    #[test]
    fn missing_tool_is_a_dispatch_failure() {
        let mut backend = RootBackend::new();
        backend.create();
        let status = backend.execute(Path::new("/nonexistent/awdlguard-tool"), &["lo", "up"]);
        assert_eq!(status, AuthStatus::Failed(libc::ENOENT));
    }

    #[test]
    fn nonzero_exit_still_counts_as_dispatched() {
        if !Path::new("/bin/false").exists() {
            return;
        }
        let mut backend = RootBackend::new();
        backend.create();
        assert_eq!(backend.execute(Path::new("/bin/false"), &[]), AuthStatus::Success);
    }

    #[test]
    fn released_backend_refuses_execution() {
        let mut backend = RootBackend::new();
        backend.create();
        backend.release();
        assert_eq!(
            backend.execute(Path::new("/nonexistent/awdlguard-tool"), &[]),
            AuthStatus::Failed(-1)
        );
    }
}
