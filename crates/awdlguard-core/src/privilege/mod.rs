//! Elevated-execution credential lifecycle.
//!
//! A [`PrivilegeSession`] owns exactly one OS credential at a time through a
//! [`PrivilegeBackend`]. The session is the only path to privileged
//! execution: commands are refused while the session is not valid, and the
//! credential is released on drop and before every re-acquisition.

use std::ops::BitOr;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{GuardianError, Result};
use crate::events::EventSink;

#[cfg(target_os = "macos")]
mod authorization_services;
#[cfg(all(unix, not(target_os = "macos")))]
mod root;

#[cfg(target_os = "macos")]
pub use authorization_services::AuthorizationServices as SystemBackend;
#[cfg(all(unix, not(target_os = "macos")))]
pub use root::RootBackend as SystemBackend;

pub(crate) const T_AUTH: &str = "awdlguard::auth";

/// Status reported by the privileged OS facility, reduced to the cases the
/// guardian distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    Canceled,
    Denied(i32),
    Failed(i32),
}

impl AuthStatus {
    pub fn is_success(self) -> bool {
        matches!(self, AuthStatus::Success)
    }

    pub fn code(self) -> i32 {
        match self {
            AuthStatus::Success => 0,
            AuthStatus::Canceled => -60006,
            AuthStatus::Denied(code) | AuthStatus::Failed(code) => code,
        }
    }
}

/// Flags accompanying a rights request. Bit values follow Authorization.h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RightsFlags(u32);

impl RightsFlags {
    pub const DEFAULTS: RightsFlags = RightsFlags(0);
    pub const INTERACTION_ALLOWED: RightsFlags = RightsFlags(1 << 0);
    pub const EXTEND_RIGHTS: RightsFlags = RightsFlags(1 << 1);
    pub const PRE_AUTHORIZE: RightsFlags = RightsFlags(1 << 4);

    /// Flags used when asking for execute rights.
    pub const EXECUTE_REQUEST: RightsFlags = RightsFlags(
        Self::INTERACTION_ALLOWED.0 | Self::PRE_AUTHORIZE.0 | Self::EXTEND_RIGHTS.0,
    );

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: RightsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RightsFlags {
    type Output = RightsFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        RightsFlags(self.0 | rhs.0)
    }
}

/// Boundary to the OS privilege facility.
///
/// Implementations own the raw credential handle. `release` must be
/// idempotent and must leave the backend without a live handle.
pub trait PrivilegeBackend {
    /// Create a fresh, empty authorization context.
    fn create(&mut self) -> AuthStatus;

    /// Request execute rights on the current context. May block on an
    /// interactive credential prompt.
    fn copy_rights(&mut self, flags: RightsFlags) -> AuthStatus;

    /// Run `tool` with the discrete argument vector under the credential.
    /// Only the dispatch status is reported, not the tool's exit code.
    fn execute(&mut self, tool: &Path, args: &[&str]) -> AuthStatus;

    /// Free the handle, if any.
    fn release(&mut self);
}

pub struct PrivilegeSession<B: PrivilegeBackend> {
    backend: B,
    valid: bool,
    events: EventSink,
}

impl<B: PrivilegeBackend> PrivilegeSession<B> {
    pub fn new(backend: B, events: EventSink) -> Self {
        Self {
            backend,
            valid: false,
            events,
        }
    }

    /// Acquire execute rights, replacing any previous credential.
    ///
    /// # Errors
    ///
    /// * `AuthorizationCreationFailed` - the OS refused to create a context
    /// * `AuthorizationCanceled` - the user dismissed the credential prompt
    /// * `AuthorizationDenied` - any other rights failure
    pub fn acquire(&mut self) -> Result<()> {
        self.clear();

        let status = self.backend.create();
        if !status.is_success() {
            self.backend.release();
            let err = GuardianError::AuthorizationCreationFailed {
                status: status.code(),
            };
            warn!(target: T_AUTH, "{}", err);
            self.events.report(&err);
            return Err(err);
        }

        match self.backend.copy_rights(RightsFlags::EXECUTE_REQUEST) {
            AuthStatus::Success => {
                self.valid = true;
                info!(target: T_AUTH, "Execute rights granted");
                self.events.authorization_changed(true);
                Ok(())
            }
            AuthStatus::Canceled => {
                self.backend.release();
                info!(target: T_AUTH, "Authorization prompt canceled");
                let err = GuardianError::AuthorizationCanceled;
                self.events.report(&err);
                Err(err)
            }
            AuthStatus::Denied(status) | AuthStatus::Failed(status) => {
                self.backend.release();
                let err = GuardianError::AuthorizationDenied { status };
                warn!(target: T_AUTH, "{}", err);
                self.events.report(&err);
                Err(err)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Release the credential. Emits `AuthorizationChanged(false)` only when
    /// the session was valid.
    pub fn clear(&mut self) {
        self.backend.release();

        if self.valid {
            self.valid = false;
            debug!(target: T_AUTH, "Authorization released");
            self.events.authorization_changed(false);
        }
    }

    /// Dispatch a privileged command.
    ///
    /// # Errors
    ///
    /// * `NoAuthorization` - the session is not valid; nothing is dispatched
    /// * `CommandDispatchFailed` - the OS reported a non-success status
    pub fn execute(&mut self, tool: &Path, args: &[&str]) -> Result<()> {
        if !self.valid {
            return Err(GuardianError::NoAuthorization {
                interface: args.first().copied().unwrap_or_default().to_string(),
            });
        }

        let status = self.backend.execute(tool, args);
        if status.is_success() {
            Ok(())
        } else {
            Err(GuardianError::CommandDispatchFailed {
                tool: tool.display().to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                status: status.code(),
            })
        }
    }
}

impl<B: PrivilegeBackend> Drop for PrivilegeSession<B> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GuardianEvent;
    use crate::testing::RecordingBackend;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<GuardianEvent>) -> Vec<GuardianEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn execute_request_flags() {
        let flags = RightsFlags::EXECUTE_REQUEST;
        assert!(flags.contains(RightsFlags::INTERACTION_ALLOWED));
        assert!(flags.contains(RightsFlags::PRE_AUTHORIZE));
        assert!(flags.contains(RightsFlags::EXTEND_RIGHTS));
        assert_eq!(flags.bits(), 0b1_0011);
    }

    #[test]
    fn acquire_success_marks_valid_and_emits() {
        let backend = RecordingBackend::new();
        let events = EventSink::new();
        let mut rx = events.subscribe();
        let mut session = PrivilegeSession::new(backend.clone(), events);

        session.acquire().unwrap();

        assert!(session.is_valid());
        assert_eq!(backend.rights_requests(), vec![RightsFlags::EXECUTE_REQUEST]);
        assert_eq!(drain(&mut rx), vec![GuardianEvent::AuthorizationChanged(true)]);
    }

    #[test]
    fn acquire_canceled_emits_distinct_error() {
        let backend = RecordingBackend::new();
        backend.set_rights_status(AuthStatus::Canceled);
        let events = EventSink::new();
        let mut rx = events.subscribe();
        let mut session = PrivilegeSession::new(backend.clone(), events);

        let err = session.acquire().unwrap_err();

        assert!(matches!(err, GuardianError::AuthorizationCanceled));
        assert!(!session.is_valid());
        assert!(!backend.holds_handle());
        assert_eq!(
            drain(&mut rx),
            vec![GuardianEvent::ErrorOccurred("Authorization canceled".into())]
        );
    }

    #[test]
    fn acquire_denied_emits_generic_error() {
        let backend = RecordingBackend::new();
        backend.set_rights_status(AuthStatus::Denied(-60005));
        let events = EventSink::new();
        let mut rx = events.subscribe();
        let mut session = PrivilegeSession::new(backend, events);

        let err = session.acquire().unwrap_err();

        assert!(matches!(err, GuardianError::AuthorizationDenied { status: -60005 }));
        assert_eq!(
            drain(&mut rx),
            vec![GuardianEvent::ErrorOccurred("Failed to obtain admin privileges".into())]
        );
    }

    #[test]
    fn create_failure_skips_rights_request() {
        let backend = RecordingBackend::new();
        backend.set_create_status(AuthStatus::Failed(-60008));
        let mut session = PrivilegeSession::new(backend.clone(), EventSink::new());

        let err = session.acquire().unwrap_err();

        assert!(matches!(err, GuardianError::AuthorizationCreationFailed { .. }));
        assert!(backend.rights_requests().is_empty());
    }

    #[test]
    fn reacquire_clears_previous_credential_first() {
        let backend = RecordingBackend::new();
        let events = EventSink::new();
        let mut rx = events.subscribe();
        let mut session = PrivilegeSession::new(backend.clone(), events);

        session.acquire().unwrap();
        session.acquire().unwrap();

        assert_eq!(backend.create_count(), 2);
        assert_eq!(backend.max_live_handles(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                GuardianEvent::AuthorizationChanged(true),
                GuardianEvent::AuthorizationChanged(false),
                GuardianEvent::AuthorizationChanged(true),
            ]
        );
    }

    #[test]
    fn clear_is_idempotent_and_emits_once() {
        let events = EventSink::new();
        let mut rx = events.subscribe();
        let mut session = PrivilegeSession::new(RecordingBackend::new(), events);

        session.clear();
        session.acquire().unwrap();
        session.clear();
        session.clear();

        assert_eq!(
            drain(&mut rx),
            vec![
                GuardianEvent::AuthorizationChanged(true),
                GuardianEvent::AuthorizationChanged(false),
            ]
        );
    }

    #[test]
    fn execute_without_rights_never_reaches_backend() {
        let backend = RecordingBackend::new();
        let mut session = PrivilegeSession::new(backend.clone(), EventSink::new());

        let err = session
            .execute(Path::new("/sbin/ifconfig"), &["awdl0", "down"])
            .unwrap_err();

        assert!(matches!(err, GuardianError::NoAuthorization { ref interface } if interface == "awdl0"));
        assert_eq!(backend.execute_count(), 0);
    }

    #[test]
    fn drop_releases_handle() {
        let backend = RecordingBackend::new();
        {
            let mut session = PrivilegeSession::new(backend.clone(), EventSink::new());
            session.acquire().unwrap();
            assert!(backend.holds_handle());
        }
        assert!(!backend.holds_handle());
    }
}
