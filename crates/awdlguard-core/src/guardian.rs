//! The reconciliation loop that keeps the interface down.
//!
//! `start()` acquires rights if needed, opens the kernel monitor and forces
//! the interface down once. Every wake-up afterwards probes the interface and
//! forces it down again if something brought it up. There is no retry loop:
//! the next kernel event (which a re-enable attempt generates itself) drives
//! the next correction, so the guarantee is eventual, bounded by kernel
//! notification latency. `stop()` closes the monitor and brings the interface
//! back up.

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::GuardianConfig;
use crate::control::{ControlRequest, GuardianStatus};
use crate::error::Result;
use crate::events::{EventSink, GuardianEvent};
use crate::monitor::{MonitorFactory, WakeSource};
use crate::privilege::{PrivilegeBackend, PrivilegeSession};
use crate::probe::{InterfaceProbe, T_NET};
use crate::runner::{DesiredState, PrivilegedCommandRunner};

#[cfg(unix)]
use crate::monitor::KernelMonitorFactory;
#[cfg(unix)]
use crate::privilege::SystemBackend;
#[cfg(unix)]
use crate::probe::SystemProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Inactive,
    Active,
}

pub struct AwdlGuardian<B, P, F>
where
    B: PrivilegeBackend,
    P: InterfaceProbe,
    F: MonitorFactory,
{
    config: GuardianConfig,
    session: PrivilegeSession<B>,
    runner: PrivilegedCommandRunner,
    probe: P,
    monitors: F,
    monitor: Option<F::Source>,
    state: ControlState,
    events: EventSink,
}

#[cfg(unix)]
pub type SystemGuardian = AwdlGuardian<SystemBackend, SystemProbe, KernelMonitorFactory>;

#[cfg(unix)]
impl AwdlGuardian<SystemBackend, SystemProbe, KernelMonitorFactory> {
    /// Guardian wired to the host's privilege facility, `getifaddrs` and
    /// the kernel routing socket.
    pub fn system(config: GuardianConfig) -> Self {
        Self::new(
            config,
            SystemBackend::new(),
            SystemProbe::new(),
            KernelMonitorFactory,
        )
    }
}

impl<B, P, F> AwdlGuardian<B, P, F>
where
    B: PrivilegeBackend,
    P: InterfaceProbe,
    F: MonitorFactory,
{
    pub fn new(config: GuardianConfig, backend: B, probe: P, monitors: F) -> Self {
        let events = EventSink::new();
        let runner = PrivilegedCommandRunner::new(config.tool_path.clone());
        Self {
            session: PrivilegeSession::new(backend, events.clone()),
            runner,
            probe,
            monitors,
            monitor: None,
            state: ControlState::Inactive,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardianEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ControlState::Active
    }

    pub fn monitor_open(&self) -> bool {
        self.monitor.as_ref().map(|m| m.is_open()).unwrap_or(false)
    }

    /// Explicitly (re)acquire execute rights. Prompts the user if the OS
    /// requires it.
    pub fn request_authorization(&mut self) -> Result<()> {
        self.session.acquire()
    }

    pub fn has_valid_authorization(&self) -> bool {
        self.session.is_valid()
    }

    /// Drop the credential. Control state is left untouched; while active
    /// without rights, forcing attempts are refused and logged until rights
    /// return.
    pub fn clear_authorization(&mut self) {
        self.session.clear();
    }

    /// Begin keeping the interface down.
    ///
    /// # Errors
    ///
    /// Authorization errors from the session, or `MonitorSetupFailed`. The
    /// guardian stays inactive on every error and no monitor is left open.
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        if !self.session.is_valid() {
            // The session reports its own failure on the event channel.
            self.session.acquire()?;
        }

        let monitor = match self.monitors.open() {
            Ok(monitor) => monitor,
            Err(err) => {
                warn!(target: T_NET, "{}", err);
                self.events.report(&err);
                return Err(err);
            }
        };
        self.monitor = Some(monitor);
        self.state = ControlState::Active;
        info!(target: T_NET, "Interface control active for {}", self.config.interface);

        // Close the window between an external re-enable and the first
        // kernel event. Failure here does not undo activation.
        if let Err(err) = self.force(DesiredState::Down) {
            debug!(target: T_NET, "Initial force-down of {} failed: {}", self.config.interface, err);
        }
        Ok(())
    }

    /// Stop control and restore the interface to up. The credential is kept
    /// so a later `start()` can reuse it.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        if let Some(mut monitor) = self.monitor.take() {
            monitor.close();
        }
        if let Err(err) = self.force(DesiredState::Up) {
            debug!(target: T_NET, "Restoring {} failed: {}", self.config.interface, err);
        }
        self.state = ControlState::Inactive;
        info!(target: T_NET, "Interface control stopped for {}", self.config.interface);
        Ok(())
    }

    /// Live administrative state of the interface. Never cached.
    pub fn is_enabled(&self) -> bool {
        self.probe.is_interface_up(&self.config.interface)
    }

    pub fn status(&self) -> GuardianStatus {
        GuardianStatus {
            interface: self.config.interface.clone(),
            active: self.is_active(),
            authorized: self.session.is_valid(),
            interface_up: self.is_enabled(),
        }
    }

    /// One reconciliation step. Ignored while inactive.
    pub fn handle_wakeup(&mut self) {
        if !self.is_active() {
            return;
        }

        if self.probe.is_interface_up(&self.config.interface) {
            info!(target: T_NET, "{} came up; forcing it down", self.config.interface);
            // Control stays active on failure; the next event retries.
            if let Err(err) = self.force(DesiredState::Down) {
                warn!(target: T_NET, "Forcing {} down failed: {}", self.config.interface, err);
            }
        } else {
            trace!(target: T_NET, "{} still down", self.config.interface);
        }
    }

    /// Wait for the next monitor wake-up. Never resolves while inactive.
    /// `None` means the monitor stream ended.
    pub async fn next_wakeup(&mut self) -> Option<()> {
        match self.monitor.as_mut() {
            Some(monitor) if self.state == ControlState::Active => monitor.next().await,
            _ => futures::future::pending().await,
        }
    }

    /// Serve control requests and kernel wake-ups until `cancel` fires.
    ///
    /// Everything runs on the calling task; the guardian never spawns.
    /// Control state is left as is on return, so callers decide whether to
    /// `stop()` (or drop, which stops).
    pub async fn run(
        &mut self,
        requests: &mut mpsc::Receiver<ControlRequest>,
        cancel: CancellationToken,
    ) {
        let mut requests_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: T_NET, "Guardian loop cancelled");
                    break;
                }
                request = requests.recv(), if requests_open => match request {
                    Some(request) => self.serve(request),
                    None => {
                        debug!(target: T_NET, "All control handles dropped");
                        requests_open = false;
                    }
                },
                wake = self.next_wakeup() => match wake {
                    Some(()) => self.handle_wakeup(),
                    None => self.monitor_lost(),
                },
            }
        }
    }

    fn serve(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Start(reply) => {
                let _ = reply.send(self.start());
            }
            ControlRequest::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            ControlRequest::RequestAuthorization(reply) => {
                let _ = reply.send(self.request_authorization());
            }
            ControlRequest::ClearAuthorization(reply) => {
                self.clear_authorization();
                let _ = reply.send(());
            }
            ControlRequest::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn monitor_lost(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.close();
        }
        warn!(
            target: T_NET,
            "Kernel event monitor ended; {} is no longer watched until control restarts",
            self.config.interface
        );
        self.events.error("Network monitoring stopped");
    }

    fn force(&mut self, desired: DesiredState) -> Result<()> {
        self.runner
            .run_interface_command(&mut self.session, &self.config.interface, desired)
    }
}

impl<B, P, F> Drop for AwdlGuardian<B, P, F>
where
    B: PrivilegeBackend,
    P: InterfaceProbe,
    F: MonitorFactory,
{
    fn drop(&mut self) {
        if self.is_active() {
            let _ = self.stop();
        }
        if let Some(mut monitor) = self.monitor.take() {
            monitor.close();
        }
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardianError;
    use crate::privilege::AuthStatus;
    use crate::testing::{ManualMonitor, RecordingBackend, ScriptedProbe};

    type TestGuardian = AwdlGuardian<RecordingBackend, ScriptedProbe, ManualMonitor>;

    struct Fixture {
        backend: RecordingBackend,
        probe: ScriptedProbe,
        monitor: ManualMonitor,
        guardian: TestGuardian,
    }

    fn fixture() -> Fixture {
        let backend = RecordingBackend::new();
        let probe = ScriptedProbe::new(false);
        let monitor = ManualMonitor::new();
        let guardian = AwdlGuardian::new(
            GuardianConfig::default(),
            backend.clone(),
            probe.clone(),
            monitor.clone(),
        );
        Fixture {
            backend,
            probe,
            monitor,
            guardian,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<GuardianEvent>) -> Vec<GuardianEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn start_acquires_opens_and_forces_down() {
        let mut f = fixture();

        f.guardian.start().unwrap();

        assert_eq!(f.guardian.state(), ControlState::Active);
        assert_eq!(f.backend.create_count(), 1);
        assert_eq!(f.backend.acquire_attempts(), 1);
        assert_eq!(f.monitor.open_count(), 1);
        assert_eq!(f.backend.commands_with_verb("down"), 1);
        assert!(f.guardian.monitor_open());
    }

    #[test]
    fn start_is_idempotent() {
        let mut f = fixture();

        f.guardian.start().unwrap();
        f.guardian.start().unwrap();

        assert_eq!(f.backend.create_count(), 1);
        assert_eq!(f.monitor.open_count(), 1);
        assert_eq!(f.backend.commands_with_verb("down"), 1);
    }

    #[test]
    fn stop_while_inactive_is_noop() {
        let mut f = fixture();

        f.guardian.stop().unwrap();

        assert_eq!(f.guardian.state(), ControlState::Inactive);
        assert_eq!(f.backend.execute_count(), 0);
    }

    #[test]
    fn failed_acquire_keeps_inactive_and_opens_nothing() {
        let mut f = fixture();
        f.backend.set_rights_status(AuthStatus::Canceled);
        let mut rx = f.guardian.subscribe();

        let err = f.guardian.start().unwrap_err();

        assert!(matches!(err, GuardianError::AuthorizationCanceled));
        assert_eq!(f.guardian.state(), ControlState::Inactive);
        assert_eq!(f.backend.create_count(), 1);
        assert_eq!(f.backend.acquire_attempts(), 1);
        assert_eq!(f.monitor.open_count(), 0);
        assert_eq!(f.backend.execute_count(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![GuardianEvent::ErrorOccurred("Authorization canceled".into())]
        );
    }

    #[test]
    fn failed_monitor_setup_keeps_inactive() {
        let mut f = fixture();
        f.monitor.fail_next_open();
        let mut rx = f.guardian.subscribe();

        let err = f.guardian.start().unwrap_err();

        assert!(matches!(err, GuardianError::MonitorSetupFailed { .. }));
        assert_eq!(f.guardian.state(), ControlState::Inactive);
        assert_eq!(f.backend.execute_count(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                GuardianEvent::AuthorizationChanged(true),
                GuardianEvent::ErrorOccurred("Failed to setup network monitoring".into()),
            ]
        );
    }

    #[test]
    fn start_reuses_valid_session() {
        let mut f = fixture();
        f.guardian.request_authorization().unwrap();

        f.guardian.start().unwrap();
        f.guardian.stop().unwrap();
        f.guardian.start().unwrap();

        assert_eq!(f.backend.create_count(), 1);
        assert_eq!(f.backend.acquire_attempts(), 1);
        assert!(f.guardian.has_valid_authorization());
    }

    #[test]
    fn initial_force_failure_still_activates() {
        let mut f = fixture();
        f.backend.set_execute_status(AuthStatus::Failed(-60031));

        f.guardian.start().unwrap();

        assert!(f.guardian.is_active());
    }

    #[test]
    fn wakeup_forces_down_only_when_up() {
        let mut f = fixture();
        f.guardian.start().unwrap();
        let baseline = f.backend.commands_with_verb("down");

        f.probe.push(true);
        f.guardian.handle_wakeup();
        assert_eq!(f.backend.commands_with_verb("down"), baseline + 1);

        f.guardian.handle_wakeup();
        assert_eq!(f.backend.commands_with_verb("down"), baseline + 1);
    }

    #[test]
    fn wakeup_while_inactive_does_nothing() {
        let mut f = fixture();
        f.probe.set_fallback(true);

        f.guardian.handle_wakeup();

        assert_eq!(f.probe.calls(), 0);
        assert_eq!(f.backend.execute_count(), 0);
    }

    #[test]
    fn stop_restores_exactly_once() {
        let mut f = fixture();
        f.guardian.start().unwrap();
        f.probe.set_fallback(true);
        for _ in 0..5 {
            f.guardian.handle_wakeup();
        }

        f.guardian.stop().unwrap();
        f.guardian.stop().unwrap();

        assert_eq!(f.backend.commands_with_verb("up"), 1);
        assert_eq!(f.monitor.live_sources(), 0);
        assert_eq!(f.monitor.close_count(), 1);
        assert!(f.guardian.has_valid_authorization());
    }

    #[test]
    fn state_tracks_last_successful_call() {
        let mut f = fixture();
        f.guardian.start().unwrap();
        f.guardian.stop().unwrap();
        f.guardian.stop().unwrap();
        f.guardian.start().unwrap();
        assert!(f.guardian.is_active());

        f.guardian.stop().unwrap();
        f.monitor.fail_next_open();
        assert!(f.guardian.start().is_err());
        assert_eq!(f.guardian.state(), ControlState::Inactive);
    }

    #[test]
    fn wakeup_without_rights_dispatches_nothing_and_stays_active() {
        let mut f = fixture();
        f.guardian.start().unwrap();
        f.guardian.clear_authorization();
        let baseline = f.backend.execute_count();
        f.probe.set_fallback(true);

        f.guardian.handle_wakeup();
        f.guardian.handle_wakeup();

        assert_eq!(f.probe.calls(), 2);
        assert_eq!(f.backend.execute_count(), baseline);
        assert!(f.guardian.is_active());
        assert!(f.guardian.monitor_open());

        // Rights coming back resume correction on the next event.
        f.guardian.request_authorization().unwrap();
        f.guardian.handle_wakeup();
        assert_eq!(f.backend.commands_with_verb("down"), 2);
    }

    #[test]
    fn is_enabled_is_live() {
        let f = fixture();
        f.probe.push(true);
        f.probe.push(false);

        assert!(f.guardian.is_enabled());
        assert!(!f.guardian.is_enabled());
        assert_eq!(f.probe.calls(), 2);
    }

    #[test]
    fn drop_while_active_closes_monitor_and_releases() {
        let f = fixture();
        let Fixture {
            backend,
            monitor,
            mut guardian,
            ..
        } = f;
        guardian.start().unwrap();

        drop(guardian);

        assert_eq!(monitor.live_sources(), 0);
        assert_eq!(backend.commands_with_verb("up"), 1);
        assert!(!backend.holds_handle());
    }

    #[test]
    fn drop_while_active_without_rights_does_not_panic() {
        let Fixture {
            backend,
            monitor,
            mut guardian,
            ..
        } = fixture();
        guardian.start().unwrap();
        guardian.clear_authorization();

        drop(guardian);

        assert_eq!(monitor.live_sources(), 0);
        assert_eq!(backend.commands_with_verb("up"), 0);
    }
}
