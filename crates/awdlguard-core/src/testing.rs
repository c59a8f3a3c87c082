//! Recording doubles for the guardian's OS boundaries.
//!
//! Each double is cheaply cloneable and shares its state through
//! `Arc<Mutex<..>>`, so a test keeps one clone for assertions while the
//! guardian owns another.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::Stream;

use crate::error::{GuardianError, Result};
use crate::monitor::{MonitorFactory, WakeSource};
use crate::privilege::{AuthStatus, PrivilegeBackend, RightsFlags};
use crate::probe::InterfaceProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub tool: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug)]
struct BackendState {
    create_status: AuthStatus,
    rights_status: AuthStatus,
    execute_status: AuthStatus,
    live_handles: usize,
    max_live_handles: usize,
    creates: usize,
    rights_requests: Vec<RightsFlags>,
    executions: Vec<Execution>,
}

/// Privilege backend that grants everything unless told otherwise and
/// records every call.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    state: Arc<Mutex<BackendState>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                create_status: AuthStatus::Success,
                rights_status: AuthStatus::Success,
                execute_status: AuthStatus::Success,
                live_handles: 0,
                max_live_handles: 0,
                creates: 0,
                rights_requests: Vec::new(),
                executions: Vec::new(),
            })),
        }
    }

    pub fn set_create_status(&self, status: AuthStatus) {
        self.state.lock().unwrap().create_status = status;
    }

    pub fn set_rights_status(&self, status: AuthStatus) {
        self.state.lock().unwrap().rights_status = status;
    }

    pub fn set_execute_status(&self, status: AuthStatus) {
        self.state.lock().unwrap().execute_status = status;
    }

    pub fn holds_handle(&self) -> bool {
        self.state.lock().unwrap().live_handles > 0
    }

    pub fn max_live_handles(&self) -> usize {
        self.state.lock().unwrap().max_live_handles
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    /// Number of rights requests, i.e. acquire attempts that got past
    /// context creation.
    pub fn acquire_attempts(&self) -> usize {
        self.state.lock().unwrap().rights_requests.len()
    }

    pub fn rights_requests(&self) -> Vec<RightsFlags> {
        self.state.lock().unwrap().rights_requests.clone()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.state.lock().unwrap().executions.clone()
    }

    pub fn execute_count(&self) -> usize {
        self.state.lock().unwrap().executions.len()
    }

    /// Executions whose last argument is `verb` (`"up"` or `"down"`).
    pub fn commands_with_verb(&self, verb: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .executions
            .iter()
            .filter(|e| e.args.last().map(String::as_str) == Some(verb))
            .count()
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegeBackend for RecordingBackend {
    fn create(&mut self) -> AuthStatus {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        if state.create_status.is_success() {
            state.live_handles += 1;
            state.max_live_handles = state.max_live_handles.max(state.live_handles);
        }
        state.create_status
    }

    fn copy_rights(&mut self, flags: RightsFlags) -> AuthStatus {
        let mut state = self.state.lock().unwrap();
        state.rights_requests.push(flags);
        state.rights_status
    }

    fn execute(&mut self, tool: &Path, args: &[&str]) -> AuthStatus {
        let mut state = self.state.lock().unwrap();
        state.executions.push(Execution {
            tool: tool.to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        state.execute_status
    }

    fn release(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live_handles = 0;
    }
}

/// Probe that replays scripted answers, then repeats a fallback.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    answers: Arc<Mutex<VecDeque<bool>>>,
    fallback: Arc<Mutex<bool>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedProbe {
    pub fn new(fallback: bool) -> Self {
        Self {
            answers: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(fallback)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn push(&self, up: bool) {
        self.answers.lock().unwrap().push_back(up);
    }

    pub fn set_fallback(&self, up: bool) {
        *self.fallback.lock().unwrap() = up;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl InterfaceProbe for ScriptedProbe {
    fn is_interface_up(&self, _name: &str) -> bool {
        *self.calls.lock().unwrap() += 1;
        let next = self.answers.lock().unwrap().pop_front();
        next.unwrap_or_else(|| *self.fallback.lock().unwrap())
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    opens: usize,
    closes: usize,
    live: usize,
    pending: usize,
    fail_next_open: bool,
    end_stream: bool,
    waker: Option<Waker>,
}

/// Factory handing out [`ManualWakeSource`]s that tests fire by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl ManualMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one wake-up on the open source.
    pub fn fire(&self) {
        let mut state = self.state.lock().unwrap();
        state.pending += 1;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    /// Make the open source end, as a failed kernel read would.
    pub fn end_stream(&self) {
        let mut state = self.state.lock().unwrap();
        state.end_stream = true;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().fail_next_open = true;
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Sources opened and not yet closed.
    pub fn live_sources(&self) -> usize {
        self.state.lock().unwrap().live
    }
}

impl MonitorFactory for ManualMonitor {
    type Source = ManualWakeSource;

    fn open(&mut self) -> Result<ManualWakeSource> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_open {
            state.fail_next_open = false;
            return Err(GuardianError::monitor_setup(
                "creating routing socket",
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        state.opens += 1;
        state.live += 1;
        state.pending = 0;
        state.end_stream = false;
        Ok(ManualWakeSource {
            state: Arc::clone(&self.state),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct ManualWakeSource {
    state: Arc<Mutex<MonitorState>>,
    open: bool,
}

impl Stream for ManualWakeSource {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        let this = self.get_mut();
        if !this.open {
            return Poll::Ready(None);
        }
        let mut state = this.state.lock().unwrap();
        if state.end_stream {
            drop(state);
            this.close();
            return Poll::Ready(None);
        }
        if state.pending > 0 {
            state.pending -= 1;
            return Poll::Ready(Some(()));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl WakeSource for ManualWakeSource {
    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.state.lock().unwrap();
            state.closes += 1;
            state.live -= 1;
            state.waker = None;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for ManualWakeSource {
    fn drop(&mut self) {
        self.close();
    }
}
