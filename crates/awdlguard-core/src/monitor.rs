//! Kernel routing-socket monitor.
//!
//! Opens a raw routing-domain socket and turns every datagram the kernel
//! delivers into a unit wake-up. Payloads are read and discarded, never
//! decoded: address, link and route messages all mean "recheck interface
//! state now". Decoding the message type would cut spurious probes but is not
//! needed for correctness, and reading everything avoids missed wake-ups.
//!
//! The stream is single-consumer and non-restartable: once closed it yields
//! `None` forever and a new monitor must be opened.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, trace, warn};

use crate::error::{GuardianError, Result};
use crate::probe::T_NET;

/// Bytes read (and dropped) per wake-up.
pub const WAKE_BUFFER_SIZE: usize = 2048;

/// A closable source of "something changed" wake-ups.
pub trait WakeSource: Stream<Item = ()> + Unpin {
    /// Stop the readiness watcher and release the descriptor. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens a fresh [`WakeSource`] each time control starts.
pub trait MonitorFactory {
    type Source: WakeSource;

    fn open(&mut self) -> Result<Self::Source>;
}

pub struct KernelEventMonitor {
    fd: Option<AsyncFd<OwnedFd>>,
}

enum ReadOutcome {
    Wake,
    Retry,
    Failed(io::Error),
}

impl KernelEventMonitor {
    /// Create the routing socket and register it with the tokio reactor.
    ///
    /// # Errors
    ///
    /// `MonitorSetupFailed` if socket creation is refused (sandbox,
    /// permissions) or no tokio reactor is running on this thread.
    pub fn open() -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(GuardianError::monitor_setup(
                "registering readiness watcher",
                io::Error::new(io::ErrorKind::Other, "no tokio runtime on this thread"),
            ));
        }

        let socket = open_routing_socket()
            .map_err(|e| GuardianError::monitor_setup("creating routing socket", e))?;
        let raw = socket.as_raw_fd();
        let fd = AsyncFd::with_interest(socket, Interest::READABLE)
            .map_err(|e| GuardianError::monitor_setup("registering readiness watcher", e))?;

        debug!(target: T_NET, "Kernel event monitor open on fd {}", raw);
        Ok(Self { fd: Some(fd) })
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.get_ref().as_raw_fd())
    }

    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            // into_inner deregisters from the reactor before handing the
            // descriptor back; dropping it closes the socket.
            let socket = fd.into_inner();
            debug!(target: T_NET, "Kernel event monitor closed fd {}", socket.as_raw_fd());
            drop(socket);
        }
    }

    fn poll_wake(&mut self, cx: &mut Context<'_>) -> Poll<Option<()>> {
        loop {
            let outcome = {
                let Some(fd) = self.fd.as_ref() else {
                    return Poll::Ready(None);
                };
                match fd.poll_read_ready(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(err)) => ReadOutcome::Failed(err),
                    Poll::Ready(Ok(mut guard)) => {
                        let mut buf = [0u8; WAKE_BUFFER_SIZE];
                        match guard
                            .try_io(|inner| recv_discard(inner.get_ref().as_raw_fd(), &mut buf))
                        {
                            Ok(Ok(0)) => ReadOutcome::Retry,
                            Ok(Ok(n)) => {
                                trace!(target: T_NET, "Routing message ({} bytes) discarded", n);
                                ReadOutcome::Wake
                            }
                            Ok(Err(err)) => classify_read_error(err),
                            Err(_would_block) => ReadOutcome::Retry,
                        }
                    }
                }
            };

            match outcome {
                ReadOutcome::Wake => return Poll::Ready(Some(())),
                ReadOutcome::Retry => continue,
                ReadOutcome::Failed(err) => {
                    warn!(target: T_NET, "Kernel event monitor read failed: {}", err);
                    self.close();
                    return Poll::Ready(None);
                }
            }
        }
    }
}

fn classify_read_error(err: io::Error) -> ReadOutcome {
    match err.raw_os_error() {
        Some(libc::EINTR) => ReadOutcome::Retry,
        // Receive buffer overrun: messages were lost, which is still a reason
        // to recheck.
        Some(libc::ENOBUFS) => ReadOutcome::Wake,
        _ => ReadOutcome::Failed(err),
    }
}

fn recv_discard(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is a valid writable region of buf.len() bytes.
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

#[cfg(target_os = "linux")]
fn open_routing_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            libc::NETLINK_ROUTE,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: raw is a freshly created descriptor owned by nobody else.
    let socket = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_groups =
        (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_IFADDR | libc::RTMGRP_IPV6_IFADDR) as u32;

    // SAFETY: addr is a valid sockaddr_nl and the length matches it.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(socket)
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn open_routing_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw = unsafe { libc::socket(libc::AF_ROUTE, libc::SOCK_RAW, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: raw is a freshly created descriptor owned by nobody else.
    let socket = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(socket.as_raw_fd(), libc::F_GETFL);
        if flags < 0 || libc::fcntl(socket.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0
        {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(socket.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(socket)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn open_routing_socket() -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no routing socket on this platform",
    ))
}

impl Stream for KernelEventMonitor {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        self.get_mut().poll_wake(cx)
    }
}

impl WakeSource for KernelEventMonitor {
    fn close(&mut self) {
        KernelEventMonitor::close(self);
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }
}

impl Drop for KernelEventMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KernelMonitorFactory;

impl MonitorFactory for KernelMonitorFactory {
    type Source = KernelEventMonitor;

    fn open(&mut self) -> Result<KernelEventMonitor> {
        KernelEventMonitor::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_outside_runtime_fails_cleanly() {
        let err = KernelEventMonitor::open().err().unwrap();
        assert!(matches!(err, GuardianError::MonitorSetupFailed { .. }));
    }

    #[test]
    fn read_error_classification() {
        assert!(matches!(
            classify_read_error(io::Error::from_raw_os_error(libc::EINTR)),
            ReadOutcome::Retry
        ));
        assert!(matches!(
            classify_read_error(io::Error::from_raw_os_error(libc::ENOBUFS)),
            ReadOutcome::Wake
        ));
        assert!(matches!(
            classify_read_error(io::Error::from_raw_os_error(libc::EBADF)),
            ReadOutcome::Failed(_)
        ));
    }
}
