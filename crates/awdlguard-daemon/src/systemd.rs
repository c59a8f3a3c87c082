//! Minimal `sd_notify` support over `$NOTIFY_SOCKET`.

use std::env;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::warn;

pub fn notify_ready() {
    if let Err(err) = sd_notify("READY=1") {
        warn!("sd_notify READY failed: {}", err);
    }
}

pub fn notify_stopping() {
    if let Err(err) = sd_notify("STOPPING=1") {
        warn!("sd_notify STOPPING failed: {}", err);
    }
}

pub fn spawn_watchdog_task() -> Option<JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = sd_notify("WATCHDOG=1") {
                warn!("sd_notify WATCHDOG failed: {}", err);
            }
        }
    }))
}

fn sd_notify(message: &str) -> io::Result<()> {
    let notify_socket = match env::var("NOTIFY_SOCKET") {
        Ok(value) if !value.is_empty() => value,
        _ => return Ok(()),
    };

    let sock = UnixDatagram::unbound()?;
    if let Some(name) = notify_socket.strip_prefix('@') {
        send_abstract(&sock, message.as_bytes(), name.as_bytes())?;
    } else {
        sock.send_to(message.as_bytes(), notify_socket)?;
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn send_abstract(sock: &UnixDatagram, message: &[u8], name: &[u8]) -> io::Result<()> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    if name.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "notify socket name is empty",
        ));
    }
    let addr = SocketAddr::from_abstract_name(name)?;
    sock.send_to_addr(message, &addr)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_abstract(_sock: &UnixDatagram, _message: &[u8], _name: &[u8]) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract notify sockets are Linux-only",
    ))
}

fn watchdog_interval() -> Option<Duration> {
    let usec = env::var("WATCHDOG_USEC")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())?;
    if usec == 0 {
        return None;
    }

    if let Ok(pid) = env::var("WATCHDOG_PID") {
        if pid.parse::<u32>().ok() != Some(std::process::id()) {
            return None;
        }
    }

    Some(Duration::from_micros(usec / 2).max(Duration::from_secs(1)))
}
