//! Administrative-state queries for a single interface.
//!
//! Every call takes a fresh `getifaddrs` snapshot; nothing is cached.

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tracing::debug;

pub(crate) const T_NET: &str = "awdlguard::net";

/// One interface as seen by a single probe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub admin_up: bool,
}

pub trait InterfaceProbe {
    /// Whether `name` is currently administratively up. Absent interfaces
    /// and enumeration failures both read as `false`.
    fn is_interface_up(&self, name: &str) -> bool;
}

/// Probe backed by the OS interface-address list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        SystemProbe
    }

    /// Snapshot the named interface.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the interface list cannot be read.
    pub fn read_interface(&self, name: &str) -> nix::Result<Option<InterfaceRecord>> {
        let entries = getifaddrs()?;
        Ok(find_record(
            entries.map(|entry| (entry.interface_name, entry.flags)),
            name,
        ))
    }
}

impl InterfaceProbe for SystemProbe {
    fn is_interface_up(&self, name: &str) -> bool {
        admin_up_or_false(name, self.read_interface(name))
    }
}

/// Absent interfaces and enumeration failures both read as not up.
fn admin_up_or_false(name: &str, lookup: nix::Result<Option<InterfaceRecord>>) -> bool {
    match lookup {
        Ok(Some(record)) => record.admin_up,
        Ok(None) => false,
        Err(err) => {
            debug!(target: T_NET, "getifaddrs failed while probing {}: {}", name, err);
            false
        }
    }
}

/// First entry whose name matches exactly. Flags are per interface, so any
/// of its address entries carries the same `IFF_UP` bit.
fn find_record<I>(entries: I, name: &str) -> Option<InterfaceRecord>
where
    I: IntoIterator<Item = (String, InterfaceFlags)>,
{
    entries
        .into_iter()
        .find(|(entry_name, _)| entry_name == name)
        .map(|(entry_name, flags)| InterfaceRecord {
            name: entry_name,
            admin_up: flags.contains(InterfaceFlags::IFF_UP),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    fn entries() -> Vec<(String, InterfaceFlags)> {
        vec![
            ("lo0".to_string(), InterfaceFlags::IFF_UP | InterfaceFlags::IFF_LOOPBACK),
            ("en0".to_string(), InterfaceFlags::IFF_UP | InterfaceFlags::IFF_RUNNING),
            ("awdl0".to_string(), InterfaceFlags::IFF_BROADCAST),
            ("awdl0".to_string(), InterfaceFlags::IFF_BROADCAST),
        ]
    }

    #[test]
    fn exact_name_match_only() {
        assert_eq!(find_record(entries(), "awdl"), None);
        assert_eq!(find_record(entries(), "awdl00"), None);
        let record = find_record(entries(), "en0").unwrap();
        assert!(record.admin_up);
    }

    #[test]
    fn down_interface_reports_not_up() {
        let record = find_record(entries(), "awdl0").unwrap();
        assert_eq!(record.name, "awdl0");
        assert!(!record.admin_up);
    }

    #[test]
    fn enumeration_failure_reads_as_not_up() {
        assert!(!admin_up_or_false("awdl0", Err(Errno::EMFILE)));
        assert!(!admin_up_or_false("awdl0", Ok(None)));
        assert!(admin_up_or_false(
            "awdl0",
            Ok(Some(InterfaceRecord {
                name: "awdl0".to_string(),
                admin_up: true,
            }))
        ));
    }

    #[test]
    fn nonexistent_interface_is_not_up() {
        assert!(!SystemProbe::new().is_interface_up("nonexistent0"));
    }
}
