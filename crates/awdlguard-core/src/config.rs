use std::path::PathBuf;

pub const DEFAULT_INTERFACE: &str = "awdl0";
pub const DEFAULT_TOOL_PATH: &str = "/sbin/ifconfig";

/// Static configuration of a guardian instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianConfig {
    /// Interface kept administratively down while control is active.
    pub interface: String,
    /// Network configuration tool invoked as `<tool> <interface> up|down`.
    pub tool_path: PathBuf,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            tool_path: PathBuf::from(DEFAULT_TOOL_PATH),
        }
    }
}
