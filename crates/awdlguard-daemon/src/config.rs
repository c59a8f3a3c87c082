use std::env;
use std::path::PathBuf;

use awdlguard_core::GuardianConfig;

pub const DEFAULT_ROOT_PATH: &str = "/var/lib/awdlguard";
pub const DEFAULT_CONTROL_QUEUE: usize = 16;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub guardian: GuardianConfig,
    /// Holds `config/logging.json` and `logs/`.
    pub root_path: PathBuf,
    /// Call `start()` once at boot.
    pub autostart: bool,
    pub control_queue: usize,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let mut guardian = GuardianConfig::default();
        if let Some(interface) = env_string("AWDLGUARD_INTERFACE") {
            guardian.interface = interface;
        }
        if let Some(tool) = env_string("AWDLGUARD_TOOL") {
            guardian.tool_path = PathBuf::from(tool);
        }

        let root_path = env_string("AWDLGUARD_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_PATH));
        let autostart = env_bool("AWDLGUARD_AUTOSTART", true);
        let control_queue = env::var("AWDLGUARD_CONTROL_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_CONTROL_QUEUE);

        Self {
            guardian,
            root_path,
            autostart,
            control_queue,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") => {
            true
        }
        Ok(v) if v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") => {
            false
        }
        _ => default,
    }
}
