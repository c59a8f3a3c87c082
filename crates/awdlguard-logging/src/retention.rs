use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;
use crate::fs::log_dir;

/// Hard cap on the log directory after age-based pruning.
pub const MAX_LOG_BYTES: u64 = 200 * 1024 * 1024;

const LOG_PREFIXES: [&str; 3] = ["awdlguardd.log", "auth.log", "net.log"];

struct LogFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Delete logs older than `keep_days`, then the oldest remaining files until
/// the directory fits under [`MAX_LOG_BYTES`]. Returns how many were removed.
pub fn run_retention(root: &Path, cfg: &LoggingConfig) -> Result<usize> {
    prune(&log_dir(root), cfg.keep_days, MAX_LOG_BYTES)
}

fn prune(dir: &Path, keep_days: u64, max_bytes: u64) -> Result<usize> {
    let mut entries = collect_log_files(dir)?;
    let mut removed = 0;

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    entries.retain(|entry| {
        if entry.modified >= cutoff {
            return true;
        }
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                removed += 1;
                false
            }
            Err(err) => {
                tracing::warn!("Failed to remove old log {}: {}", entry.path.display(), err);
                true
            }
        }
    });

    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    if total > max_bytes {
        entries.sort_by_key(|e| e.modified);
        for entry in entries {
            if total <= max_bytes {
                break;
            }
            if let Err(err) = fs::remove_file(&entry.path) {
                tracing::warn!(
                    "Failed to remove log {} during size cap cleanup: {}",
                    entry.path.display(),
                    err
                );
                continue;
            }
            removed += 1;
            total = total.saturating_sub(entry.size);
        }
    }

    Ok(removed)
}

fn collect_log_files(dir: &Path) -> Result<Vec<LogFile>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }

    let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("iterating {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_log_name(name) {
            continue;
        }

        let metadata = fs::metadata(&path).with_context(|| format!("stat {}", path.display()))?;
        files.push(LogFile {
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
            path,
        });
    }

    Ok(files)
}

fn is_log_name(name: &str) -> bool {
    LOG_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}
