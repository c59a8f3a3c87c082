//! Fails if anything outside the privileged execution backend spawns a
//! process. Run from the workspace root:
//!
//!     rustc --edition 2021 -o target/forbid_command_new ci/forbid_command_new.rs
//!     target/forbid_command_new

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Files allowed to spawn processes, relative to the workspace root.
const ALLOWLIST: [&str; 1] = ["crates/awdlguard-core/src/privilege/root.rs"];

const PATTERNS: [&str; 3] = ["Command::new", "process::Command", "execve"];

fn main() {
    if let Err(err) = run() {
        eprintln!("forbid_command_new: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let repo = env::current_dir().map_err(|e| format!("cwd: {e}"))?;
    let allow: Vec<PathBuf> = ALLOWLIST.iter().map(|p| repo.join(p)).collect();

    let mut violations = Vec::new();
    visit_rs(&repo.join("crates"), &allow, &mut violations)?;

    if !violations.is_empty() {
        eprintln!("forbid_command_new: process spawning outside the privileged backend:");
        for v in violations {
            eprintln!("{v}");
        }
        return Err(format!("allowed only in {}", ALLOWLIST.join(", ")));
    }

    println!("forbid_command_new: OK");
    Ok(())
}

fn visit_rs(dir: &Path, allow: &[PathBuf], out: &mut Vec<String>) -> Result<(), String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("read dir {}: {e}", dir.display()))?;
    for entry in entries {
        let entry = entry.map_err(|e| format!("read entry {}: {e}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            if !should_skip_dir(&path) {
                visit_rs(&path, allow, out)?;
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }
        if allow.iter().any(|a| &path == a) {
            continue;
        }

        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        for (idx, line) in text.lines().enumerate() {
            let code = line.split("//").next().unwrap_or("");
            if PATTERNS.iter().any(|p| code.contains(p)) {
                out.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
            }
        }
    }
    Ok(())
}

fn should_skip_dir(path: &Path) -> bool {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    matches!(name, ".git" | "target")
}
