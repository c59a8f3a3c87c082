use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::fs::{config_path, read_config};
use crate::init::apply;

/// Re-apply `<root>/config/logging.json` whenever it changes.
pub fn spawn_watcher(root: &Path) -> Result<JoinHandle<()>> {
    let root = root.to_path_buf();
    let path = config_path(&root);
    let watch_dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("missing logging config parent dir"))?
        .to_path_buf();

    std::fs::create_dir_all(&watch_dir)
        .with_context(|| format!("creating logging config dir {}", watch_dir.display()))?;

    let handle = thread::Builder::new()
        .name("awdlguard-logwatch".to_string())
        .spawn(move || {
            let (tx, rx) = mpsc::channel();
            let mut watcher = match notify::recommended_watcher(tx) {
                Ok(watcher) => watcher,
                Err(err) => {
                    tracing::warn!("Failed to start logging watcher: {}", err);
                    return;
                }
            };

            if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
                tracing::warn!("Failed to watch logging config dir: {}", err);
                return;
            }

            while let Ok(event) = rx.recv() {
                handle_event(event, &root, &path);
            }
            tracing::debug!("Logging watcher stopped");
        })
        .context("spawning logging watcher thread")?;

    Ok(handle)
}

fn handle_event(event: notify::Result<Event>, root: &Path, path: &PathBuf) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!("Logging watcher error: {}", err);
            return;
        }
    };

    if !is_config_change(&event, path) {
        return;
    }

    let cfg = read_config(root);
    if let Err(err) = apply(&cfg) {
        tracing::warn!("Failed to apply logging config: {}", err);
    }
}

fn is_config_change(event: &Event, path: &PathBuf) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| p == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn only_changes_to_the_config_file_count() {
        let path = PathBuf::from("/var/lib/awdlguard/config/logging.json");
        let tmp = path.with_extension("json.tmp");

        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.clone());
        let create_tmp = Event::new(EventKind::Create(CreateKind::File)).add_path(tmp);
        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone());

        assert!(is_config_change(&modify, &path));
        assert!(!is_config_change(&create_tmp, &path));
        assert!(!is_config_change(&access, &path));
    }
}
