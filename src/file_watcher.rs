use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bevy::log::{info, warn};
use bevy::prelude::Resource;
use crossbeam_channel::{Receiver, Sender};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::assets::{relative_to_root, ASSETS_DIR, SCRIPTS_DIR};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];
const SCRIPT_EXTENSIONS: [&str; 2] = ["lua", "rhai"];

/// A project file changed on disk. Paths are project-relative with forward
/// slashes, as stored in scene files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileWatchEvent {
    AssetChanged(String),
    ScriptChanged(String),
}

/// Watches `<root>/assets` and `<root>/scripts` from a background thread.
/// Dropping it stops the thread and the underlying watcher.
#[derive(Resource)]
pub struct ProjectWatcher {
    rx: Receiver<FileWatchEvent>,
    stop: Arc<AtomicBool>,
}

impl ProjectWatcher {
    pub fn spawn(root: &Path) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<FileWatchEvent>();
        let stop = Arc::new(AtomicBool::new(false));
        let root = root.to_path_buf();
        let thread_stop = stop.clone();
        let spawned = std::thread::Builder::new()
            .name("spar-watch".into())
            .spawn(move || run_watcher(root, tx, thread_stop));
        if let Err(e) = spawned {
            warn!("[Spar FileWatcher] Failed to start watcher thread: {e}");
        }
        Self { rx, stop }
    }

    /// Everything reported since the last call, oldest first.
    pub fn drain(&self) -> Vec<FileWatchEvent> {
        let mut events: Vec<FileWatchEvent> = Vec::new();
        for event in self.rx.try_iter() {
            if !events.contains(&event) {
                events.push(event);
            }
        }
        events
    }
}

impl Drop for ProjectWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn run_watcher(root: PathBuf, tx: Sender<FileWatchEvent>, stop: Arc<AtomicBool>) {
    let callback_root = root.clone();
    let mut watcher: RecommendedWatcher =
        match notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                handle_fs_event(event, &callback_root, &tx);
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!("[Spar FileWatcher] Failed to create watcher: {e}");
                return;
            }
        };

    for dir in [ASSETS_DIR, SCRIPTS_DIR] {
        let path = root.join(dir);
        if let Err(e) = std::fs::create_dir_all(&path) {
            warn!("[Spar FileWatcher] Cannot create {}: {e}", path.display());
            continue;
        }
        match watcher.watch(&path, RecursiveMode::Recursive) {
            Ok(()) => info!("[Spar FileWatcher] Watching {}", path.display()),
            Err(e) => warn!("[Spar FileWatcher] Failed to watch {}: {e}", path.display()),
        }
    }

    // The watcher lives as long as this thread.
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
    }
}

fn handle_fs_event(event: NotifyEvent, root: &Path, tx: &Sender<FileWatchEvent>) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(change) = classify(root, path) {
            let _ = tx.send(change);
        }
    }
}

/// Maps a changed file to the event the editor cares about, if any.
pub fn classify(root: &Path, path: &Path) -> Option<FileWatchEvent> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let relative = relative_to_root(root, path)?;
    let top = relative.split('/').next()?;
    if top == ASSETS_DIR && IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileWatchEvent::AssetChanged(relative));
    }
    if top == SCRIPTS_DIR && SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
        return Some(FileWatchEvent::ScriptChanged(relative));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    #[test]
    fn classifies_by_folder_and_extension() {
        let tmp = TempProject::new("watch_classify");
        let png = tmp.write_png("assets/ui/icon.png", 1, 1, [0, 0, 0, 255]);
        let lua = tmp.write("scripts/move.lua", "");
        let txt = tmp.write("assets/readme.txt", "");
        let stray = tmp.write("move.lua", "");

        assert_eq!(
            classify(tmp.path(), &png),
            Some(FileWatchEvent::AssetChanged("assets/ui/icon.png".into()))
        );
        assert_eq!(
            classify(tmp.path(), &lua),
            Some(FileWatchEvent::ScriptChanged("scripts/move.lua".into()))
        );
        assert_eq!(classify(tmp.path(), &txt), None);
        assert_eq!(classify(tmp.path(), &stray), None);
    }

    #[test]
    fn drain_deduplicates() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = ProjectWatcher {
            rx,
            stop: Arc::new(AtomicBool::new(false)),
        };
        for _ in 0..3 {
            tx.send(FileWatchEvent::AssetChanged("assets/a.png".into()))
                .expect("send");
        }
        tx.send(FileWatchEvent::ScriptChanged("scripts/a.lua".into()))
            .expect("send");
        assert_eq!(watcher.drain().len(), 2);
        assert!(watcher.drain().is_empty());
    }
}
