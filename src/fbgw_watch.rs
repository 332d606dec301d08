// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Folder change monitor
/// Watches one folder (non-recursive) for create / delete / rename and raises
/// a single debounced notice per burst of events.
///
/// The notice runs on the debouncer's thread. Callers that touch UI state
/// must post a message from it rather than act directly.

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WatchNotice {
    /// Entries were created, removed or renamed
    Changed,
    /// Last notice from this watch: the folder vanished or the watcher failed
    Disarmed,
}

/// Arm flag shared with the debouncer handler; held while the notice runs
type Gate = Arc<Mutex<bool>>;

struct ActiveWatch {
    root: PathBuf,
    debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    gate: Gate,
}

pub struct ChangeMonitor {
    debounce: Duration,
    active: Option<ActiveWatch>,
}

impl Default for ChangeMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl ChangeMonitor {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, active: None }
    }

    /// True while a watch is registered and has not disarmed itself
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map(|watch| *watch.gate.lock().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or(false)
    }

    pub fn root(&self) -> Option<&Path> {
        self.active.as_ref().map(|watch| watch.root.as_path())
    }

    pub fn start<F>(&mut self, root: &Path, on_change: F) -> Result<(), WatchError>
    where
        F: Fn(WatchNotice) + Send + 'static,
    {
        // Never two live watches
        self.stop();

        let gate: Gate = Arc::new(Mutex::new(true));
        let handler_gate = Arc::clone(&gate);
        let handler_root = root.to_path_buf();
        let watch_error = |source| WatchError::Watch { path: root.to_path_buf(), source };

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            handle_batch(result, &handler_root, &handler_gate, &on_change);
        })
        .map_err(watch_error)?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        debouncer.cache().add_root(root, RecursiveMode::NonRecursive);

        info!(root = %root.display(), "watching folder");
        self.active = Some(ActiveWatch { root: root.to_path_buf(), debouncer, gate });
        Ok(())
    }

    /// Idempotent; no notice runs once this returns
    pub fn stop(&mut self) {
        let Some(watch) = self.active.take() else {
            return;
        };

        // Waits for an in-flight notice, then shuts the door on later ones
        *watch.gate.lock().unwrap_or_else(PoisonError::into_inner) = false;

        watch.debouncer.stop();
        debug!(root = %watch.root.display(), "stopped watching folder");
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Create, delete and rename; content edits do not change the menu
fn is_structural(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

/// One settled burst from the debouncer. A failure or a vanished root still
/// produces a notice so the bar re-projects, then the watch stays dead.
fn handle_batch<F: Fn(WatchNotice)>(result: DebounceEventResult, root: &Path, gate: &Gate, on_change: &F) {
    let failed = match &result {
        Ok(events) => {
            if !events.iter().any(|e| is_structural(&e.event.kind)) {
                return;
            }
            false
        }
        Err(errors) => {
            for e in errors {
                warn!(root = %root.display(), error = %e, "folder watch failed, live refresh disabled");
            }
            true
        }
    };

    let vanished = !root.is_dir();
    if vanished {
        warn!(root = %root.display(), "watched folder disappeared, live refresh disabled");
    }

    let mut armed = gate.lock().unwrap_or_else(PoisonError::into_inner);
    if !*armed {
        return;
    }

    let notice = if failed || vanished {
        *armed = false;
        WatchNotice::Disarmed
    } else {
        WatchNotice::Changed
    };
    debug!(root = %root.display(), ?notice, "folder content changed");
    on_change(notice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use notify::event::{CreateKind, DataChange};
    use notify_debouncer_full::DebouncedEvent;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn counting_monitor(dir: &Path) -> (ChangeMonitor, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut monitor = ChangeMonitor::new(Duration::from_millis(200));
        monitor
            .start(dir, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (monitor, count)
    }

    #[test]
    fn test_burst_fires_once() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, count) = counting_monitor(dir.path());

        let file = dir.path().join("flash.txt");
        fs::write(&file, b"x").unwrap();
        thread::sleep(Duration::from_millis(20));
        fs::remove_file(&file).unwrap();

        thread::sleep(Duration::from_millis(1000));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        monitor.stop();
    }

    #[test]
    fn test_separate_bursts_fire_separately() {
        let dir = TempDir::new().unwrap();
        let (_monitor, count) = counting_monitor(dir.path());

        fs::write(dir.path().join("one.txt"), b"1").unwrap();
        thread::sleep(Duration::from_millis(900));
        fs::rename(dir.path().join("one.txt"), dir.path().join("two.txt")).unwrap();
        thread::sleep(Duration::from_millis(900));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_callback_after_stop() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, count) = counting_monitor(dir.path());

        fs::write(dir.path().join("late.txt"), b"x").unwrap();
        monitor.stop();
        assert!(!monitor.is_active());

        thread::sleep(Duration::from_millis(600));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut never_started = ChangeMonitor::default();
        never_started.stop();
        never_started.stop();

        let dir = TempDir::new().unwrap();
        let (mut monitor, _) = counting_monitor(dir.path());
        assert!(monitor.is_active());
        monitor.stop();
        monitor.stop();
        assert!(monitor.root().is_none());
    }

    #[test]
    fn test_restart_moves_watch() {
        let old = TempDir::new().unwrap();
        let new = TempDir::new().unwrap();
        let (mut monitor, count) = counting_monitor(old.path());

        let seen = Arc::clone(&count);
        monitor
            .start(new.path(), move |_| {
                seen.fetch_add(10, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(monitor.root(), Some(new.path()));

        fs::write(old.path().join("ignored.txt"), b"x").unwrap();
        thread::sleep(Duration::from_millis(600));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        fs::write(new.path().join("seen.txt"), b"x").unwrap();
        thread::sleep(Duration::from_millis(900));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_nested_changes_are_not_watched() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub-menuitem")).unwrap();
        let (_monitor, count) = counting_monitor(dir.path());

        fs::write(dir.path().join("sub-menuitem").join("deep.txt"), b"x").unwrap();
        thread::sleep(Duration::from_millis(600));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_root_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let mut monitor = ChangeMonitor::default();
        assert!(monitor.start(&dir.path().join("missing"), |_| {}).is_err());
        assert!(!monitor.is_active());
    }

    #[test]
    fn test_vanished_root_fires_once_then_disarms() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("watched");
        fs::create_dir(&root).unwrap();
        let (monitor, count) = counting_monitor(&root);

        fs::remove_dir(&root).unwrap();
        thread::sleep(Duration::from_millis(1000));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_active());
    }

    fn recording() -> (Arc<Mutex<Vec<WatchNotice>>>, impl Fn(WatchNotice)) {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        (notices, move |notice| sink.lock().unwrap().push(notice))
    }

    #[test]
    fn test_watcher_error_disarms_with_last_notice() {
        let dir = TempDir::new().unwrap();
        let gate: Gate = Arc::new(Mutex::new(true));
        let (notices, on_change) = recording();

        handle_batch(Err(vec![notify::Error::generic("queue overflow")]), dir.path(), &gate, &on_change);
        assert_eq!(*notices.lock().unwrap(), vec![WatchNotice::Disarmed]);
        assert!(!*gate.lock().unwrap());

        // Anything the debouncer still delivers is swallowed
        handle_batch(Err(vec![notify::Error::generic("again")]), dir.path(), &gate, &on_change);
        assert_eq!(notices.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_only_structural_events_notify() {
        let dir = TempDir::new().unwrap();
        let gate: Gate = Arc::new(Mutex::new(true));
        let (notices, on_change) = recording();

        let edit = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(dir.path().join("notes.txt"));
        let created = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(dir.path().join("new.txt"));

        handle_batch(Ok(vec![DebouncedEvent { event: edit, time: Instant::now() }]), dir.path(), &gate, &on_change);
        assert!(notices.lock().unwrap().is_empty());

        handle_batch(Ok(vec![DebouncedEvent { event: created, time: Instant::now() }]), dir.path(), &gate, &on_change);
        assert_eq!(*notices.lock().unwrap(), vec![WatchNotice::Changed]);
        assert!(*gate.lock().unwrap());
    }
}
