use notify::event::ModifyKind;
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, warn};

use confpit_core::{ChangeHandler, WatchGuard};

/// A live watch on one file. Dropping it stops the OS watcher, which drops
/// the event sender and ends the debounce thread.
pub(crate) struct FileWatch {
    _watcher: notify::RecommendedWatcher,
}

impl WatchGuard for FileWatch {}

/// Watch `path` and call `handler` once per burst of modifications.
///
/// The parent directory is watched rather than the file itself, since
/// editors often save by writing a temp file and renaming it over the
/// original.
pub(crate) fn watch_file(
    path: &Path,
    handler: Arc<dyn ChangeHandler>,
    debounce: Duration,
) -> Result<FileWatch, String> {
    let file_name: OsString = path
        .file_name()
        .map(ToOwned::to_owned)
        .ok_or_else(|| format!("{} has no file name", path.display()))?;

    let (tx, rx) = mpsc::channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
        match res {
            Ok(event) => {
                let relevant = match event.kind {
                    EventKind::Modify(ModifyKind::Metadata(_)) => false,
                    EventKind::Modify(_) | EventKind::Create(_) => true,
                    _ => false,
                };
                if !relevant {
                    return;
                }
                let is_our_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if is_our_file {
                    let _ = tx.send(());
                }
            }
            Err(e) => {
                warn!(error = %e, "file watcher error");
            }
        }
    })
    .map_err(|e| format!("failed to create file watcher: {e}"))?;

    let watch_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    watcher
        .watch(watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| format!("failed to watch {}: {e}", watch_dir.display()))?;

    let label = path.display().to_string();
    std::thread::Builder::new()
        .name("confpit-watch".into())
        .spawn(move || debounce_loop(rx, handler, debounce, label))
        .map_err(|e| format!("failed to spawn debounce thread: {e}"))?;

    debug!(path = %path.display(), "watching config file");
    Ok(FileWatch { _watcher: watcher })
}

fn debounce_loop(
    rx: Receiver<()>,
    handler: Arc<dyn ChangeHandler>,
    debounce: Duration,
    label: String,
) {
    while rx.recv().is_ok() {
        // Absorb the rest of the burst: a single save is often a truncate
        // followed by one or more writes.
        loop {
            match rx.recv_timeout(debounce) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        debug!(path = %label, "config file changed");
        handler.on_change();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl ChangeHandler for Counter {
        fn on_change(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(counter: &Counter, expected: usize) -> usize {
        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) >= expected {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        counter.0.load(Ordering::SeqCst)
    }

    #[test]
    fn test_burst_of_writes_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let _watch = watch_file(&path, counter.clone(), Duration::from_millis(150)).unwrap();

        std::fs::write(&path, "a: 2\n").unwrap();
        std::fs::write(&path, "a: 3\n").unwrap();

        assert_eq!(wait_for(&counter, 1), 1);
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sibling_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let _watch = watch_file(&path, counter.clone(), Duration::from_millis(20)).unwrap();

        std::fs::write(dir.path().join("b.yaml"), "b: 1\n").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropping_guard_stops_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.yaml");
        std::fs::write(&path, "a: 1\n").unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let watch = watch_file(&path, counter.clone(), Duration::from_millis(20)).unwrap();
        drop(watch);

        std::fs::write(&path, "a: 2\n").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
