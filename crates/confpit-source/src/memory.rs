use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;

use confpit_core::{ChangeHandler, PitError, Result, Settings, Source, WatchGuard, normalize_keys};

type Handlers = Mutex<Vec<Arc<dyn ChangeHandler>>>;

/// An in-process configuration layer.
///
/// Hosts use it for programmatic overrides that should take part in the
/// merge like any file would; [`set`](MemorySource::set) notifies watchers
/// immediately.
pub struct MemorySource {
    name: String,
    settings: RwLock<Option<Settings>>,
    handlers: Arc<Handlers>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            settings: RwLock::new(Some(normalize_keys(settings))),
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A source that reports not-found until the first [`set`](Self::set).
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: RwLock::new(None),
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replace the content and notify every watcher.
    pub fn set(&self, settings: Settings) {
        *self.settings.write() = Some(normalize_keys(settings));
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler.on_change();
        }
    }
}

struct MemoryWatch {
    handlers: Weak<Handlers>,
    handler: Arc<dyn ChangeHandler>,
}

impl WatchGuard for MemoryWatch {}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().retain(|h| !Arc::ptr_eq(h, &self.handler));
        }
    }
}

impl Source for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<Settings> {
        self.settings.read().clone().ok_or_else(|| PitError::SourceNotFound {
            name: self.name.clone(),
        })
    }

    fn watch(
        &self,
        handler: Arc<dyn ChangeHandler>,
        _debounce: Duration,
    ) -> Result<Option<Box<dyn WatchGuard>>> {
        self.handlers.lock().push(Arc::clone(&handler));
        Ok(Some(Box::new(MemoryWatch {
            handlers: Arc::downgrade(&self.handlers),
            handler,
        })))
    }
}
