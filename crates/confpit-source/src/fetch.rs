use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use confpit_core::{ChangeHandler, PitError, Result, Settings, Source, WatchGuard, normalize_keys};

type Fetcher = dyn Fn() -> Result<Settings> + Send + Sync;

/// A remote source backed by a fetch function.
///
/// The transport is up to the caller: the fetcher might query a key/value
/// store, an HTTP endpoint, or anything else that yields settings. Remote
/// sources are not file-watched; the aggregator polls them through
/// [`Source::fetch_remote`] when remote watching is enabled.
pub struct FetchSource {
    name: String,
    fetcher: Arc<Fetcher>,
    cached: Mutex<Option<Settings>>,
}

impl FetchSource {
    pub fn new<F>(name: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn() -> Result<Settings> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fetcher: Arc::new(fetcher),
            cached: Mutex::new(None),
        }
    }

    fn fetch(&self) -> Result<Settings> {
        match (self.fetcher)() {
            Ok(settings) => Ok(normalize_keys(settings)),
            Err(e) if e.is_not_found() || matches!(e, PitError::RemoteFetch { .. }) => Err(e),
            Err(e) => Err(PitError::remote_fetch(self.name.clone(), e)),
        }
    }
}

impl Source for FetchSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    /// The last fetched snapshot; fetches once if nothing is cached yet.
    fn load(&self) -> Result<Settings> {
        let mut cached = self.cached.lock();
        if let Some(settings) = cached.as_ref() {
            return Ok(settings.clone());
        }
        let settings = self.fetch()?;
        *cached = Some(settings.clone());
        Ok(settings)
    }

    fn watch(
        &self,
        _handler: Arc<dyn ChangeHandler>,
        _debounce: Duration,
    ) -> Result<Option<Box<dyn WatchGuard>>> {
        Ok(None)
    }

    fn fetch_remote(&self) -> Result<()> {
        let settings = self.fetch()?;
        debug!(source = %self.name, keys = settings.len(), "fetched remote config");
        *self.cached.lock() = Some(settings);
        Ok(())
    }

    fn is_remote(&self) -> bool {
        true
    }
}
