use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::settings::Settings;

/// Something that gets told when a source's content changed.
///
/// The notification carries no payload; the receiver re-fetches whatever it
/// needs from the source.
pub trait ChangeHandler: Send + Sync {
    fn on_change(&self);
}

/// Keeps a watch alive. Dropping it stops watching.
pub trait WatchGuard: Send {}

/// One independently loaded and independently watched configuration provider.
pub trait Source: Send + Sync {
    /// Human-readable name, used in logs and errors.
    fn name(&self) -> String;

    /// Load the current content.
    ///
    /// Returns [`PitError::SourceNotFound`](crate::PitError::SourceNotFound)
    /// when there is nothing to load; callers treat that as an optional
    /// source rather than a failure.
    fn load(&self) -> Result<Settings>;

    /// Start calling `handler` whenever the content changes. Bursts of
    /// changes closer together than `debounce` collapse into one call.
    /// `Ok(None)` means the source has nothing to watch.
    fn watch(
        &self,
        handler: Arc<dyn ChangeHandler>,
        debounce: Duration,
    ) -> Result<Option<Box<dyn WatchGuard>>>;

    /// Poll the remote end for new content. Only meaningful when
    /// [`is_remote`](Source::is_remote) is true.
    fn fetch_remote(&self) -> Result<()> {
        Ok(())
    }

    fn is_remote(&self) -> bool {
        false
    }
}
