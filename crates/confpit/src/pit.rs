//! The aggregator. A [`Pit`] owns every source, the last snapshot of each,
//! and the lock that serializes reloading, merging, and publishing.
//!
//! Startup loads each source once, registers a watcher on each source that
//! loaded, and publishes exactly one initial view. After that, each change
//! notification reloads its own source and republishes a full merge. Sends
//! happen on unbounded channels while the lock is held, so views reach the
//! caller in the order they were merged and a slow consumer never stalls a
//! watcher.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use confpit_core::{ChangeHandler, EnvOverlay, PitError, Result, Settings, Source, WatchGuard, normalize_keys};
use confpit_source::SourceSet;

use crate::merge;
use crate::options::PitOptions;
use crate::remote;
use crate::view::MergedView;

/// Where one source is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Not attempted yet.
    Unloaded,
    /// Loaded at startup; contributes to every merge and is watched.
    Loaded,
    /// Nothing to load at startup. Contributes nothing, never watched.
    Absent,
    /// Failed to load at startup. Reported once, then excluded.
    Failed,
}

struct PitState {
    snapshots: Vec<Option<Settings>>,
    states: Vec<SourceState>,
    published: u64,
    current: Option<MergedView>,
    watches: Vec<Box<dyn WatchGuard>>,
    views: Option<UnboundedSender<MergedView>>,
    errors: Option<UnboundedSender<PitError>>,
    closed: bool,
}

impl PitState {
    fn publish(&mut self, settings: Settings) {
        let view = MergedView::new(self.published, settings);
        self.published += 1;
        debug!(generation = view.generation, keys = view.settings.len(), "publishing merged config");
        if let Some(tx) = &self.views {
            let _ = tx.send(view.clone());
        }
        self.current = Some(view);
    }

    fn report(&self, err: PitError) {
        warn!(error = %err, "config pit error");
        if let Some(tx) = &self.errors {
            let _ = tx.send(err);
        }
    }
}

/// Aggregates an ordered list of sources into one live merged view.
pub struct Pit {
    sources: Vec<Arc<dyn Source>>,
    base: Settings,
    env: EnvOverlay,
    options: PitOptions,
    cancel: CancellationToken,
    state: Mutex<PitState>,
    waiters: Mutex<Vec<JoinHandle<()>>>,
}

/// Reloads one source when it changes. The index is fixed when the handler
/// is registered.
struct SourceHandler {
    pit: Weak<Pit>,
    index: usize,
}

impl ChangeHandler for SourceHandler {
    fn on_change(&self) {
        if let Some(pit) = self.pit.upgrade() {
            pit.refresh(self.index);
        }
    }
}

impl Pit {
    /// Load every source, start watching the ones that loaded, and publish
    /// the initial view. Runs once, before any change can be merged.
    fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        for (index, source) in self.sources.iter().enumerate() {
            let name = source.name();
            match source.load() {
                Ok(settings) => {
                    info!(source = %name, index, keys = settings.len(), "loaded config source");
                    state.snapshots[index] = Some(settings);
                    state.states[index] = SourceState::Loaded;
                }
                Err(e) if e.is_not_found() => {
                    debug!(source = %name, index, "config source not found, skipping");
                    state.states[index] = SourceState::Absent;
                    continue;
                }
                Err(e) => {
                    state.states[index] = SourceState::Failed;
                    state.report(e);
                    continue;
                }
            }

            if self.options.watch_files {
                let handler: Arc<dyn ChangeHandler> = Arc::new(SourceHandler {
                    pit: Arc::downgrade(self),
                    index,
                });
                match source.watch(handler, self.options.debounce()) {
                    Ok(Some(guard)) => state.watches.push(guard),
                    Ok(None) => {}
                    Err(e) => state.report(e),
                }
            }

            if self.options.watch_remote && source.is_remote() {
                let waiter = tokio::spawn(remote::poll_remote(
                    Arc::downgrade(self),
                    index,
                    self.cancel.clone(),
                    self.options.remote_interval(),
                    self.options.remote_schedule,
                ));
                self.waiters.lock().push(waiter);
            }
        }

        let settings = match merge::recompute(&state.snapshots, &self.base, &self.env) {
            Ok(settings) => settings,
            Err(e) => {
                state.report(e);
                merge::fallback(&self.base, &self.env)
            }
        };
        state.publish(settings);
        info!(sources = self.sources.len(), "config pit started");
    }

    /// Reload one source and republish. A failed reload or merge abandons
    /// this pass only; the last published view stays current.
    pub fn refresh(&self, index: usize) {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state, index);
    }

    fn refresh_locked(&self, state: &mut PitState, index: usize) {
        if state.closed || state.states.get(index) != Some(&SourceState::Loaded) {
            return;
        }
        let source = &self.sources[index];
        match source.load() {
            Ok(settings) => state.snapshots[index] = Some(settings),
            Err(e) if e.is_not_found() => {
                warn!(source = %source.name(), "config source disappeared, keeping last snapshot");
                return;
            }
            Err(e) => {
                state.report(e);
                return;
            }
        }
        match merge::recompute(&state.snapshots, &self.base, &self.env) {
            Ok(settings) => state.publish(settings),
            Err(e) => state.report(e),
        }
    }

    /// One remote poll: fetch outside the lock, then merge through the same
    /// path as a file change. Cancellation is checked again after the fetch,
    /// so a poll cancelled mid-fetch publishes nothing.
    pub(crate) fn poll_remote(&self, index: usize) {
        if self.cancel.is_cancelled() || self.state.lock().closed {
            return;
        }
        let source = &self.sources[index];
        let fetched = source.fetch_remote();

        let mut state = self.state.lock();
        if self.cancel.is_cancelled() || state.closed {
            debug!(source = %source.name(), "remote poll cancelled, discarding fetch");
            return;
        }
        match fetched {
            Ok(()) => {
                debug!(source = %source.name(), "remote config polled");
                self.refresh_locked(&mut state, index);
            }
            Err(e) => state.report(e),
        }
    }
}

/// Configures and starts a [`Pit`].
pub struct PitBuilder {
    sources: SourceSet,
    base: Settings,
    options: PitOptions,
    env: Option<EnvOverlay>,
    cancel: Option<CancellationToken>,
}

impl PitBuilder {
    pub fn new(sources: SourceSet) -> Self {
        Self {
            sources,
            base: Settings::new(),
            options: PitOptions::default(),
            env: None,
            cancel: None,
        }
    }

    /// Defaults beneath every source. Never watched; only shadowed.
    pub fn base(mut self, base: Settings) -> Self {
        self.base = normalize_keys(base);
        self
    }

    pub fn options(mut self, options: PitOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the environment overlay derived from the options.
    pub fn env(mut self, env: EnvOverlay) -> Self {
        self.env = Some(env);
        self
    }

    /// Cancelling this token stops remote polling. The pit only observes it:
    /// [`PitHandle::shutdown`] cancels a child token, never this one.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Start the pit in the background and hand back its streams. The first
    /// view on the stream is always the initial merge.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<PitStreams> {
        self.options.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PitError::Config("a config pit must be started inside a tokio runtime".into())
        })?;

        let sources = self.sources.into_sources();
        let (views_tx, views_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let env = self.env.unwrap_or_else(|| self.options.env_overlay());

        let pit = Arc::new(Pit {
            state: Mutex::new(PitState {
                snapshots: vec![None; sources.len()],
                states: vec![SourceState::Unloaded; sources.len()],
                published: 0,
                current: None,
                watches: Vec::new(),
                views: Some(views_tx),
                errors: Some(errors_tx),
                closed: false,
            }),
            sources,
            base: self.base,
            env,
            options: self.options,
            cancel: self.cancel.map(|token| token.child_token()).unwrap_or_default(),
            waiters: Mutex::new(Vec::new()),
        });

        let starting = Arc::clone(&pit);
        let startup = runtime.spawn_blocking(move || starting.start());
        pit.waiters.lock().push(tokio::spawn(async move {
            if let Err(e) = startup.await {
                warn!(error = %e, "config pit startup task failed");
            }
        }));

        Ok(PitStreams {
            views: PitReceiver {
                rx: views_rx,
                _pit: Arc::clone(&pit),
            },
            errors: PitReceiver {
                rx: errors_rx,
                _pit: Arc::clone(&pit),
            },
            handle: PitHandle { pit },
        })
    }
}

/// What a started pit hands back: the merged view stream, the error
/// stream, and a control handle.
pub struct PitStreams {
    pub views: PitReceiver<MergedView>,
    pub errors: PitReceiver<PitError>,
    pub handle: PitHandle,
}

/// Receiving end of one of a pit's streams. Holding it keeps the pit (and
/// its watchers) alive; the stream ends after [`PitHandle::shutdown`].
pub struct PitReceiver<T> {
    rx: UnboundedReceiver<T>,
    _pit: Arc<Pit>,
}

impl<T> PitReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

/// Control handle for a running pit.
#[derive(Clone)]
pub struct PitHandle {
    pit: Arc<Pit>,
}

impl PitHandle {
    pub fn source_names(&self) -> Vec<String> {
        self.pit.sources.iter().map(|s| s.name()).collect()
    }

    pub fn states(&self) -> Vec<SourceState> {
        self.pit.state.lock().states.clone()
    }

    /// The most recently published view, if startup has finished.
    pub fn current(&self) -> Option<MergedView> {
        self.pit.state.lock().current.clone()
    }

    /// Reload one source and republish, as if it had changed.
    pub fn refresh(&self, index: usize) {
        self.pit.refresh(index);
    }

    /// The pit's own token. Cancelling it stops this pit's remote polling
    /// without touching a token passed to [`PitBuilder::cancel_token`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.pit.cancel.clone()
    }

    /// Stop watching and polling, then close both streams once drained.
    pub async fn shutdown(&self) {
        self.pit.cancel.cancel();
        let watches = {
            let mut state = self.pit.state.lock();
            state.closed = true;
            state.views = None;
            state.errors = None;
            std::mem::take(&mut state.watches)
        };
        drop(watches);

        let waiters = std::mem::take(&mut *self.pit.waiters.lock());
        for waiter in waiters {
            let _ = waiter.await;
        }
        info!("config pit shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confpit_source::{FetchSource, MemorySource};
    use serde_json::{Value, json};
    use std::time::Duration;

    fn map(value: Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    fn no_env() -> EnvOverlay {
        EnvOverlay::from_vars(Vec::<(String, String)>::new())
    }

    async fn next_view(streams: &mut PitStreams) -> MergedView {
        tokio::time::timeout(Duration::from_secs(5), streams.views.recv())
            .await
            .expect("timed out waiting for a view")
            .expect("view stream closed")
    }

    #[tokio::test]
    async fn test_states_after_start() {
        let failing = FetchSource::new("kv://broken", || Err(PitError::Config("boom".into())));
        let set = SourceSet::new()
            .push(MemorySource::new("a", map(json!({"a": 1}))))
            .push(MemorySource::empty("missing"))
            .push(failing);

        let mut streams = PitBuilder::new(set).env(no_env()).spawn().unwrap();
        let view = next_view(&mut streams).await;
        assert_eq!(view.generation, 0);
        assert_eq!(view.get_i64("a"), Some(1));
        assert_eq!(
            streams.handle.states(),
            vec![SourceState::Loaded, SourceState::Absent, SourceState::Failed]
        );

        let err = streams.errors.try_recv().unwrap();
        assert!(matches!(err, PitError::RemoteFetch { .. }));
        assert!(streams.errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_absent_source_is_never_refreshed() {
        let set = SourceSet::new().push(MemorySource::empty("later"));
        let mut streams = PitBuilder::new(set).env(no_env()).spawn().unwrap();
        next_view(&mut streams).await;

        streams.handle.refresh(0);
        assert!(streams.views.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_merge_conflict_keeps_previous_view() {
        let first = Arc::new(MemorySource::new("first", map(json!({"db": {"port": 1}}))));
        let second = Arc::new(MemorySource::new("second", map(json!({"name": "x"}))));
        let set = SourceSet::new()
            .push_shared(first.clone())
            .push_shared(second.clone());

        let mut streams = PitBuilder::new(set).env(no_env()).spawn().unwrap();
        let initial = next_view(&mut streams).await;

        second.set(map(json!({"db": "sqlite"})));
        let err = tokio::time::timeout(Duration::from_secs(5), streams.errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, PitError::Merge { .. }));
        assert!(streams.views.try_recv().is_err());
        assert_eq!(streams.handle.current(), Some(initial));

        // The source was not dropped: a compatible value merges again.
        second.set(map(json!({"db": {"host": "h"}})));
        let view = next_view(&mut streams).await;
        assert_eq!(view.generation, 1);
        assert_eq!(view.get_i64("db.port"), Some(1));
        assert_eq!(view.get_str("db.host"), Some("h"));
    }

    #[tokio::test]
    async fn test_initial_conflict_publishes_fallback() {
        let set = SourceSet::new()
            .push(MemorySource::new("a", map(json!({"db": {"port": 1}}))))
            .push(MemorySource::new("b", map(json!({"db": 2}))));
        let mut streams = PitBuilder::new(set)
            .base(map(json!({"Default": true})))
            .env(no_env())
            .spawn()
            .unwrap();

        let view = next_view(&mut streams).await;
        assert_eq!(Value::Object(view.settings), json!({"default": true}));
        assert!(matches!(streams.errors.try_recv(), Ok(PitError::Merge { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() {
        let source = Arc::new(MemorySource::new("a", map(json!({"a": 1}))));
        let set = SourceSet::new().push_shared(source.clone());
        let mut streams = PitBuilder::new(set).env(no_env()).spawn().unwrap();
        next_view(&mut streams).await;

        streams.handle.shutdown().await;
        source.set(map(json!({"a": 2})));
        assert_eq!(streams.views.recv().await, None);
        assert!(streams.handle.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_leaves_caller_token_alone() {
        let app_token = CancellationToken::new();
        let set = SourceSet::new().push(MemorySource::new("a", map(json!({"a": 1}))));
        let mut streams = PitBuilder::new(set)
            .cancel_token(app_token.clone())
            .env(no_env())
            .spawn()
            .unwrap();
        next_view(&mut streams).await;

        streams.handle.shutdown().await;
        assert!(streams.handle.cancel_token().is_cancelled());
        assert!(!app_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_caller_token_cancels_pit() {
        let app_token = CancellationToken::new();
        let streams = PitBuilder::new(SourceSet::new())
            .cancel_token(app_token.clone())
            .env(no_env())
            .spawn()
            .unwrap();

        app_token.cancel();
        assert!(streams.handle.cancel_token().is_cancelled());
    }

    #[test]
    fn test_spawn_outside_runtime_is_config_error() {
        let result = PitBuilder::new(SourceSet::new()).spawn();
        assert!(matches!(result, Err(PitError::Config(_))));
    }
}
