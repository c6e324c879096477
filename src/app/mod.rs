mod search;

pub use search::*;

use crate::domain::{
    Query, SearchCursor, SessionKey, SessionSummary, SourceKind, Transcript, UnifiedCollection,
    evaluate, parse_query,
};
use crate::infra::{
    CacheStats, HydrateError, IndexError, ScanOutcome, SessionsDirWatcher, Settings,
    TranscriptCache, UnifiedIndexer, UnifiedRefresh, WatchSignal, hydrate_session,
    spawn_background, watch_session_roots,
};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SEARCH_PAGE: usize = 100;
const IDLE_WAIT: Duration = Duration::from_secs(1);

pub type TranscriptReply = Result<Arc<Transcript>, HydrateError>;

#[derive(Clone, Debug)]
pub enum ServiceEvent {
    /// A refresh finished. Carries the collection current after it, changed or not.
    Refreshed(UnifiedRefresh),
    /// The collection changed outside a refresh (count reconciliation).
    SessionsUpdated(Arc<UnifiedCollection>),
    SearchResults(SearchUpdate),
    Notice(String),
}

enum Command {
    Refresh,
    Search {
        token: QueryToken,
        text: String,
        deep: bool,
    },
    LoadMore {
        token: QueryToken,
    },
    Transcript {
        key: SessionKey,
        reply: Sender<TranscriptReply>,
    },
    Watch(WatchSignal),
    ScanFinished(Vec<(SourceKind, Result<ScanOutcome, IndexError>)>),
    Hydrated(Arc<Transcript>),
    DeepFinished {
        token: QueryToken,
        generation: u64,
        sessions: Vec<Arc<SessionSummary>>,
    },
    Shutdown,
}

/// Consumer-facing handle. All index mutation happens on one coordinator thread; file I/O runs
/// on background workers that report back to it.
pub struct SessionService {
    commands: Sender<Command>,
    events: Receiver<ServiceEvent>,
    snapshot: Arc<RwLock<Arc<UnifiedCollection>>>,
    cache: Arc<TranscriptCache>,
    roots: Vec<(SourceKind, PathBuf)>,
    next_token: AtomicU64,
    watcher: Option<SessionsDirWatcher>,
    coordinator: Option<JoinHandle<()>>,
}

impl SessionService {
    pub fn start(settings: Settings) -> io::Result<Self> {
        let (commands_tx, commands_rx) = channel::<Command>();
        let (events_tx, events_rx) = channel::<ServiceEvent>();

        let index = UnifiedIndexer::new(&settings);
        let snapshot = Arc::new(RwLock::new(index.sessions()));
        let cache = Arc::clone(index.cache());
        let roots = SourceKind::ALL
            .into_iter()
            .map(|source| (source, settings.root_for(source).to_path_buf()))
            .collect();

        let coordinator = Coordinator::new(
            settings,
            index,
            Arc::clone(&snapshot),
            commands_tx.clone(),
            events_tx,
        );
        let handle = thread::Builder::new()
            .name("sessions-coordinator".to_string())
            .spawn(move || coordinator.run(commands_rx))?;

        Ok(Self {
            commands: commands_tx,
            events: events_rx,
            snapshot,
            cache,
            roots,
            next_token: AtomicU64::new(1),
            watcher: None,
            coordinator: Some(handle),
        })
    }

    /// Starts watching both roots; changes trigger debounced targeted refreshes.
    /// Returns notices for roots that could not be watched.
    pub fn watch(&mut self) -> Vec<String> {
        let (watcher, notices) =
            watch_session_roots(&self.roots, self.commands.clone(), Command::Watch);
        self.watcher = Some(watcher);
        notices
    }

    pub fn events(&self) -> &Receiver<ServiceEvent> {
        &self.events
    }

    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// Starts a search and returns its token. `deep` adds a transcript pass after the quick one.
    pub fn search(&self, text: &str, deep: bool) -> QueryToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let _ = self.commands.send(Command::Search {
            token,
            text: text.to_string(),
            deep,
        });
        token
    }

    pub fn load_more(&self, token: QueryToken) {
        let _ = self.commands.send(Command::LoadMore { token });
    }

    /// Hydrates a transcript in the background. The receiver yields exactly one reply.
    pub fn transcript(&self, key: &SessionKey) -> Receiver<TranscriptReply> {
        let (reply, rx) = channel();
        let _ = self.commands.send(Command::Transcript {
            key: key.clone(),
            reply,
        });
        rx
    }

    pub fn unified_sessions(&self) -> Arc<UnifiedCollection> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn reveal_path(&self, key: &SessionKey) -> Option<PathBuf> {
        self.unified_sessions()
            .get(key)
            .map(|summary| summary.log_path.clone())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.watcher = None;
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
    }
}

struct ActiveSearch {
    token: QueryToken,
    query: Arc<Query>,
    deep: bool,
    cursor: Option<SearchCursor>,
    quick: Debounce,
    deep_due: Option<Instant>,
}

struct Coordinator {
    settings: Settings,
    index: UnifiedIndexer,
    snapshot: Arc<RwLock<Arc<UnifiedCollection>>>,
    commands: Sender<Command>,
    events: Sender<ServiceEvent>,
    refresh_in_flight: bool,
    pending_full_refresh: bool,
    pending_paths: BTreeMap<SourceKind, Vec<PathBuf>>,
    refresh_debounce: Debounce,
    search: Option<ActiveSearch>,
    deep_generation: Arc<AtomicU64>,
}

impl Coordinator {
    fn new(
        settings: Settings,
        index: UnifiedIndexer,
        snapshot: Arc<RwLock<Arc<UnifiedCollection>>>,
        commands: Sender<Command>,
        events: Sender<ServiceEvent>,
    ) -> Self {
        Self {
            refresh_debounce: Debounce::new(
                settings.refresh_debounce,
                Some(settings.refresh_max_delay),
            ),
            settings,
            index,
            snapshot,
            commands,
            events,
            refresh_in_flight: false,
            pending_full_refresh: false,
            pending_paths: BTreeMap::new(),
            search: None,
            deep_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        loop {
            let timeout = self
                .next_wake()
                .map(|wake| wake.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);
            match commands.recv_timeout(timeout) {
                Ok(Command::Shutdown) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.run_due(Instant::now());
        }
        // Any deep search still running sees itself superseded.
        self.deep_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn next_wake(&self) -> Option<Instant> {
        let refresh = if self.refresh_in_flight {
            None
        } else if self.refresh_debounce.is_pending() {
            self.refresh_debounce.next_wake()
        } else if self.has_pending_refresh() {
            Some(Instant::now())
        } else {
            None
        };
        let quick = self.search.as_ref().and_then(|search| search.quick.next_wake());
        let deep = self.search.as_ref().and_then(|search| search.deep_due);
        [refresh, quick, deep].into_iter().flatten().min()
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Refresh => {
                self.pending_full_refresh = true;
                self.refresh_debounce.clear();
            }
            Command::Watch(WatchSignal::Changed { source, paths }) => {
                if paths.is_empty() {
                    self.pending_full_refresh = true;
                } else {
                    self.pending_paths.entry(source).or_default().extend(paths);
                }
                self.refresh_debounce.touch(Instant::now());
            }
            Command::Watch(WatchSignal::Error(message)) => {
                self.emit(ServiceEvent::Notice(format!("Session watcher error: {message}")));
            }
            Command::ScanFinished(scans) => self.finish_refresh(scans),
            Command::Search { token, text, deep } => self.start_search(token, &text, deep),
            Command::LoadMore { token } => self.load_more(token),
            Command::Transcript { key, reply } => self.hydrate(key, reply),
            Command::Hydrated(transcript) => {
                if self.index.reconcile(&transcript) {
                    let collection = self.publish();
                    self.emit(ServiceEvent::SessionsUpdated(collection));
                }
            }
            Command::DeepFinished {
                token,
                generation,
                sessions,
            } => {
                let current = self.search.as_ref().map(|search| search.token);
                if current != Some(token)
                    || generation != self.deep_generation.load(Ordering::SeqCst)
                {
                    tracing::debug!(token, "dropping superseded deep search results");
                    return;
                }
                self.emit(ServiceEvent::SearchResults(SearchUpdate {
                    token,
                    phase: SearchPhase::Deep,
                    first_page: true,
                    sessions,
                    complete: true,
                }));
            }
            Command::Shutdown => {}
        }
    }

    fn run_due(&mut self, now: Instant) {
        if !self.refresh_in_flight
            && self.has_pending_refresh()
            && (!self.refresh_debounce.is_pending() || self.refresh_debounce.is_due(now))
        {
            self.start_refresh();
        }

        let Some(search) = self.search.as_mut() else {
            return;
        };
        if search.quick.is_pending() && search.quick.is_due(now) {
            search.quick.clear();
            let token = search.token;
            self.emit_first_page(token);
        }
        if self
            .search
            .as_ref()
            .and_then(|search| search.deep_due)
            .is_some_and(|due| now >= due)
        {
            self.start_deep_search();
        }
    }

    fn has_pending_refresh(&self) -> bool {
        self.pending_full_refresh || !self.pending_paths.is_empty()
    }

    fn start_refresh(&mut self) {
        self.refresh_debounce.clear();
        let jobs = if std::mem::take(&mut self.pending_full_refresh) {
            self.pending_paths.clear();
            SourceKind::ALL
                .into_iter()
                .map(|source| self.index.indexer(source).scan_job(None))
                .collect::<Vec<_>>()
        } else {
            std::mem::take(&mut self.pending_paths)
                .into_iter()
                .map(|(source, paths)| self.index.indexer(source).scan_job(Some(paths)))
                .collect()
        };

        let commands = self.commands.clone();
        let spawned = spawn_background("sessions-refresh", move || {
            let scans = jobs
                .into_iter()
                .map(|job| (job.source(), job.run()))
                .collect();
            let _ = commands.send(Command::ScanFinished(scans));
        });
        match spawned {
            Ok(_) => self.refresh_in_flight = true,
            Err(error) => {
                tracing::warn!(%error, "failed to spawn refresh worker");
                self.emit(ServiceEvent::Notice(format!("Refresh failed: {error}")));
            }
        }
    }

    fn finish_refresh(&mut self, scans: Vec<(SourceKind, Result<ScanOutcome, IndexError>)>) {
        self.refresh_in_flight = false;
        let refresh = self.index.apply_scans(scans);
        if refresh.changed() {
            self.publish();
            self.rerun_search();
        }
        self.emit(ServiceEvent::Refreshed(refresh));
    }

    fn publish(&mut self) -> Arc<UnifiedCollection> {
        let collection = self.index.sessions();
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&collection);
        collection
    }

    fn start_search(&mut self, token: QueryToken, text: &str, deep: bool) {
        // Anything still running for the previous query is now stale.
        self.deep_generation.fetch_add(1, Ordering::SeqCst);
        let mut quick = Debounce::new(self.settings.query_debounce, None);
        quick.touch(Instant::now());
        let query = Arc::new(parse_query(text));
        let deep = deep && query.has_text();
        self.search = Some(ActiveSearch {
            token,
            deep_due: deep.then(|| Instant::now() + self.settings.deep_search_debounce),
            query,
            deep,
            cursor: None,
            quick,
        });
    }

    fn rerun_search(&mut self) {
        let deep_search_debounce = self.settings.deep_search_debounce;
        let Some(search) = self.search.as_mut() else {
            return;
        };
        // A deep pass over the previous collection may still be running.
        self.deep_generation.fetch_add(1, Ordering::SeqCst);
        search.cursor = None;
        search.quick.clear();
        if search.deep {
            search.deep_due = Some(Instant::now() + deep_search_debounce);
        }
        let token = search.token;
        self.emit_first_page(token);
    }

    fn emit_first_page(&mut self, token: QueryToken) {
        let collection = self.index.sessions();
        let Some(search) = self.search.as_mut().filter(|search| search.token == token) else {
            return;
        };
        search.cursor = Some(evaluate(Arc::clone(&search.query), collection));
        self.emit_page(token, true);
    }

    fn load_more(&mut self, token: QueryToken) {
        let ready = self
            .search
            .as_ref()
            .is_some_and(|search| search.token == token && search.cursor.is_some());
        if ready {
            self.emit_page(token, false);
        } else {
            tracing::debug!(token, "ignoring load-more for inactive search");
        }
    }

    fn emit_page(&mut self, token: QueryToken, first_page: bool) {
        let Some(cursor) = self
            .search
            .as_mut()
            .and_then(|search| search.cursor.as_mut())
        else {
            return;
        };
        let sessions = cursor.next_batch(SEARCH_PAGE);
        let complete = cursor.is_exhausted();
        self.emit(ServiceEvent::SearchResults(SearchUpdate {
            token,
            phase: SearchPhase::Quick,
            first_page,
            sessions,
            complete,
        }));
    }

    fn start_deep_search(&mut self) {
        // The quick first page always reaches consumers before the deep result it precedes.
        if let Some(search) = self.search.as_mut()
            && search.quick.is_pending()
        {
            search.quick.clear();
            let token = search.token;
            self.emit_first_page(token);
        }
        let Some(search) = self.search.as_mut() else {
            return;
        };
        search.deep_due = None;
        let token = search.token;
        let query = Arc::clone(&search.query);
        let generation = self.deep_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.deep_generation);
        let collection = self.index.sessions();
        let cache = Arc::clone(self.index.cache());
        let commands = self.commands.clone();

        let spawned = spawn_background("sessions-deep-search", move || {
            let is_cancelled = || current.load(Ordering::SeqCst) != generation;
            if let Some(sessions) = run_deep_search(&query, &collection, &cache, is_cancelled) {
                let _ = commands.send(Command::DeepFinished {
                    token,
                    generation,
                    sessions,
                });
            } else {
                tracing::debug!(token, "deep search cancelled");
            }
        });
        if let Err(error) = spawned {
            tracing::warn!(%error, "failed to spawn deep search worker");
        }
    }

    fn hydrate(&mut self, key: SessionKey, reply: Sender<TranscriptReply>) {
        let Some(summary) = self.index.summary(&key) else {
            let _ = reply.send(Err(HydrateError::UnknownSession(key)));
            return;
        };
        let cache = Arc::clone(self.index.cache());
        let commands = self.commands.clone();
        let failure_reply = reply.clone();
        let spawned = spawn_background("sessions-hydrate", move || {
            let result = hydrate_session(&cache, &summary);
            if let Ok(transcript) = &result {
                let _ = commands.send(Command::Hydrated(Arc::clone(transcript)));
            }
            let _ = reply.send(result);
        });
        if let Err(error) = spawned {
            let _ = failure_reply.send(Err(HydrateError::Read {
                path: key.to_string().into(),
                source: error,
            }));
        }
    }

    fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }
}
