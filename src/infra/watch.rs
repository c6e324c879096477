use crate::domain::SourceKind;
use notify::event::EventKind;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchSignal {
    /// Paths under one source's root changed. An empty list means "rescan everything".
    Changed {
        source: SourceKind,
        paths: Vec<PathBuf>,
    },
    Error(String),
}

#[derive(Debug, Error)]
pub enum WatchSessionsDirError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Keeps the underlying OS watchers alive; dropping it stops delivery.
#[derive(Debug)]
pub struct SessionsDirWatcher {
    watchers: Vec<RecommendedWatcher>,
}

impl SessionsDirWatcher {
    pub fn watched_roots(&self) -> usize {
        self.watchers.len()
    }
}

/// Watches each existing root recursively, forwarding relevant changes into `tx`.
/// Roots that cannot be watched are reported through the returned notices.
pub fn watch_session_roots<T>(
    roots: &[(SourceKind, PathBuf)],
    tx: Sender<T>,
    wrap: fn(WatchSignal) -> T,
) -> (SessionsDirWatcher, Vec<String>)
where
    T: Send + 'static,
{
    let mut watchers = Vec::new();
    let mut notices = Vec::new();
    for (source, root) in roots {
        match watch_root(*source, root, tx.clone(), wrap) {
            Ok(watcher) => watchers.push(watcher),
            Err(error) => {
                tracing::warn!(root = %root.display(), %error, "cannot watch sessions directory");
                notices.push(format!("{} watch unavailable: {error}", source.label()));
            }
        }
    }
    (
        SessionsDirWatcher { watchers },
        notices,
    )
}

fn watch_root<T>(
    source: SourceKind,
    root: &Path,
    tx: Sender<T>,
    wrap: fn(WatchSignal) -> T,
) -> Result<RecommendedWatcher, WatchSessionsDirError>
where
    T: Send + 'static,
{
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if let Some(paths) = relevant_paths(source, &event) {
                    let _ = tx.send(wrap(WatchSignal::Changed { source, paths }));
                }
            }
            Err(error) => {
                let _ = tx.send(wrap(WatchSignal::Error(error.to_string())));
            }
        },
        Config::default(),
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// `None` when the event cannot affect the index. Directory-level events (no log path named)
/// return an empty list, which callers treat as a full rescan.
fn relevant_paths(source: SourceKind, event: &notify::Event) -> Option<Vec<PathBuf>> {
    if matches!(event.kind, EventKind::Access(_)) {
        return None;
    }
    if event.paths.is_empty() {
        return Some(Vec::new());
    }

    let logs = event
        .paths
        .iter()
        .filter(|path| source.accepts_path(path))
        .cloned()
        .collect::<Vec<_>>();
    if !logs.is_empty() {
        return Some(logs);
    }
    // A new or removed directory may carry logs that produce no per-file events.
    let touches_directory = matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_))
        && event.paths.iter().all(|path| path.extension().is_none());
    touches_directory.then(Vec::new)
}
