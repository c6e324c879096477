use crate::domain::{
    FileFingerprint, MessageCount, SessionKey, SessionSummary, SourceKind, Transcript,
};
use crate::infra::{
    HydrateError, SummarizeError, SummarizeSettings, TranscriptCache, load_transcript,
    stat_fingerprint, summarize_session_file, unreadable_summary,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{} sessions directory unreadable: {path}: {reason}", .agent.label())]
    DirectoryUnreadable {
        agent: SourceKind,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RefreshReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Files opened for summarization. Zero when nothing changed on disk.
    pub files_read: usize,
    pub warnings: usize,
}

impl RefreshReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

#[derive(Clone, Debug)]
struct IndexedFile {
    fingerprint: FileFingerprint,
    summary: Arc<SessionSummary>,
}

/// Summaries for one agent's log directory, refreshed incrementally by file fingerprint.
#[derive(Debug)]
pub struct SourceIndexer {
    source: SourceKind,
    root: PathBuf,
    settings: SummarizeSettings,
    reconcile_on_hydrate: bool,
    files: BTreeMap<PathBuf, IndexedFile>,
    by_key: HashMap<SessionKey, PathBuf>,
    cache: Arc<TranscriptCache>,
}

impl SourceIndexer {
    pub fn new(
        source: SourceKind,
        root: PathBuf,
        settings: SummarizeSettings,
        cache: Arc<TranscriptCache>,
    ) -> Self {
        Self {
            source,
            root,
            settings,
            reconcile_on_hydrate: false,
            files: BTreeMap::new(),
            by_key: HashMap::new(),
            cache,
        }
    }

    pub fn with_count_reconciliation(mut self, enabled: bool) -> Self {
        self.reconcile_on_hydrate = enabled;
        self
    }

    pub fn reconciles_on_hydrate(&self) -> bool {
        self.reconcile_on_hydrate
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn summaries(&self) -> Vec<Arc<SessionSummary>> {
        self.files
            .values()
            .map(|file| Arc::clone(&file.summary))
            .collect()
    }

    pub fn summary(&self, key: &SessionKey) -> Option<Arc<SessionSummary>> {
        let path = self.by_key.get(key)?;
        self.files.get(path).map(|file| Arc::clone(&file.summary))
    }

    pub fn path_for(&self, key: &SessionKey) -> Option<&Path> {
        self.by_key.get(key).map(PathBuf::as_path)
    }

    /// Full rescan of the root directory.
    pub fn refresh(&mut self) -> Result<RefreshReport, IndexError> {
        let outcome = self.scan_job(None).run()?;
        Ok(self.apply(outcome))
    }

    /// Rescan limited to paths a change notification named.
    pub fn refresh_paths(&mut self, paths: Vec<PathBuf>) -> Result<RefreshReport, IndexError> {
        let outcome = self.scan_job(Some(paths)).run()?;
        Ok(self.apply(outcome))
    }

    /// Snapshot of what a scan needs, so the file I/O can run off the owning thread.
    pub fn scan_job(&self, hint: Option<Vec<PathBuf>>) -> ScanJob {
        ScanJob {
            source: self.source,
            root: self.root.clone(),
            settings: self.settings,
            known: self
                .files
                .iter()
                .map(|(path, file)| (path.clone(), file.fingerprint))
                .collect(),
            hint,
        }
    }

    pub fn apply(&mut self, outcome: ScanOutcome) -> RefreshReport {
        let mut report = RefreshReport {
            unchanged: outcome.unchanged,
            files_read: outcome.files_read,
            warnings: outcome.warnings,
            ..RefreshReport::default()
        };

        for ScannedFile {
            path,
            fingerprint,
            summary,
        } in outcome.changed
        {
            self.by_key.insert(summary.key.clone(), path.clone());
            let previous = self.files.insert(
                path,
                IndexedFile {
                    fingerprint,
                    summary,
                },
            );
            match previous {
                Some(previous) => {
                    self.cache.invalidate(&previous.summary.key);
                    report.updated += 1;
                }
                None => report.added += 1,
            }
        }

        for path in outcome.removed {
            if let Some(removed) = self.files.remove(&path) {
                self.by_key.remove(&removed.summary.key);
                self.cache.invalidate(&removed.summary.key);
                report.removed += 1;
            }
        }

        if report.changed() {
            tracing::info!(
                source = self.source.tag(),
                added = report.added,
                updated = report.updated,
                removed = report.removed,
                "index refreshed"
            );
        }
        report
    }

    pub fn hydrate(&mut self, key: &SessionKey) -> Result<Arc<Transcript>, HydrateError> {
        let summary = self
            .summary(key)
            .ok_or_else(|| HydrateError::UnknownSession(key.clone()))?;
        let transcript = hydrate_session(&self.cache, &summary)?;
        if self.reconcile_on_hydrate {
            self.reconcile_counts(&transcript);
        }
        Ok(transcript)
    }

    /// Swaps an estimated count for the transcript's exact count when the file has not changed
    /// since it was summarized. Returns whether the summary changed.
    pub fn reconcile_counts(&mut self, transcript: &Transcript) -> bool {
        let Some(path) = self.by_key.get(&transcript.key) else {
            return false;
        };
        let Some(file) = self.files.get_mut(path) else {
            return false;
        };
        if !file.summary.message_count.is_estimate() || file.fingerprint != transcript.fingerprint
        {
            return false;
        }

        let mut summary = (*file.summary).clone();
        summary.message_count = MessageCount::Exact(transcript.message_count());
        summary.size_label = None;
        file.summary = Arc::new(summary);
        true
    }
}

/// Hydrates through the shared cache. Safe to call from any thread.
pub fn hydrate_session(
    cache: &TranscriptCache,
    summary: &SessionSummary,
) -> Result<Arc<Transcript>, HydrateError> {
    let fingerprint = stat_fingerprint(&summary.log_path)?;
    cache.get_or_load(&summary.key, fingerprint, || {
        load_transcript(&summary.log_path, summary.source(), &summary.key)
    })
}

#[derive(Clone, Debug)]
pub struct ScanJob {
    source: SourceKind,
    root: PathBuf,
    settings: SummarizeSettings,
    known: HashMap<PathBuf, FileFingerprint>,
    hint: Option<Vec<PathBuf>>,
}

#[derive(Clone, Debug)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub fingerprint: FileFingerprint,
    pub summary: Arc<SessionSummary>,
}

#[derive(Clone, Debug, Default)]
pub struct ScanOutcome {
    pub changed: Vec<ScannedFile>,
    pub removed: Vec<PathBuf>,
    pub unchanged: usize,
    pub files_read: usize,
    pub warnings: usize,
}

impl ScanJob {
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Stats every candidate file and summarizes only those whose fingerprint changed.
    pub fn run(self) -> Result<ScanOutcome, IndexError> {
        if let Err(error) = fs::read_dir(&self.root) {
            return Err(IndexError::DirectoryUnreadable {
                agent: self.source,
                path: self.root.clone(),
                reason: error.to_string(),
            });
        }

        let mut outcome = ScanOutcome::default();
        match self.targeted_paths() {
            Some(paths) => {
                for path in paths {
                    match fs::metadata(&path) {
                        Ok(metadata) if metadata.is_file() => {
                            let fingerprint = FileFingerprint::from_metadata(&metadata);
                            self.visit(path, fingerprint, &mut outcome);
                        }
                        Ok(_) => {}
                        Err(_) if self.known.contains_key(&path) => outcome.removed.push(path),
                        Err(_) => {}
                    }
                }
            }
            None => self.walk(&mut outcome),
        }
        Ok(outcome)
    }

    // Hints naming directories (new project folders, renames) need a full walk.
    fn targeted_paths(&self) -> Option<Vec<PathBuf>> {
        let hint = self.hint.as_ref()?;
        let mut paths = Vec::new();
        for path in hint {
            if !path.starts_with(&self.root) {
                continue;
            }
            if path.is_dir() {
                return None;
            }
            if self.source.accepts_path(path) && !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        Some(paths)
    }

    fn walk(&self, outcome: &mut ScanOutcome) {
        let mut seen = HashSet::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::debug!(%error, "skipping unreadable directory entry");
                    outcome.warnings += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.source.accepts_path(entry.path()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::debug!(path = %entry.path().display(), %error, "failed to stat");
                    outcome.warnings += 1;
                    continue;
                }
            };
            let path = entry.into_path();
            seen.insert(path.clone());
            self.visit(path, FileFingerprint::from_metadata(&metadata), outcome);
        }

        outcome.removed.extend(
            self.known
                .keys()
                .filter(|path| !seen.contains(*path))
                .cloned(),
        );
    }

    fn visit(&self, path: PathBuf, fingerprint: FileFingerprint, outcome: &mut ScanOutcome) {
        if self.known.get(&path) == Some(&fingerprint) {
            outcome.unchanged += 1;
            return;
        }

        outcome.files_read += 1;
        let summary = match summarize_session_file(&path, self.source, &self.settings) {
            Ok(summary) => summary,
            Err(SummarizeError::FileVanished(_)) => {
                tracing::debug!(path = %path.display(), "session file vanished during scan");
                if self.known.contains_key(&path) {
                    outcome.removed.push(path);
                }
                return;
            }
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "session file unreadable");
                outcome.warnings += 1;
                unreadable_summary(&path, self.source, fingerprint, error.to_string())
            }
        };

        outcome.changed.push(ScannedFile {
            fingerprint: summary.fingerprint,
            summary: Arc::new(summary),
            path,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn codex_session(id: &str, ts: &str, prompt: &str) -> String {
        [
            serde_json::json!({
                "timestamp": ts,
                "type": "session_meta",
                "payload": { "id": id, "timestamp": ts, "cwd": "/work/app" }
            }),
            serde_json::json!({
                "timestamp": ts,
                "type": "response_item",
                "payload": { "type": "message", "role": "user", "content": [{ "type": "input_text", "text": prompt }] }
            }),
        ]
        .iter()
        .map(|value| format!("{value}\n"))
        .collect()
    }

    fn indexer(root: &Path) -> SourceIndexer {
        SourceIndexer::new(
            SourceKind::Codex,
            root.to_path_buf(),
            SummarizeSettings::default(),
            Arc::new(TranscriptCache::new(16, u64::MAX)),
        )
    }

    // Appends and bumps mtime so the fingerprint changes even on coarse-mtime filesystems.
    fn append(path: &Path, text: &str) {
        let mut body = fs::read_to_string(path).expect("read");
        body.push_str(text);
        fs::write(path, body).expect("write");
        let file = fs::File::options().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .expect("set mtime");
    }

    #[test]
    fn refresh_adds_updates_and_removes() {
        let temp = tempdir().expect("tempdir");
        let day = temp.path().join("2025/01/01");
        fs::create_dir_all(&day).expect("mkdir");
        let a = day.join("rollout-a.jsonl");
        let b = day.join("rollout-b.jsonl");
        fs::write(&a, codex_session("a", "2025-01-01T00:00:00Z", "first")).expect("write");
        fs::write(&b, codex_session("b", "2025-01-01T01:00:00Z", "second")).expect("write");
        fs::write(day.join("notes.txt"), "ignored").expect("write");

        let mut index = indexer(temp.path());
        let report = index.refresh().expect("refresh");
        assert_eq!(report.added, 2);
        assert_eq!(report.files_read, 2);
        assert_eq!(index.len(), 2);

        append(&a, "\n");
        fs::remove_file(&b).expect("remove");
        let report = index.refresh().expect("refresh");
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.files_read, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn refresh_without_changes_reads_nothing() {
        let temp = tempdir().expect("tempdir");
        fs::write(
            temp.path().join("rollout.jsonl"),
            codex_session("a", "2025-01-01T00:00:00Z", "hi"),
        )
        .expect("write");

        let mut index = indexer(temp.path());
        index.refresh().expect("first");
        let before = index.summaries();
        let report = index.refresh().expect("second");
        assert_eq!(report.files_read, 0);
        assert_eq!(report.unchanged, 1);
        assert!(!report.changed());
        assert_eq!(index.summaries(), before);
    }

    #[test]
    fn missing_root_is_directory_unreadable_and_keeps_state() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("sessions");
        fs::create_dir_all(&root).expect("mkdir");
        fs::write(
            root.join("rollout.jsonl"),
            codex_session("a", "2025-01-01T00:00:00Z", "hi"),
        )
        .expect("write");

        let mut index = indexer(&root);
        index.refresh().expect("refresh");
        fs::remove_dir_all(&root).expect("rm");

        assert!(matches!(
            index.refresh(),
            Err(IndexError::DirectoryUnreadable { .. })
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn targeted_refresh_only_touches_named_files() {
        let temp = tempdir().expect("tempdir");
        let a = temp.path().join("a.jsonl");
        fs::write(&a, codex_session("a", "2025-01-01T00:00:00Z", "hi")).expect("write");
        let mut index = indexer(temp.path());
        index.refresh().expect("refresh");

        let b = temp.path().join("b.jsonl");
        fs::write(&b, codex_session("b", "2025-01-02T00:00:00Z", "new")).expect("write");
        let report = index.refresh_paths(vec![b.clone()]).expect("targeted");
        assert_eq!(report.added, 1);
        assert_eq!(report.files_read, 1);
        assert_eq!(report.unchanged, 0);

        fs::remove_file(&b).expect("remove");
        let report = index.refresh_paths(vec![b]).expect("targeted");
        assert_eq!(report.removed, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn hydrate_uses_cache_and_refresh_invalidates_changed_file_only() {
        let temp = tempdir().expect("tempdir");
        let a = temp.path().join("a.jsonl");
        let b = temp.path().join("b.jsonl");
        fs::write(&a, codex_session("a", "2025-01-01T00:00:00Z", "alpha")).expect("write");
        fs::write(&b, codex_session("b", "2025-01-02T00:00:00Z", "beta")).expect("write");

        let cache = Arc::new(TranscriptCache::new(16, u64::MAX));
        let mut index = SourceIndexer::new(
            SourceKind::Codex,
            temp.path().to_path_buf(),
            SummarizeSettings::default(),
            Arc::clone(&cache),
        );
        index.refresh().expect("refresh");
        let key_a = SessionKey::for_log_path(SourceKind::Codex, &a);
        let key_b = SessionKey::for_log_path(SourceKind::Codex, &b);

        let first = index.hydrate(&key_a).expect("hydrate a");
        index.hydrate(&key_b).expect("hydrate b");
        let again = index.hydrate(&key_a).expect("hydrate a again");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.stats().loads, 2);

        append(&a, "\n");
        index.refresh().expect("refresh");
        assert!(cache.peek(&key_a).is_none());
        assert!(cache.peek(&key_b).is_some());

        let unknown = SessionKey::for_log_path(SourceKind::Codex, Path::new("/nope.jsonl"));
        assert!(matches!(
            index.hydrate(&unknown),
            Err(HydrateError::UnknownSession(_))
        ));
    }

    fn large_index(root: &Path, reconcile: bool) -> (SourceIndexer, SessionKey) {
        let path = root.join("big.jsonl");
        let mut body = codex_session("big", "2025-02-01T00:00:00Z", "start");
        for i in 0..200 {
            body.push_str(&format!(
                "{}\n",
                serde_json::json!({
                    "timestamp": "2025-02-01T00:00:01Z",
                    "type": "response_item",
                    "payload": { "type": "message", "role": "assistant", "content": [{ "type": "output_text", "text": format!("reply {i}") }] }
                })
            ));
        }
        fs::write(&path, body).expect("write");
        let settings = SummarizeSettings {
            many_messages_bytes: 1_024,
            head_window_bytes: 2_048,
            tail_window_bytes: 512,
            ..SummarizeSettings::default()
        };
        let mut index = SourceIndexer::new(
            SourceKind::Codex,
            root.to_path_buf(),
            settings,
            Arc::new(TranscriptCache::new(4, u64::MAX)),
        )
        .with_count_reconciliation(reconcile);
        index.refresh().expect("refresh");
        (index, SessionKey::for_log_path(SourceKind::Codex, &path))
    }

    #[test]
    fn estimated_count_persists_after_hydration_by_default() {
        let temp = tempdir().expect("tempdir");
        let (mut index, key) = large_index(temp.path(), false);
        assert!(index.summary(&key).expect("summary").message_count.is_estimate());

        index.hydrate(&key).expect("hydrate");
        let summary = index.summary(&key).expect("summary");
        assert!(summary.message_count.is_estimate());
        assert!(summary.size_label.is_some());
    }

    #[test]
    fn reconciliation_replaces_estimate_with_exact_count() {
        let temp = tempdir().expect("tempdir");
        let (mut index, key) = large_index(temp.path(), true);

        let transcript = index.hydrate(&key).expect("hydrate");
        let summary = index.summary(&key).expect("summary");
        assert_eq!(summary.message_count, MessageCount::Exact(201));
        assert_eq!(transcript.message_count(), 201);
        assert!(summary.many_messages);
        assert_eq!(summary.size_label, None);
    }
}
