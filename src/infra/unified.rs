use crate::domain::{SessionKey, SessionSummary, SourceKind, Transcript, UnifiedCollection, merge};
use crate::infra::{
    HydrateError, IndexError, RefreshReport, ScanOutcome, Settings, SourceIndexer,
    TranscriptCache, hydrate_session,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct UnifiedRefresh {
    pub collection: Arc<UnifiedCollection>,
    pub reports: Vec<(SourceKind, RefreshReport)>,
    /// Directory-level failures, joined for display. Per-file problems never show up here.
    pub notice: Option<String>,
}

impl UnifiedRefresh {
    pub fn changed(&self) -> bool {
        self.reports.iter().any(|(_, report)| report.changed())
    }
}

/// Both source indexers behind one collection and one transcript cache.
#[derive(Debug)]
pub struct UnifiedIndexer {
    codex: SourceIndexer,
    claude: SourceIndexer,
    cache: Arc<TranscriptCache>,
    collection: Arc<UnifiedCollection>,
}

impl UnifiedIndexer {
    pub fn new(settings: &Settings) -> Self {
        let cache = Arc::new(TranscriptCache::new(
            settings.cache_max_entries,
            settings.cache_max_bytes,
        ));
        let indexer = |source: SourceKind| {
            SourceIndexer::new(
                source,
                settings.root_for(source).to_path_buf(),
                settings.summarize,
                Arc::clone(&cache),
            )
            .with_count_reconciliation(settings.reconcile_counts_on_hydrate)
        };
        let codex = indexer(SourceKind::Codex);
        let claude = indexer(SourceKind::Claude);
        Self {
            codex,
            claude,
            cache,
            collection: Arc::new(UnifiedCollection::default()),
        }
    }

    pub fn indexer(&self, source: SourceKind) -> &SourceIndexer {
        match source {
            SourceKind::Codex => &self.codex,
            SourceKind::Claude => &self.claude,
        }
    }

    pub fn indexer_mut(&mut self, source: SourceKind) -> &mut SourceIndexer {
        match source {
            SourceKind::Codex => &mut self.codex,
            SourceKind::Claude => &mut self.claude,
        }
    }

    pub fn cache(&self) -> &Arc<TranscriptCache> {
        &self.cache
    }

    /// The current merged snapshot. Never mutated after publication.
    pub fn sessions(&self) -> Arc<UnifiedCollection> {
        Arc::clone(&self.collection)
    }

    pub fn summary(&self, key: &SessionKey) -> Option<Arc<SessionSummary>> {
        self.indexer(key.source).summary(key)
    }

    /// Resolves a session to its log file; opening it is left to the caller.
    pub fn reveal_path(&self, key: &SessionKey) -> Option<PathBuf> {
        self.indexer(key.source)
            .path_for(key)
            .map(|path| path.to_path_buf())
    }

    pub fn refresh(&mut self) -> UnifiedRefresh {
        let results = SourceKind::ALL
            .into_iter()
            .map(|source| {
                let result = self.indexer_mut(source).refresh();
                (source, result)
            })
            .collect::<Vec<_>>();
        self.finish_refresh(results)
    }

    pub fn refresh_paths(&mut self, source: SourceKind, paths: Vec<PathBuf>) -> UnifiedRefresh {
        let result = self.indexer_mut(source).refresh_paths(paths);
        self.finish_refresh(vec![(source, result)])
    }

    /// Applies scans that ran elsewhere (see `SourceIndexer::scan_job`).
    pub fn apply_scans(
        &mut self,
        scans: Vec<(SourceKind, Result<ScanOutcome, IndexError>)>,
    ) -> UnifiedRefresh {
        let results = scans
            .into_iter()
            .map(|(source, scan)| {
                let result = scan.map(|outcome| self.indexer_mut(source).apply(outcome));
                (source, result)
            })
            .collect::<Vec<_>>();
        self.finish_refresh(results)
    }

    fn finish_refresh(
        &mut self,
        results: Vec<(SourceKind, Result<RefreshReport, IndexError>)>,
    ) -> UnifiedRefresh {
        let mut reports = Vec::new();
        let mut notices = Vec::new();
        for (source, result) in results {
            match result {
                Ok(report) => reports.push((source, report)),
                Err(error) => {
                    tracing::warn!(%error, "refresh failed");
                    notices.push(error.to_string());
                }
            }
        }

        let changed = reports.iter().any(|(_, report)| report.changed());
        let collection = if changed {
            self.republish()
        } else {
            self.sessions()
        };
        UnifiedRefresh {
            collection,
            reports,
            notice: join_notices(notices),
        }
    }

    pub fn republish(&mut self) -> Arc<UnifiedCollection> {
        self.collection = Arc::new(merge(&self.codex.summaries(), &self.claude.summaries()));
        self.sessions()
    }

    pub fn hydrate(&mut self, key: &SessionKey) -> Result<Arc<Transcript>, HydrateError> {
        let summary = self
            .summary(key)
            .ok_or_else(|| HydrateError::UnknownSession(key.clone()))?;
        let transcript = hydrate_session(&self.cache, &summary)?;
        self.reconcile(&transcript);
        Ok(transcript)
    }

    /// Applies count reconciliation for a transcript hydrated elsewhere, when enabled.
    /// Returns whether a new collection was published.
    pub fn reconcile(&mut self, transcript: &Transcript) -> bool {
        let indexer = self.indexer_mut(transcript.key.source);
        if !indexer.reconciles_on_hydrate() || !indexer.reconcile_counts(transcript) {
            return false;
        }
        self.republish();
        true
    }
}

pub fn join_notices(notices: Vec<String>) -> Option<String> {
    let text = notices
        .into_iter()
        .map(|notice| notice.trim().to_string())
        .filter(|notice| !notice.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn settings(root: &Path) -> Settings {
        Settings::with_roots(root.join("codex"), root.join("claude"))
    }

    fn write_codex(root: &Path, name: &str, ts: &str) -> PathBuf {
        let path = root.join("codex").join(format!("{name}.jsonl"));
        let line = serde_json::json!({
            "timestamp": ts,
            "type": "session_meta",
            "payload": { "id": name, "timestamp": ts, "cwd": "/w/x" }
        });
        fs::write(&path, format!("{line}\n")).expect("write");
        path
    }

    fn write_claude(root: &Path, name: &str, ts: &str) -> PathBuf {
        let dir = root.join("claude").join("-w-x");
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(format!("{name}.jsonl"));
        let line = serde_json::json!({
            "type": "user",
            "sessionId": name,
            "timestamp": ts,
            "message": { "content": "hello" }
        });
        fs::write(&path, format!("{line}\n")).expect("write");
        path
    }

    #[test]
    fn refresh_merges_both_sources_newest_first() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("codex")).expect("mkdir");
        write_codex(temp.path(), "older", "2025-01-01T00:00:00Z");
        let newer = write_claude(temp.path(), "newer", "2025-03-01T00:00:00Z");

        let mut index = UnifiedIndexer::new(&settings(temp.path()));
        let refresh = index.refresh();
        assert!(refresh.notice.is_none());
        assert_eq!(refresh.collection.len(), 2);
        let first = refresh.collection.at(0).expect("first");
        assert_eq!(first.display_source, "Claude");

        let key = first.summary.key.clone();
        assert_eq!(index.reveal_path(&key), Some(newer));

        let again = index.refresh();
        assert!(!again.changed());
        assert!(Arc::ptr_eq(&refresh.collection, &again.collection));
    }

    #[test]
    fn one_missing_root_is_a_notice_and_the_other_source_still_loads() {
        let temp = tempdir().expect("tempdir");
        write_claude(temp.path(), "only", "2025-03-01T00:00:00Z");

        let mut index = UnifiedIndexer::new(&settings(temp.path()));
        let refresh = index.refresh();
        assert_eq!(refresh.collection.len(), 1);
        let notice = refresh.notice.expect("notice");
        assert!(notice.contains("Codex sessions directory unreadable"));
    }

    #[test]
    fn join_notices_skips_blank_entries() {
        assert_eq!(
            join_notices(vec!["a".to_string(), "  ".to_string(), "b".to_string()]),
            Some("a | b".to_string())
        );
        assert_eq!(join_notices(Vec::new()), None);
    }
}
