use crate::domain::{SessionKey, SessionSummary, SourceKind};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnifiedSession {
    pub summary: Arc<SessionSummary>,
    pub display_source: &'static str,
}

/// Both sources' sessions in one list, most recent first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnifiedCollection {
    sessions: Vec<UnifiedSession>,
}

impl UnifiedCollection {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnifiedSession> {
        self.sessions.iter()
    }

    pub fn at(&self, index: usize) -> Option<&UnifiedSession> {
        self.sessions.get(index)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Arc<SessionSummary>> {
        self.sessions
            .iter()
            .find(|session| &session.summary.key == key)
            .map(|session| &session.summary)
    }

    pub fn summaries(&self) -> Vec<Arc<SessionSummary>> {
        self.sessions
            .iter()
            .map(|session| Arc::clone(&session.summary))
            .collect()
    }

    /// A new collection with only the sessions `keep` accepts; order is preserved.
    pub fn filtered(&self, keep: impl Fn(&SessionSummary) -> bool) -> UnifiedCollection {
        UnifiedCollection {
            sessions: self
                .sessions
                .iter()
                .filter(|session| keep(&session.summary))
                .cloned()
                .collect(),
        }
    }

    pub fn count_by_source(&self, source: SourceKind) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.summary.source() == source)
            .count()
    }
}

/// Start time descending; ties broken by source, then identifier, so re-renders keep order.
pub fn compare_sessions(a: &SessionSummary, b: &SessionSummary) -> Ordering {
    b.started_at_ms
        .cmp(&a.started_at_ms)
        .then_with(|| a.key.source.cmp(&b.key.source))
        .then_with(|| a.key.id.cmp(&b.key.id))
}

/// Concatenates both sources' summaries. The two agents write disjoint file sets, so
/// nothing is reconciled across sources.
pub fn merge(
    codex: &[Arc<SessionSummary>],
    claude: &[Arc<SessionSummary>],
) -> UnifiedCollection {
    let mut sessions = codex
        .iter()
        .chain(claude.iter())
        .map(|summary| UnifiedSession {
            display_source: summary.source().label(),
            summary: Arc::clone(summary),
        })
        .collect::<Vec<_>>();
    sessions.sort_by(|a, b| compare_sessions(&a.summary, &b.summary));
    UnifiedCollection { sessions }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepoSummary {
    pub name: String,
    pub cwd: PathBuf,
    pub sessions: Vec<Arc<SessionSummary>>,
    pub last_started_ms: i64,
}

/// Groups sessions by working directory, most recently active group first.
pub fn index_repos(collection: &UnifiedCollection) -> Vec<RepoSummary> {
    let mut grouped: BTreeMap<PathBuf, Vec<Arc<SessionSummary>>> = BTreeMap::new();
    for session in collection.iter() {
        let Some(cwd) = session.summary.cwd.clone() else {
            continue;
        };
        grouped
            .entry(cwd)
            .or_default()
            .push(Arc::clone(&session.summary));
    }

    let mut repos = grouped
        .into_iter()
        .map(|(cwd, sessions)| RepoSummary {
            name: super::repo_name_from_cwd(&cwd).unwrap_or_else(|| cwd.display().to_string()),
            last_started_ms: sessions
                .iter()
                .map(|session| session.started_at_ms)
                .max()
                .unwrap_or(0),
            cwd,
            sessions,
        })
        .collect::<Vec<_>>();

    repos.sort_by(|a, b| {
        b.last_started_ms
            .cmp(&a.last_started_ms)
            .then_with(|| a.cwd.cmp(&b.cwd))
    });
    repos
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{FileFingerprint, MessageCount, SummaryStatus};

    pub(crate) fn summary(source: SourceKind, name: &str, started_at_ms: i64) -> SessionSummary {
        let log_path = PathBuf::from(format!("/logs/{name}.jsonl"));
        SessionSummary {
            key: SessionKey::for_log_path(source, &log_path),
            native_id: Some(name.to_string()),
            log_path,
            title: name.to_string(),
            started_at_ms,
            last_activity_ms: None,
            cwd: Some(PathBuf::from(format!("/work/{name}"))),
            repo: Some(name.to_string()),
            git_branch: None,
            models: Vec::new(),
            message_count: MessageCount::Exact(1),
            file_size_bytes: 10,
            fingerprint: FileFingerprint {
                size_bytes: 10,
                modified: None,
            },
            many_messages: false,
            size_label: None,
            preamble_detected: false,
            status: SummaryStatus::Ok,
        }
    }

    #[test]
    fn merge_orders_most_recent_first_across_sources() {
        let codex = vec![
            Arc::new(summary(SourceKind::Codex, "old", 100)),
            Arc::new(summary(SourceKind::Codex, "new", 300)),
        ];
        let claude = vec![Arc::new(summary(SourceKind::Claude, "mid", 200))];

        let merged = merge(&codex, &claude);
        let titles = merged
            .iter()
            .map(|session| session.summary.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["new", "mid", "old"]);
        assert_eq!(merged.at(1).map(|s| s.display_source), Some("Claude"));
        assert_eq!(merged.count_by_source(SourceKind::Codex), 2);
    }

    #[test]
    fn ties_break_by_source_then_identifier() {
        let a = Arc::new(summary(SourceKind::Claude, "a", 100));
        let b = Arc::new(summary(SourceKind::Codex, "b", 100));
        let c = Arc::new(summary(SourceKind::Codex, "c", 100));

        let first = merge(&[Arc::clone(&c), Arc::clone(&b)], &[Arc::clone(&a)]);
        let second = merge(&[Arc::clone(&b), Arc::clone(&c)], &[Arc::clone(&a)]);
        assert_eq!(first, second);
        assert_eq!(
            first.at(2).map(|s| s.summary.source()),
            Some(SourceKind::Claude)
        );
    }

    #[test]
    fn same_native_id_in_both_sources_is_not_deduplicated() {
        let codex = vec![Arc::new(summary(SourceKind::Codex, "same", 1))];
        let claude = vec![Arc::new(summary(SourceKind::Claude, "same", 1))];
        assert_eq!(merge(&codex, &claude).len(), 2);
    }

    #[test]
    fn repos_group_by_cwd() {
        let mut one = summary(SourceKind::Codex, "x", 100);
        one.cwd = Some(PathBuf::from("/work/app"));
        let mut two = summary(SourceKind::Claude, "y", 500);
        two.cwd = Some(PathBuf::from("/work/app"));
        let three = summary(SourceKind::Codex, "z", 300);

        let merged = merge(&[Arc::new(one), Arc::new(three)], &[Arc::new(two)]);
        let repos = index_repos(&merged);
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "app");
        assert_eq!(repos[0].sessions.len(), 2);
        assert_eq!(repos[1].name, "z");
    }
}
