use crate::domain::{SessionSummary, SourceKind, Transcript, UnifiedCollection};
use std::sync::Arc;
use time::Date;
use time::macros::format_description;

const DAY_MS: i64 = 86_400_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TextTerm {
    Word(String),
    Phrase(String),
}

impl TextTerm {
    fn needle(&self) -> &str {
        match self {
            Self::Word(text) | Self::Phrase(text) => text,
        }
    }
}

/// Structured predicates. Operands are stored lowercased.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Filter {
    Repo(String),
    Path(String),
    Model(String),
    Branch(String),
    Source(SourceKind),
    /// Started at or after this instant (inclusive).
    After(i64),
    /// Started strictly before this instant.
    Before(i64),
    On { start_ms: i64, end_ms: i64 },
}

impl Filter {
    pub fn matches(&self, summary: &SessionSummary) -> bool {
        match self {
            Self::Repo(operand) => {
                summary
                    .repo
                    .as_ref()
                    .is_some_and(|repo| repo.to_lowercase().contains(operand.as_str()))
                    || summary.cwd.as_ref().is_some_and(|cwd| {
                        cwd.components().any(|component| {
                            component.as_os_str().to_string_lossy().to_lowercase() == *operand
                        })
                    })
            }
            Self::Path(operand) => summary.cwd.as_ref().is_some_and(|cwd| {
                cwd.to_string_lossy().to_lowercase().contains(operand.as_str())
            }),
            Self::Model(operand) => summary
                .models
                .iter()
                .any(|model| model.to_lowercase() == *operand),
            Self::Branch(operand) => summary
                .git_branch
                .as_ref()
                .is_some_and(|branch| branch.to_lowercase().contains(operand.as_str())),
            Self::Source(source) => summary.source() == *source,
            Self::After(ms) => summary.started_at_ms >= *ms,
            Self::Before(ms) => summary.started_at_ms < *ms,
            Self::On { start_ms, end_ms } => {
                summary.started_at_ms >= *start_ms && summary.started_at_ms < *end_ms
            }
        }
    }
}

/// A parsed query: structured filters are ANDed together, free-text terms are ORed, and any
/// excluded term rules a session out.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Query {
    pub raw: String,
    pub terms: Vec<TextTerm>,
    pub excluded: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.excluded.is_empty() && self.filters.is_empty()
    }

    pub fn has_text(&self) -> bool {
        !self.terms.is_empty() || !self.excluded.is_empty()
    }

    pub fn matches_filters(&self, summary: &SessionSummary) -> bool {
        self.filters.iter().all(|filter| filter.matches(summary))
    }

    /// Cheap match: filters plus free text against summary fields only.
    pub fn matches_summary(&self, summary: &SessionSummary) -> bool {
        if !self.matches_filters(summary) {
            return false;
        }
        if !self.has_text() {
            return true;
        }
        let fields = summary_text_fields(summary);
        self.text_matches(fields.iter().map(String::as_str))
    }

    /// Deep match: filters plus free text against summary fields and every transcript event.
    pub fn matches_transcript(&self, summary: &SessionSummary, transcript: &Transcript) -> bool {
        if !self.matches_filters(summary) {
            return false;
        }
        if !self.has_text() {
            return true;
        }
        let fields = summary_text_fields(summary);
        let events = transcript.events.iter().flat_map(|event| {
            std::iter::once(event.text.as_str()).chain(event.tool_name.as_deref())
        });
        self.text_matches(fields.iter().map(String::as_str).chain(events))
    }

    fn text_matches<'a>(&self, segments: impl Iterator<Item = &'a str>) -> bool {
        let mut hit = self.terms.is_empty();
        for segment in segments {
            let lower = segment.to_lowercase();
            if self
                .excluded
                .iter()
                .any(|term| lower.contains(term.as_str()))
            {
                return false;
            }
            if !hit && self.terms.iter().any(|term| lower.contains(term.needle())) {
                hit = true;
                if self.excluded.is_empty() {
                    return true;
                }
            }
        }
        hit
    }
}

/// User-visible metadata only. The session key is internal and never matches free text.
fn summary_text_fields(summary: &SessionSummary) -> Vec<String> {
    let mut fields = vec![summary.title.clone()];
    fields.extend(summary.native_id.clone());
    fields.extend(summary.cwd.as_ref().map(|cwd| cwd.display().to_string()));
    fields.extend(summary.git_branch.clone());
    fields.extend(summary.models.iter().cloned());
    fields
}

struct Token {
    text: String,
    quoted: bool,
}

/// Splits on whitespace outside double quotes. A token that opens with a quote is a phrase.
fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    let mut flush = |current: &mut String, quoted: &mut bool| {
        if !current.trim().is_empty() {
            tokens.push(Token {
                text: std::mem::take(current),
                quoted: *quoted,
            });
        }
        current.clear();
        *quoted = false;
    };

    for ch in raw.chars() {
        match ch {
            '"' => {
                if !in_quotes && current.is_empty() {
                    quoted = true;
                }
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => flush(&mut current, &mut quoted),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut quoted);
    tokens
}

/// Never fails: anything that does not form a valid operator stays as literal free text.
pub fn parse_query(raw: &str) -> Query {
    let mut query = Query {
        raw: raw.to_string(),
        ..Query::default()
    };

    for token in tokenize(raw) {
        let lower = token.text.trim().to_lowercase();
        if token.quoted {
            query.terms.push(TextTerm::Phrase(lower));
            continue;
        }
        if let Some(rest) = lower.strip_prefix('-').filter(|rest| !rest.is_empty()) {
            query.excluded.push(rest.to_string());
            continue;
        }
        if let Some(filter) = lower
            .split_once(':')
            .and_then(|(key, value)| parse_filter(key, value))
        {
            query.filters.push(filter);
            continue;
        }
        query.terms.push(TextTerm::Word(lower));
    }

    query
}

fn parse_filter(key: &str, value: &str) -> Option<Filter> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match key {
        "repo" | "project" => Some(Filter::Repo(value.to_string())),
        "path" | "cwd" | "dir" => Some(Filter::Path(value.to_string())),
        "model" => Some(Filter::Model(value.to_string())),
        "branch" => Some(Filter::Branch(value.to_string())),
        "source" | "agent" => SourceKind::from_tag(value).map(Filter::Source),
        "after" | "since" => parse_day_start_ms(value).map(Filter::After),
        "before" | "until" => parse_day_start_ms(value).map(Filter::Before),
        "on" | "date" => parse_day_start_ms(value).map(|start_ms| Filter::On {
            start_ms,
            end_ms: start_ms + DAY_MS,
        }),
        _ => None,
    }
}

fn parse_day_start_ms(value: &str) -> Option<i64> {
    let date = Date::parse(value, format_description!("[year]-[month]-[day]")).ok()?;
    Some(date.midnight().assume_utc().unix_timestamp() * 1_000)
}

/// Restartable, lazily advancing evaluation of a query over one collection snapshot.
#[derive(Clone, Debug)]
pub struct SearchCursor {
    query: Arc<Query>,
    collection: Arc<UnifiedCollection>,
    position: usize,
}

pub fn evaluate(query: Arc<Query>, collection: Arc<UnifiedCollection>) -> SearchCursor {
    SearchCursor {
        query,
        collection,
        position: 0,
    }
}

impl SearchCursor {
    pub fn query(&self) -> &Arc<Query> {
        &self.query
    }

    pub fn collection(&self) -> &Arc<UnifiedCollection> {
        &self.collection
    }

    pub fn next_batch(&mut self, limit: usize) -> Vec<Arc<SessionSummary>> {
        self.by_ref().take(limit).collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.collection.len()
    }

    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for SearchCursor {
    type Item = Arc<SessionSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(session) = self.collection.at(self.position) {
            self.position += 1;
            if self.query.matches_summary(&session.summary) {
                return Some(Arc::clone(&session.summary));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merge::tests::summary;
    use crate::domain::{
        EventKind, FileFingerprint, SessionEvent, SourceFields, merge,
    };
    use std::path::PathBuf;

    #[test]
    fn parses_operators_words_and_phrases() {
        let query = parse_query(r#"repo:Codex-History model:GPT-5 "exact phrase" error -flaky"#);
        assert_eq!(
            query.filters,
            vec![
                Filter::Repo("codex-history".to_string()),
                Filter::Model("gpt-5".to_string()),
            ]
        );
        assert_eq!(
            query.terms,
            vec![
                TextTerm::Phrase("exact phrase".to_string()),
                TextTerm::Word("error".to_string()),
            ]
        );
        assert_eq!(query.excluded, vec!["flaky".to_string()]);
    }

    #[test]
    fn unknown_or_invalid_operators_fall_back_to_free_text() {
        let query = parse_query("foo:bar after:yesterday source:gemini repo: http://x");
        assert!(query.filters.is_empty());
        assert_eq!(
            query.terms,
            vec![
                TextTerm::Word("foo:bar".to_string()),
                TextTerm::Word("after:yesterday".to_string()),
                TextTerm::Word("source:gemini".to_string()),
                TextTerm::Word("repo:".to_string()),
                TextTerm::Word("http://x".to_string()),
            ]
        );
    }

    #[test]
    fn quoted_operands_keep_spaces() {
        let query = parse_query(r#"path:"My Projects/app""#);
        assert_eq!(query.filters, vec![Filter::Path("my projects/app".to_string())]);
        assert!(query.terms.is_empty());
    }

    #[test]
    fn date_operators_cover_whole_days() {
        let query = parse_query("on:2025-01-01");
        assert_eq!(
            query.filters,
            vec![Filter::On {
                start_ms: 1_735_689_600_000,
                end_ms: 1_735_776_000_000,
            }]
        );

        let inside = summary(SourceKind::Codex, "a", 1_735_689_600_000 + 1_000);
        let next_day = summary(SourceKind::Codex, "b", 1_735_776_000_000);
        assert!(query.matches_summary(&inside));
        assert!(!query.matches_summary(&next_day));

        let range = parse_query("after:2025-01-01 before:2025-01-02");
        assert!(range.matches_summary(&inside));
        assert!(!range.matches_summary(&next_day));
    }

    #[test]
    fn repo_matches_name_or_any_cwd_component() {
        let mut nested = summary(SourceKind::Codex, "x", 1);
        nested.cwd = Some(PathBuf::from("/Users/me/Codex-History/app"));
        nested.repo = Some("app".to_string());
        let other = summary(SourceKind::Codex, "y", 1);

        let query = parse_query("repo:codex-history");
        assert!(query.matches_summary(&nested));
        assert!(!query.matches_summary(&other));
    }

    #[test]
    fn free_text_terms_are_ored_and_exclusions_win() {
        let alpha = summary(SourceKind::Codex, "alpha", 1);
        let beta = summary(SourceKind::Claude, "beta", 1);

        let either = parse_query("alpha beta");
        assert!(either.matches_summary(&alpha));
        assert!(either.matches_summary(&beta));

        let phrase = parse_query(r#""alpha beta""#);
        assert!(!phrase.matches_summary(&alpha));

        let excluded = parse_query("alpha -work/alpha");
        assert!(!excluded.matches_summary(&alpha));
    }

    #[test]
    fn free_text_ignores_the_internal_session_key() {
        let plain = summary(SourceKind::Codex, "plain", 1);
        assert!(!parse_query("codex").matches_summary(&plain));

        let fragment = &plain.key.id[..8];
        assert!(!parse_query(fragment).matches_summary(&plain));
        assert!(!parse_query(&plain.key.to_string()).matches_summary(&plain));

        assert!(parse_query("source:codex").matches_summary(&plain));
        assert!(parse_query("plain").matches_summary(&plain));
    }

    #[test]
    fn transcript_match_searches_event_text() {
        let target = summary(SourceKind::Claude, "t", 1);
        let transcript = Transcript {
            key: target.key.clone(),
            fingerprint: FileFingerprint {
                size_bytes: 0,
                modified: None,
            },
            events: vec![SessionEvent {
                kind: EventKind::Assistant,
                line_no: 1,
                timestamp_ms: None,
                text: "Found a Segmentation Fault in parser".to_string(),
                tool_name: None,
                fields: SourceFields::Claude {
                    uuid: None,
                    call_id: None,
                    sidechain: false,
                },
            }],
            malformed_lines: 0,
            pending_tail: false,
        };

        assert!(parse_query("segmentation").matches_transcript(&target, &transcript));
        assert!(!parse_query("segmentation").matches_summary(&target));
        assert!(!parse_query("source:codex segmentation").matches_transcript(&target, &transcript));
        assert!(!parse_query("segmentation -parser").matches_transcript(&target, &transcript));
    }

    #[test]
    fn cursor_yields_bounded_batches_and_restarts() {
        let codex = (0..5)
            .map(|i| Arc::new(summary(SourceKind::Codex, &format!("s{i}"), i)))
            .collect::<Vec<_>>();
        let collection = Arc::new(merge(&codex, &[]));
        let mut cursor = evaluate(Arc::new(parse_query("source:codex")), collection);

        assert_eq!(cursor.next_batch(2).len(), 2);
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.next_batch(10).len(), 3);
        assert!(cursor.is_exhausted());
        assert!(cursor.next_batch(10).is_empty());

        cursor.restart();
        let titles = cursor.map(|s| s.title.clone()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["s4", "s3", "s2", "s1", "s0"]);
    }
}
