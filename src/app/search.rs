use crate::domain::{Query, SessionSummary, UnifiedCollection};
use crate::infra::{TranscriptCache, hydrate_session};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonically increasing per `search` call. Results carry the token they answer.
pub type QueryToken = u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchPhase {
    /// Filters and summary text only.
    Quick,
    /// Full transcript text, after hydration.
    Deep,
}

#[derive(Clone, Debug)]
pub struct SearchUpdate {
    pub token: QueryToken,
    pub phase: SearchPhase,
    /// Replaces earlier results for this token instead of extending them.
    pub first_page: bool,
    pub sessions: Vec<Arc<SessionSummary>>,
    /// No further pages exist for this phase.
    pub complete: bool,
}

/// Consumer-side view of the newest query's results. Updates for older tokens are dropped.
#[derive(Clone, Debug, Default)]
pub struct LatestResults {
    token: QueryToken,
    phase: Option<SearchPhase>,
    sessions: Vec<Arc<SessionSummary>>,
    complete: bool,
}

impl LatestResults {
    pub fn token(&self) -> QueryToken {
        self.token
    }

    pub fn phase(&self) -> Option<SearchPhase> {
        self.phase
    }

    pub fn sessions(&self) -> &[Arc<SessionSummary>] {
        &self.sessions
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Starts waiting for `token`, discarding anything older.
    pub fn expect(&mut self, token: QueryToken) {
        if token > self.token {
            *self = Self {
                token,
                ..Self::default()
            };
        }
    }

    /// Returns whether the update was applied.
    pub fn accept(&mut self, update: SearchUpdate) -> bool {
        if update.token < self.token {
            tracing::debug!(token = update.token, current = self.token, "dropping stale results");
            return false;
        }
        self.expect(update.token);

        match update.phase {
            SearchPhase::Quick => {
                // Deep results cover everything a later quick page could add. A first page
                // means the search was rerun against a newer collection, so it starts over.
                if self.phase == Some(SearchPhase::Deep) && !update.first_page {
                    return false;
                }
                if update.first_page {
                    self.sessions = update.sessions;
                } else {
                    self.sessions.extend(update.sessions);
                }
            }
            SearchPhase::Deep => self.sessions = update.sessions,
        }
        self.phase = Some(update.phase);
        self.complete = update.complete;
        true
    }
}

/// Coalesces bursts of triggers: due `delay` after the last trigger, or `max_delay` after the
/// first one when triggers keep arriving.
#[derive(Clone, Debug)]
pub struct Debounce {
    delay: Duration,
    max_delay: Option<Duration>,
    first_change_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            delay,
            max_delay,
            first_change_at: None,
            deadline: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
        if self.first_change_at.is_none() {
            self.first_change_at = Some(now);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        let due_by_debounce = self.deadline.is_some_and(|due| now >= due);
        let due_by_max_delay = match (self.first_change_at, self.max_delay) {
            (Some(first), Some(max_delay)) => now.duration_since(first) >= max_delay,
            _ => false,
        };
        due_by_debounce || due_by_max_delay
    }

    pub fn next_wake(&self) -> Option<Instant> {
        let deadline = self.deadline?;
        let ceiling = self
            .first_change_at
            .zip(self.max_delay)
            .map(|(first, max_delay)| first + max_delay);
        Some(ceiling.map_or(deadline, |ceiling| ceiling.min(deadline)))
    }

    pub fn clear(&mut self) {
        self.first_change_at = None;
        self.deadline = None;
    }
}

/// Evaluates `query` against full transcripts, hydrating candidates through the shared cache.
/// Cancellation is checked before each session; `None` means the search was superseded.
pub fn run_deep_search(
    query: &Query,
    collection: &UnifiedCollection,
    cache: &TranscriptCache,
    is_cancelled: impl Fn() -> bool,
) -> Option<Vec<Arc<SessionSummary>>> {
    let mut matches = Vec::new();
    for session in collection.iter() {
        if is_cancelled() {
            return None;
        }
        let summary = &session.summary;
        if !query.matches_filters(summary) {
            continue;
        }
        // Without exclusions a summary hit is final; no need to read the file.
        if query.excluded.is_empty() && query.matches_summary(summary) {
            matches.push(Arc::clone(summary));
            continue;
        }
        if summary.is_unreadable() {
            continue;
        }

        match hydrate_session(cache, summary) {
            Ok(transcript) => {
                if query.matches_transcript(summary, &transcript) {
                    matches.push(Arc::clone(summary));
                }
            }
            Err(error) => {
                tracing::debug!(session = %summary.key, %error, "skipping session in deep search");
            }
        }
    }
    Some(matches)
}
