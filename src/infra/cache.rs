use crate::domain::{FileFingerprint, SessionKey, Transcript};
use lru::LruCache;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    /// Requests that waited on another caller's in-flight load.
    pub joined: u64,
}

struct CachedTranscript {
    fingerprint: FileFingerprint,
    transcript: Arc<Transcript>,
    bytes: u64,
    /// Value of `CacheState::inserts` when this entry was stored.
    inserted: u64,
}

struct CacheState {
    entries: LruCache<SessionKey, CachedTranscript>,
    bytes: u64,
    in_flight: HashSet<SessionKey>,
    inserts: u64,
    stats: CacheStats,
}

impl CacheState {
    fn lookup(&mut self, key: &SessionKey, fingerprint: FileFingerprint) -> Option<Arc<Transcript>> {
        self.entries
            .get(key)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| Arc::clone(&entry.transcript))
    }

    /// The entry a load finished after `since` produced, whatever fingerprint it recorded.
    fn inserted_after(&mut self, key: &SessionKey, since: u64) -> Option<Arc<Transcript>> {
        self.entries
            .get(key)
            .filter(|entry| entry.inserted > since)
            .map(|entry| Arc::clone(&entry.transcript))
    }

    fn remove(&mut self, key: &SessionKey) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.bytes = self.bytes.saturating_sub(entry.bytes);
                true
            }
            None => false,
        }
    }
}

/// Hydrated transcripts keyed by session and file fingerprint, bounded by entry count and
/// approximate bytes. Loads are single-flight per session.
pub struct TranscriptCache {
    state: Mutex<CacheState>,
    loaded: Condvar,
    max_entries: usize,
    max_bytes: u64,
}

impl std::fmt::Debug for TranscriptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptCache")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl TranscriptCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                bytes: 0,
                in_flight: HashSet::new(),
                inserts: 0,
                stats: CacheStats::default(),
            }),
            loaded: Condvar::new(),
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached transcript when its fingerprint matches, otherwise runs `load`.
    /// Concurrent callers for the same key wait for the first caller's load instead of reading
    /// the file again, and take its result even when the file grew while it was being read.
    pub fn get_or_load<E>(
        &self,
        key: &SessionKey,
        fingerprint: FileFingerprint,
        load: impl FnOnce() -> Result<Transcript, E>,
    ) -> Result<Arc<Transcript>, E> {
        let mut guard = self.lock();
        let mut joined_at: Option<u64> = None;
        loop {
            let state = &mut *guard;
            if let Some(hit) = state.lookup(key, fingerprint) {
                if joined_at.is_none() {
                    state.stats.hits += 1;
                }
                return Ok(hit);
            }
            if let Some(since) = joined_at
                && let Some(shared) = state.inserted_after(key, since)
            {
                return Ok(shared);
            }
            if !state.in_flight.contains(key) {
                break;
            }
            if joined_at.is_none() {
                state.stats.joined += 1;
                joined_at = Some(state.inserts);
            }
            guard = self
                .loaded
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }

        guard.stats.misses += 1;
        guard.in_flight.insert(key.clone());
        drop(guard);

        let _in_flight = InFlight { cache: self, key };
        let transcript = Arc::new(load()?);

        let mut guard = self.lock();
        guard.stats.loads += 1;
        self.insert_locked(&mut guard, key.clone(), Arc::clone(&transcript));
        drop(guard);

        tracing::debug!(session = %key, events = transcript.events.len(), "hydrated transcript");
        Ok(transcript)
    }

    fn insert_locked(&self, state: &mut CacheState, key: SessionKey, transcript: Arc<Transcript>) {
        state.remove(&key);
        state.inserts += 1;
        let bytes = transcript.approx_bytes();
        state.entries.push(
            key,
            CachedTranscript {
                fingerprint: transcript.fingerprint,
                transcript,
                bytes,
                inserted: state.inserts,
            },
        );
        state.bytes += bytes;

        // The newest entry always stays, even when it alone exceeds the byte budget.
        while state.entries.len() > 1
            && (state.entries.len() > self.max_entries || state.bytes > self.max_bytes)
        {
            let Some((evicted, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.bytes = state.bytes.saturating_sub(entry.bytes);
            state.stats.evictions += 1;
            tracing::debug!(session = %evicted, bytes = entry.bytes, "evicted transcript");
        }
    }

    pub fn invalidate(&self, key: &SessionKey) -> bool {
        self.lock().remove(key)
    }

    /// Whether a transcript for this exact file state is cached. Does not touch recency.
    pub fn contains(&self, key: &SessionKey, fingerprint: FileFingerprint) -> bool {
        self.lock()
            .entries
            .peek(key)
            .is_some_and(|entry| entry.fingerprint == fingerprint)
    }

    pub fn peek(&self, key: &SessionKey) -> Option<Arc<Transcript>> {
        self.lock()
            .entries
            .peek(key)
            .map(|entry| Arc::clone(&entry.transcript))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> u64 {
        self.lock().bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

struct InFlight<'a> {
    cache: &'a TranscriptCache,
    key: &'a SessionKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.cache.lock().in_flight.remove(self.key);
        self.cache.loaded.notify_all();
    }
}
