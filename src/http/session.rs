//! Session container with lazy, rate-limited cleanup, spec §4.4/§5.
//!
//! Supplements the distilled spec from `examples/original_source/include/fastcgi++/http.hpp`
//! (`Sessions<T>`). The original's cleanup walks entries comparing `it->first.timestamp`,
//! but `timestamp` isn't a member of the session-id key type in that header — an
//! irreconcilable ambiguity the spec calls out as an open question. This implementation
//! resolves it the only way that type-checks: the access timestamp lives on the session
//! *value* (`Session<T>::last_access`), not the id, and cleanup compares that.

use crate::encode::{base64_decode, base64_encode};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// An opaque 24-byte session identifier, spec §3. Rendered as base64 for use in a cookie
/// value, via the crate's own codec (`crate::encode`) rather than a hex ad hoc format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 24]);

impl SessionId {
    pub fn from_bytes(bytes: [u8; 24]) -> Self {
        Self(bytes)
    }

    pub fn to_base64(self) -> String {
        base64_encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = base64_decode(s.as_bytes())?;
        let bytes: [u8; 24] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

struct Entry<T> {
    value: T,
    last_access: Instant,
}

/// A generic session store keyed by [`SessionId`]. Entries are evicted lazily: nothing runs
/// in the background, a caller must invoke [`Sessions::cleanup`] (e.g. once per request) and
/// eviction only does real work when at least `cleanup_interval` has elapsed since the last
/// pass, per spec §5's "no timeouts inside the core" rule.
pub struct Sessions<T> {
    entries: HashMap<SessionId, Entry<T>>,
    keep_alive: Duration,
    cleanup_interval: Duration,
    last_cleanup: Instant,
}

impl<T> Sessions<T> {
    pub fn new(keep_alive: Duration, cleanup_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            keep_alive,
            cleanup_interval,
            last_cleanup: Instant::now(),
        }
    }

    /// Inserts or replaces a session, resetting its access clock.
    pub fn insert(&mut self, id: SessionId, value: T) {
        self.entries.insert(
            id,
            Entry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Looks up a session and refreshes its access clock, as a real request touching it would.
    pub fn get(&mut self, id: SessionId) -> Option<&T> {
        let entry = self.entries.get_mut(&id)?;
        entry.last_access = Instant::now();
        Some(&entry.value)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut T> {
        let entry = self.entries.get_mut(&id)?;
        entry.last_access = Instant::now();
        Some(&mut entry.value)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<T> {
        self.entries.remove(&id).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts every session whose `last_access + keep_alive < now`. A no-op if called again
    /// before `cleanup_interval` has passed since the previous effective pass.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_cleanup) < self.cleanup_interval {
            return;
        }
        self.last_cleanup = now;
        let keep_alive = self.keep_alive;
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_access) < keep_alive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_base64_round_trips() {
        let id = SessionId::from_bytes([0xab; 24]);
        let text = id.to_base64();
        assert_eq!(SessionId::from_base64(&text), Some(id));
    }

    #[test]
    fn cleanup_is_rate_limited() {
        let mut sessions: Sessions<&'static str> =
            Sessions::new(Duration::from_millis(0), Duration::from_secs(60));
        sessions.insert(SessionId::from_bytes([1; 24]), "a");
        // keep_alive is zero, so the entry is immediately stale, but cleanup_interval is
        // 60s and the constructor just ran, so this call should be a no-op.
        sessions.cleanup();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn cleanup_evicts_stale_entries_once_interval_elapses() {
        let mut sessions: Sessions<&'static str> =
            Sessions::new(Duration::from_millis(1), Duration::from_millis(0));
        sessions.insert(SessionId::from_bytes([1; 24]), "a");
        std::thread::sleep(Duration::from_millis(5));
        sessions.cleanup();
        assert!(sessions.is_empty());
    }

    #[test]
    fn get_refreshes_access_time_and_prevents_eviction() {
        let mut sessions: Sessions<&'static str> =
            Sessions::new(Duration::from_millis(50), Duration::from_millis(0));
        let id = SessionId::from_bytes([2; 24]);
        sessions.insert(id, "a");
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(sessions.get(id), Some(&"a"));
        sessions.cleanup();
        assert_eq!(sessions.len(), 1);
    }
}
