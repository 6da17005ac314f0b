use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// TTL-backed key-value store holding the currently-valid refresh token
/// per user id. Absence of an entry is the forced-logout signal, so every
/// authenticated operation consults this store, not just login.
///
/// Entries expire lazily on access. A single lock serializes a refresh
/// (`get` + `touch`) racing a revoke (`remove`): last writer wins, and no
/// token is granted after a completed revoke.
pub struct LivenessStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    token: String,
    expires_at: Instant,
}

impl LivenessStore {
    /// Default TTL: 30 minutes of inactivity force-logs-out the session.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, user_id: &str, refresh_token: &str) {
        let mut entries = self.entries.lock().expect("liveness lock poisoned");
        entries.insert(
            user_id.to_string(),
            Entry {
                token: refresh_token.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!("Liveness entry set for user {}", user_id);
    }

    /// Current refresh token for the user, or `None` if absent/expired.
    pub fn get(&self, user_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("liveness lock poisoned");
        match entries.get(user_id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.token.clone()),
            Some(_) => {
                entries.remove(user_id);
                None
            }
            None => None,
        }
    }

    /// Extend the TTL of a live entry. No-op for absent/expired entries.
    pub fn touch(&self, user_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("liveness lock poisoned");
        match entries.get_mut(user_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, user_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("liveness lock poisoned");
        entries.remove(user_id).is_some()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("liveness lock poisoned");
        let count = entries.len();
        entries.clear();
        count
    }
}

impl Default for LivenessStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_reads_as_absent() {
        let store = LivenessStore::new(Duration::from_millis(0));
        store.set("u1", "tok");
        assert!(store.get("u1").is_none());
        assert!(!store.touch("u1"));
    }

    #[test]
    fn clear_reports_count() {
        let store = LivenessStore::default();
        store.set("u1", "a");
        store.set("u2", "b");
        assert_eq!(store.clear(), 2);
        assert!(store.get("u1").is_none());
    }
}
