use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Window {
    count: u64,
    expires_at: Instant,
}

/// Fixed-window counters keyed by client identity. Windows start on first
/// increment and reset lazily once expired.
#[derive(Default)]
pub struct InMemoryCounters {
    inner: Mutex<HashMap<String, Window>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter under `key`, opening a fresh window when absent
    /// or expired. Returns the count after the increment.
    pub fn incr(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        let mut map = self.lock();
        let entry = map.entry(key.to_owned()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }
        entry.count += 1;
        entry.count
    }

    /// Current count, zero once the window has expired.
    pub fn get(&self, key: &str) -> u64 {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|w| w.expires_at > now)
            .map_or(0, |w| w.count)
    }

    /// Mark `key` set for `ttl` (a counter pinned at 1).
    pub fn set_flag(&self, key: &str, ttl: Duration) {
        let mut map = self.lock();
        map.insert(
            key.to_owned(),
            Window {
                count: 1,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn flag_active(&self, key: &str) -> bool {
        self.get(key) > 0
    }

    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Window>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop expired windows. Called opportunistically; correctness never
    /// depends on it.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.lock().retain(|_, w| w.expires_at > now);
    }

    #[cfg(test)]
    pub fn force_expire(&self, key: &str) {
        if let Some(w) = self.lock().get_mut(key) {
            w.expires_at = Instant::now();
        }
    }
}
