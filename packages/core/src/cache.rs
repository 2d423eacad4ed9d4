use std::time::{Duration, Instant};

/// In-memory TTL cache for a single clonable response value.
///
/// Used to keep the hot dashboard list endpoint from hammering SQLite
/// on every request; a short TTL is enough because rotation state only
/// changes on timer ticks.
pub struct ResponseCache<T: Clone> {
    value: Option<T>,
    cached_at: Option<Instant>,
    ttl: Duration,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            cached_at: None,
            ttl,
        }
    }

    /// Returns cached value only when still within TTL.
    pub fn get(&self) -> Option<T> {
        if self.is_fresh() {
            self.value.clone()
        } else {
            None
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
        self.cached_at = Some(Instant::now());
    }

    /// Drop the cached value; the next read misses. Called after any
    /// write that changes what the list endpoint would return.
    pub fn invalidate(&mut self) {
        self.value = None;
        self.cached_at = None;
    }

    pub fn is_fresh(&self) -> bool {
        match (self.value.as_ref(), self.cached_at) {
            (Some(_), Some(cached_at)) => cached_at.elapsed() <= self.ttl,
            _ => false,
        }
    }
}
