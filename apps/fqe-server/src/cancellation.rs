use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How long an unobserved flag stays set.
pub const DEFAULT_FLAG_TTL: Duration = Duration::from_secs(900);

/// Request ids whose callers asked for cancellation.
///
/// Membership is advisory: the pipeline polls it at checkpoints and the
/// in-flight database query is interrupted separately. Every operation is
/// idempotent and none of them fail.
///
/// A cancel may arrive for a request that already finished or never starts,
/// so flags expire after `ttl`. Expired flags read as unset and are swept on
/// the next `mark`.
pub struct CancellationSet {
    ids: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl Default for CancellationSet {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_FLAG_TTL)
    }
}

impl CancellationSet {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ids: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn mark(&self, request_id: &str) {
        let mut ids = self.ids.lock();
        let ttl = self.ttl;
        ids.retain(|_, marked| marked.elapsed() < ttl);
        ids.insert(request_id.to_string(), Instant::now());
    }

    pub fn is_cancelled(&self, request_id: &str) -> bool {
        self.ids
            .lock()
            .get(request_id)
            .is_some_and(|marked| marked.elapsed() < self.ttl)
    }

    pub fn clear(&self, request_id: &str) {
        self.ids.lock().remove(request_id);
    }

    /// Stored flags, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_check_clear() {
        let set = CancellationSet::new();
        assert!(!set.is_cancelled("r1"));
        set.mark("r1");
        set.mark("r1");
        assert!(set.is_cancelled("r1"));
        assert_eq!(set.len(), 1);
        set.clear("r1");
        assert!(!set.is_cancelled("r1"));
        assert!(set.is_empty());
    }

    #[test]
    fn clearing_unknown_id_is_a_no_op() {
        let set = CancellationSet::new();
        set.clear("never-seen");
        set.mark("other");
        set.clear("never-seen");
        assert!(set.is_cancelled("other"));
    }

    #[test]
    fn expired_flags_read_unset_and_are_swept() {
        let set = CancellationSet::with_ttl(Duration::ZERO);
        set.mark("finished-long-ago");
        assert!(!set.is_cancelled("finished-long-ago"));
        assert_eq!(set.len(), 1);

        set.mark("next");
        assert_eq!(set.len(), 1);
        assert!(!set.is_cancelled("finished-long-ago"));
    }

    #[test]
    fn sweep_keeps_live_flags() {
        let set = CancellationSet::with_ttl(Duration::from_secs(60));
        set.mark("a");
        set.mark("b");
        assert_eq!(set.len(), 2);
        assert!(set.is_cancelled("a"));
        assert!(set.is_cancelled("b"));
    }
}
