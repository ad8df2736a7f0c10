//! Monotonic query-id issuance and the oldest-outstanding watchable.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Issues strictly increasing ids to incoming queries and tracks the
/// lowest id that has not yet been released.
///
/// `NOREPLY_WAIT` observes the watchable: because ids are monotonic,
/// `oldest_outstanding == id` implies every earlier id has been
/// released.
#[derive(Debug)]
pub struct QueryIdTracker {
    inner: Mutex<TrackerInner>,
    oldest: watch::Sender<u64>,
}

#[derive(Debug)]
struct TrackerInner {
    next: u64,
    outstanding: BTreeSet<u64>,
}

impl QueryIdTracker {
    pub fn new() -> Arc<Self> {
        let (oldest, _) = watch::channel(0);
        Arc::new(Self {
            inner: Mutex::new(TrackerInner {
                next: 0,
                outstanding: BTreeSet::new(),
            }),
            oldest,
        })
    }

    /// Issue the next id; it stays outstanding until released.
    pub fn issue(self: &Arc<Self>) -> QueryId {
        let mut inner = self.inner.lock();
        let value = inner.next;
        inner.next += 1;
        inner.outstanding.insert(value);
        self.publish(&inner);
        QueryId {
            value,
            tracker: Some(Arc::clone(self)),
        }
    }

    /// Current value of the oldest-outstanding watchable.
    pub fn oldest_outstanding(&self) -> u64 {
        *self.oldest.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.oldest.subscribe()
    }

    fn release(&self, value: u64) {
        let mut inner = self.inner.lock();
        inner.outstanding.remove(&value);
        self.publish(&inner);
    }

    fn publish(&self, inner: &TrackerInner) {
        let oldest = inner.outstanding.first().copied().unwrap_or(inner.next);
        self.oldest.send_replace(oldest);
    }
}

/// An issued query id; releases itself on drop if not released
/// explicitly first.
#[derive(Debug)]
pub struct QueryId {
    value: u64,
    tracker: Option<Arc<QueryIdTracker>>,
}

impl QueryId {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Idempotent early release.
    pub fn release(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.release(self.value);
        }
    }
}

impl Drop for QueryId {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let tracker = QueryIdTracker::new();
        let a = tracker.issue();
        let b = tracker.issue();
        let c = tracker.issue();
        assert!(a.value() < b.value());
        assert!(b.value() < c.value());
    }

    #[test]
    fn test_oldest_outstanding_follows_releases() {
        let tracker = QueryIdTracker::new();
        assert_eq!(tracker.oldest_outstanding(), 0);

        let mut a = tracker.issue();
        let b = tracker.issue();
        let mut c = tracker.issue();
        assert_eq!(tracker.oldest_outstanding(), a.value());

        // Releasing out of order: the oldest only advances when the
        // current minimum goes away.
        c.release();
        assert_eq!(tracker.oldest_outstanding(), a.value());
        a.release();
        assert_eq!(tracker.oldest_outstanding(), b.value());

        drop(b);
        // No ids outstanding: the watchable equals the next id to issue.
        assert_eq!(tracker.oldest_outstanding(), 3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let tracker = QueryIdTracker::new();
        let mut a = tracker.issue();
        a.release();
        a.release();
        drop(a);
        assert_eq!(tracker.oldest_outstanding(), 1);
    }
}
