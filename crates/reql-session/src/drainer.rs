//! Counted scope tracking the live refs on an entry.

use std::sync::Arc;
use tokio::sync::watch;

/// Counter of live [`DrainerLock`]s; [`drain`] resolves once the count
/// reaches zero.
///
/// [`drain`]: Drainer::drain
#[derive(Debug, Clone)]
pub struct Drainer {
    count: Arc<watch::Sender<usize>>,
}

impl Drainer {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Register a holder; the count drops when the returned lock does.
    pub fn lock(&self) -> DrainerLock {
        self.count.send_modify(|count| *count += 1);
        DrainerLock {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until every lock has been released.
    pub async fn drain(&self) {
        let mut watcher = self.count.subscribe();
        let _ = watcher.wait_for(|count| *count == 0).await;
    }
}

impl Default for Drainer {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for one registered holder.
#[derive(Debug)]
pub struct DrainerLock {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for DrainerLock {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count -= 1);
    }
}
