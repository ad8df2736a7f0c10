//! Admin surface over the live query caches.
//!
//! Each cache registers itself here on construction; the jobs table
//! reads the snapshot and may kill a query by job id.

use crate::cache::QueryCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use uuid::Uuid;

/// One live query as seen by the jobs table.
#[derive(Debug, Clone, Serialize)]
pub struct QueryJob {
    pub job_id: Uuid,
    pub token: i64,
    pub start_time: SystemTime,
    pub client_addr: SocketAddr,
}

/// Explicit registry of per-worker query caches.
///
/// Injected into every cache at construction so admin enumeration has a
/// single, testable path.
#[derive(Debug, Default)]
pub struct JobsRegistry {
    caches: Mutex<HashMap<u64, Weak<QueryCache>>>,
    next_registration: AtomicU64,
}

impl JobsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(&self, cache: Weak<QueryCache>) -> u64 {
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.caches.lock().insert(registration, cache);
        registration
    }

    pub(crate) fn deregister(&self, registration: u64) {
        self.caches.lock().remove(&registration);
    }

    /// Snapshot of every live query across the registered caches.
    pub fn jobs(&self) -> Vec<QueryJob> {
        let caches: Vec<Arc<QueryCache>> = self
            .caches
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        caches.iter().flat_map(|cache| cache.jobs()).collect()
    }

    /// Kill the query with the given job id, if it is still live.
    ///
    /// Pulses the entry's persistent interruptor directly; an in-flight
    /// response observes the interrupt with the entry not yet done and
    /// reports the jobs-table termination error.
    pub fn kill(&self, job_id: Uuid) -> bool {
        let caches: Vec<Arc<QueryCache>> = self
            .caches
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        caches.iter().any(|cache| cache.kill_job(job_id))
    }
}
