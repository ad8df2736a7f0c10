//! Lazy datum sequences consumed one client batch at a time.

use crate::env::EvalEnv;
use crate::error::EvalResult;
use async_trait::async_trait;
use reql_core::datum::Datum;
use reql_core::proto::ResponseNote;
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Change-feed classification of a stream; decides the note attached to
/// batches served from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedType {
    NotFeed,
    Stream,
    Point,
    OrderByLimit,
    Unioned,
}

/// Whether a batch is the first one delivered for its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    NormalFirst,
    Normal,
}

/// Sizing of one `next_batch` call.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub batch_type: BatchType,
    pub max_rows: usize,
}

impl BatchSpec {
    /// Client-facing batch specification under the query's optargs.
    pub fn user(batch_type: BatchType, env: &EvalEnv) -> Self {
        Self {
            batch_type,
            max_rows: env.max_batch_rows().max(1),
        }
    }
}

/// A lazy sequence of datums.
#[async_trait]
pub trait DatumStream: Send {
    /// Produce the next batch. May suspend; observes the environment's
    /// interruptor.
    async fn next_batch(&mut self, env: &EvalEnv, spec: &BatchSpec) -> EvalResult<Vec<Datum>>;

    fn is_exhausted(&self) -> bool;

    fn feed_type(&self) -> FeedType {
        FeedType::NotFeed
    }

    /// Fully materialize the remaining sequence, if it is finite and
    /// within the environment's array limit.
    fn as_array(&self, env: &EvalEnv) -> Option<Vec<Datum>>;

    /// Extra notes to attach to responses carrying batches from this
    /// stream.
    fn notes(&self) -> Vec<ResponseNote> {
        Vec::new()
    }
}

/// Integer range, finite or endless.
#[derive(Debug)]
pub struct RangeStream {
    next: i64,
    end: Option<i64>,
}

impl RangeStream {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            next: start,
            end: Some(end),
        }
    }

    pub fn endless() -> Self {
        Self { next: 0, end: None }
    }

    fn remaining(&self) -> Option<usize> {
        self.end.map(|end| (end - self.next).max(0) as usize)
    }
}

#[async_trait]
impl DatumStream for RangeStream {
    async fn next_batch(&mut self, env: &EvalEnv, spec: &BatchSpec) -> EvalResult<Vec<Datum>> {
        env.interruptor.check()?;
        let mut batch = Vec::new();
        while batch.len() < spec.max_rows {
            match self.end {
                Some(end) if self.next >= end => break,
                _ => {
                    batch.push(Value::from(self.next));
                    self.next += 1;
                }
            }
        }
        Ok(batch)
    }

    fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    fn as_array(&self, env: &EvalEnv) -> Option<Vec<Datum>> {
        let remaining = self.remaining()?;
        if remaining > env.array_limit() {
            return None;
        }
        let end = self.end.unwrap_or(self.next);
        Some((self.next..end).map(Value::from).collect())
    }
}

/// Replay feed over a finite sequence: emits one change document per
/// source element, then stays open until interrupted.
#[derive(Debug)]
pub struct ChangesFeed {
    pending: VecDeque<Datum>,
}

impl ChangesFeed {
    pub fn new(items: Vec<Datum>) -> Self {
        let pending = items
            .into_iter()
            .map(|item| json!({"old_val": null, "new_val": item}))
            .collect();
        Self { pending }
    }
}

#[async_trait]
impl DatumStream for ChangesFeed {
    async fn next_batch(&mut self, env: &EvalEnv, spec: &BatchSpec) -> EvalResult<Vec<Datum>> {
        env.interruptor.check()?;
        if !self.pending.is_empty() {
            let take = self.pending.len().min(spec.max_rows);
            return Ok(self.pending.drain(..take).collect());
        }
        if env.return_empty_normal_batches {
            return Ok(Vec::new());
        }
        // Nothing buffered; wait for a change that will never come, or
        // for the query to be stopped.
        env.interruptor.pulsed().await;
        Err(crate::error::EvalError::Interrupted)
    }

    fn is_exhausted(&self) -> bool {
        false
    }

    fn feed_type(&self) -> FeedType {
        FeedType::Stream
    }

    fn as_array(&self, _env: &EvalEnv) -> Option<Vec<Datum>> {
        None
    }
}
