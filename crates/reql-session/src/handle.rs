//! Scoped access handle to one token's entry.

use crate::cache::QueryCache;
use crate::drainer::DrainerLock;
use crate::entry::{Entry, EntryExec, State};
use crate::response::Response;
use reql_core::backtrace::QueryBacktrace;
use reql_core::datum::grouped_to_client;
use reql_core::error::{Error, Result};
use reql_core::proto::{ResponseNote, ResponseType};
use reql_eval::{
    BatchSpec, BatchType, CompositeInterruptor, EvalEnv, EvalError, FeedType, Interruptor,
    ProfileTrace, Val,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Scoped single-holder handle to an entry.
///
/// Holds the entry's fair mutex for its whole lifetime, so no other ref
/// on the same token can observe intermediate state. Dropping the ref
/// triggers the deferred-cleanup protocol when the entry has finished.
pub struct QueryRef {
    cache: Arc<QueryCache>,
    token: i64,
    entry: Arc<Entry>,
    trace: Option<Arc<parking_lot::Mutex<ProfileTrace>>>,
    interruptor: CompositeInterruptor,
    guard: OwnedMutexGuard<EntryExec>,
    _drain: DrainerLock,
}

impl std::fmt::Debug for QueryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRef").field("token", &self.token).finish()
    }
}

impl QueryRef {
    /// Construction order matters: profile trace, drainer count,
    /// composite interruptor, then the interruptible mutex acquisition.
    /// If the external interruptor fires first, acquisition fails and
    /// the entry is left untouched.
    pub(crate) async fn acquire(
        cache: Arc<QueryCache>,
        token: i64,
        entry: Arc<Entry>,
        external: &Interruptor,
    ) -> Result<Self> {
        let trace = entry
            .profile
            .then(|| Arc::new(parking_lot::Mutex::new(ProfileTrace::new())));
        let drain = entry.drainer.lock();
        let interruptor =
            CompositeInterruptor::new(external.clone(), entry.persistent_interruptor.clone());
        let guard = tokio::select! {
            biased;
            _ = external.pulsed() => return Err(Error::Interrupted),
            guard = Arc::clone(&entry.exec).lock_owned() => guard,
        };
        Ok(Self {
            cache,
            token,
            entry,
            trace,
            interruptor,
            guard,
            _drain: drain,
        })
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    /// Advance the entry's state machine and populate `res`.
    pub async fn fill_response(&mut self, res: &mut Response) -> Result<()> {
        match self.entry.state() {
            State::Start | State::Stream => {}
            // The client recycled the token before collecting the
            // previous response; report it as a duplicate token.
            _ => {
                return Err(Error::client(format!(
                    "ERROR: duplicate token {}",
                    self.token
                )));
            }
        }

        match self.fill_response_inner(res).await {
            Ok(()) => Ok(()),
            Err(EvalError::Interrupted) => {
                if self.entry.persistent_interruptor.is_pulsed() {
                    if self.entry.state() != State::Done {
                        // Killed through the jobs table without a prior
                        // client STOP.
                        Err(Error::runtime(
                            "Query terminated by the `rethinkdb.jobs` table.",
                            QueryBacktrace::EMPTY,
                        ))
                    } else {
                        // Client STOP: acknowledge with an empty final
                        // batch for protocol compatibility.
                        res.clear();
                        res.set_type(ResponseType::SuccessSequence);
                        Ok(())
                    }
                } else {
                    self.entry.terminate();
                    Err(Error::Interrupted)
                }
            }
            Err(EvalError::Runtime { message, term }) => {
                self.entry.terminate();
                let backtrace = self.guard.bt_reg.datum_backtrace(term);
                Err(Error::runtime(message, backtrace))
            }
            Err(EvalError::Datum { message }) => {
                self.entry.terminate();
                Err(Error::runtime(message, QueryBacktrace::EMPTY))
            }
        }
    }

    async fn fill_response_inner(&mut self, res: &mut Response) -> std::result::Result<(), EvalError> {
        let env = EvalEnv {
            return_empty_normal_batches: self.cache.return_empty_normal_batches(),
            interruptor: self.interruptor.clone(),
            optargs: Arc::clone(&self.guard.global_optargs),
            term_storage: Arc::clone(&self.guard.term_storage),
            trace: self.trace.clone(),
        };

        if self.entry.state() == State::Start {
            self.run(&env, res).await?;
            self.guard.root_term = None;
        }

        if self.entry.state() == State::Stream {
            self.serve(&env, res).await?;
        }

        if let Some(trace) = &self.trace {
            res.set_profile(trace.lock().as_datum());
        }
        Ok(())
    }

    /// First evaluation of the root term.
    async fn run(&mut self, env: &EvalEnv, res: &mut Response) -> std::result::Result<(), EvalError> {
        // Safe default if evaluation yields a non-streaming value.
        self.entry.set_state(State::Done);

        let root = self.guard.root_term.clone().ok_or_else(|| EvalError::Runtime {
            message: "Query has no term to run.".to_string(),
            term: None,
        })?;

        match root.eval(env).await? {
            Val::Datum(datum) => {
                res.set_type(ResponseType::SuccessAtom);
                res.set_data(vec![datum]);
            }
            Val::Grouped(groups) => {
                res.set_type(ResponseType::SuccessAtom);
                res.set_data(vec![grouped_to_client(groups)]);
            }
            Val::Seq(stream) => {
                if let Some(array) = stream.as_array(env) {
                    res.set_type(ResponseType::SuccessAtom);
                    res.set_data(vec![Value::Array(array)]);
                } else {
                    self.guard.stream = Some(stream);
                    self.guard.has_sent_batch = false;
                    self.entry.set_state(State::Stream);
                }
            }
        }
        Ok(())
    }

    /// One continuation batch.
    async fn serve(&mut self, env: &EvalEnv, res: &mut Response) -> std::result::Result<(), EvalError> {
        let batch_type = if self.guard.has_sent_batch {
            BatchType::Normal
        } else {
            BatchType::NormalFirst
        };
        let spec = BatchSpec::user(batch_type, env);

        let stream = self.guard.stream.as_mut().ok_or_else(|| EvalError::Runtime {
            message: "Query has no stream to serve.".to_string(),
            term: None,
        })?;
        let batch = stream.next_batch(env, &spec).await?;
        let exhausted = stream.is_exhausted();
        let feed_type = stream.feed_type();
        let extra_notes = stream.notes();

        self.guard.has_sent_batch = true;
        res.set_data(batch);

        if exhausted || self.entry.noreply {
            self.entry.transition(State::Stream, State::Done);
            res.set_type(ResponseType::SuccessSequence);
        } else {
            res.set_type(ResponseType::SuccessPartial);
        }

        match feed_type {
            FeedType::NotFeed => {
                // For a non-feed, an empty batch means there is no more
                // data; feeds may legitimately send empty batches.
                if res.data().is_empty() {
                    res.set_type(ResponseType::SuccessSequence);
                }
            }
            FeedType::Stream => res.add_note(ResponseNote::SequenceFeed),
            FeedType::Point => res.add_note(ResponseNote::AtomFeed),
            FeedType::OrderByLimit => res.add_note(ResponseNote::OrderByLimitFeed),
            FeedType::Unioned => res.add_note(ResponseNote::UnionedFeed),
        }
        for note in extra_notes {
            res.add_note(note);
        }
        Ok(())
    }
}

impl Drop for QueryRef {
    fn drop(&mut self) {
        debug_assert!(
            self.entry.state() != State::Start,
            "query ref dropped while its entry is still in the start state"
        );

        if self.entry.transition(State::Done, State::Deleting) {
            // The entry cannot be freed here: other refs may still hold
            // drainer counts, and so does this one until its fields
            // drop. Unlink it so no new ref can find it, then dispose
            // of it once the drainer reaches zero.
            if let Some(entry) = self.cache.unlink_entry(self.token, &self.entry) {
                debug!(token = self.token, "query finished; entry scheduled for disposal");
                tokio::spawn(async move {
                    entry.drainer.drain().await;
                    drop(entry);
                });
            }
        }
    }
}
