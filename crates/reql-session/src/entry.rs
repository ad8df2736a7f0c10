//! The per-token entry.

use crate::drainer::Drainer;
use crate::params::QueryParams;
use parking_lot::Mutex;
use reql_eval::{
    BacktraceRegistry, CompiledTerm, DatumStream, GlobalOptArgs, Interruptor, TermStorage,
};
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle state of one token's query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Start,
    Stream,
    Done,
    Deleting,
}

/// One token's live query.
///
/// The state word lives under its own short-lock mutex so `terminate`
/// and admin kill never contend with an executing ref; the execution
/// payload lives under the fair async mutex that serializes refs.
pub(crate) struct Entry {
    pub(crate) job_id: Uuid,
    pub(crate) noreply: bool,
    pub(crate) profile: bool,
    pub(crate) start_time: SystemTime,
    state: Mutex<State>,
    pub(crate) persistent_interruptor: Interruptor,
    pub(crate) drainer: Drainer,
    pub(crate) exec: Arc<tokio::sync::Mutex<EntryExec>>,
}

/// Execution payload guarded by the per-entry fair mutex.
pub(crate) struct EntryExec {
    pub(crate) bt_reg: BacktraceRegistry,
    pub(crate) term_storage: Arc<TermStorage>,
    pub(crate) global_optargs: Arc<GlobalOptArgs>,
    /// Present only until the first evaluation clears it.
    pub(crate) root_term: Option<Arc<CompiledTerm>>,
    /// Present only while streaming.
    pub(crate) stream: Option<Box<dyn DatumStream>>,
    pub(crate) has_sent_batch: bool,
}

impl Entry {
    pub(crate) fn new(
        params: &QueryParams,
        bt_reg: BacktraceRegistry,
        term_storage: Arc<TermStorage>,
        global_optargs: Arc<GlobalOptArgs>,
        root_term: Arc<CompiledTerm>,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_id: Uuid::new_v4(),
            noreply: params.noreply,
            profile: params.profile,
            start_time: SystemTime::now(),
            state: Mutex::new(State::Start),
            persistent_interruptor: Interruptor::new(),
            drainer: Drainer::new(),
            exec: Arc::new(tokio::sync::Mutex::new(EntryExec {
                bt_reg,
                term_storage,
                global_optargs,
                root_term: Some(root_term),
                stream: None,
                has_sent_batch: false,
            })),
        })
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: State) {
        *self.state.lock() = state;
    }

    /// Transition to `to` only if currently in `from`; reports whether
    /// the transition happened.
    pub(crate) fn transition(&self, from: State, to: State) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// `STOP` semantics: mark done if still live, then pulse.
    pub(crate) fn terminate(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, State::Start | State::Stream) {
                *state = State::Done;
            }
        }
        self.persistent_interruptor.pulse();
    }
}
