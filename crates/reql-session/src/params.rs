//! The query-params record delivered by the connection layer per frame.

use crate::cache::QueryCache;
use crate::query_id::QueryId;
use reql_core::datum::Datum;
use reql_core::proto::QueryOp;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// One client frame routed to the query cache.
#[derive(Debug)]
pub struct QueryParams {
    pub token: i64,
    pub op: QueryOp,
    pub(crate) id: QueryId,
    /// Raw term tree; present for `START` only, taken by `create`.
    pub root_term_json: Option<Datum>,
    /// Raw global optargs; present for `START` only, taken by `create`.
    pub global_optargs_json: Option<Datum>,
    pub noreply: bool,
    pub profile: bool,
    pub(crate) cache: Weak<QueryCache>,
}

impl QueryParams {
    /// Build params for a frame received on `cache`'s connection.
    ///
    /// Issues a query id from the cache's tracker; the id is held until
    /// the operation claims it (or until the params record drops, for
    /// noreply queries).
    pub fn new(
        cache: &Arc<QueryCache>,
        token: i64,
        op: QueryOp,
        root_term_json: Option<Datum>,
        global_optargs_json: Option<Datum>,
    ) -> Self {
        let noreply = wire_flag(&global_optargs_json, "noreply");
        let profile = wire_flag(&global_optargs_json, "profile");
        Self {
            token,
            op,
            id: cache.tracker().issue(),
            root_term_json,
            global_optargs_json,
            noreply,
            profile,
            cache: Arc::downgrade(cache),
        }
    }

    pub fn id_value(&self) -> u64 {
        self.id.value()
    }

    /// Release the query id back to the tracker.
    ///
    /// Noreply queries keep their id outstanding until this record is
    /// dropped after the query finishes; that is what makes the
    /// `NOREPLY_WAIT` barrier wait for them.
    pub(crate) fn maybe_release_query_id(&mut self) {
        if !self.noreply {
            self.id.release();
        }
    }
}

fn wire_flag(optargs: &Option<Datum>, name: &str) -> bool {
    optargs
        .as_ref()
        .and_then(|value| value.get(name))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
