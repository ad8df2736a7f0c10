//! The per-connection token → entry registry.

use crate::entry::Entry;
use crate::handle::QueryRef;
use crate::jobs::{JobsRegistry, QueryJob};
use crate::params::QueryParams;
use crate::query_id::QueryIdTracker;
use parking_lot::Mutex;
use reql_core::backtrace::QueryBacktrace;
use reql_core::datum::Datum;
use reql_core::error::{Error, Result};
use reql_eval::{
    compile_term, preprocess_term_tree, BacktraceRegistry, CompileEnv, CompiledTerm, EvalError,
    EvalResult, GlobalOptArgs, Interruptor, TermStorage,
};
use std::collections::{hash_map, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Per-connection registry of live queries, keyed by client token.
///
/// Registers itself into the jobs registry on construction and
/// deregisters on drop, so the admin surface can enumerate and kill
/// queries across connections.
pub struct QueryCache {
    queries: Mutex<HashMap<i64, Arc<Entry>>>,
    client_addr: SocketAddr,
    return_empty_normal_batches: bool,
    tracker: Arc<QueryIdTracker>,
    registry: Arc<JobsRegistry>,
    registration: u64,
}

impl QueryCache {
    pub fn new(
        registry: &Arc<JobsRegistry>,
        client_addr: SocketAddr,
        return_empty_normal_batches: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let registration = registry.register(weak.clone());
            Self {
                queries: Mutex::new(HashMap::new()),
                client_addr,
                return_empty_normal_batches,
                tracker: QueryIdTracker::new(),
                registry: Arc::clone(registry),
                registration,
            }
        })
    }

    pub fn tracker(&self) -> &Arc<QueryIdTracker> {
        &self.tracker
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub(crate) fn return_empty_normal_batches(&self) -> bool {
        self.return_empty_normal_batches
    }

    /// Compile and register a new query under its token; returns the
    /// ref through which the first response is produced.
    pub async fn create(
        self: &Arc<Self>,
        params: &mut QueryParams,
        interruptor: &Interruptor,
    ) -> Result<QueryRef> {
        self.check_params(params);
        params.maybe_release_query_id();
        if self.queries.lock().contains_key(&params.token) {
            return Err(duplicate_token(params.token));
        }

        let root_term_json = match params.root_term_json.take() {
            Some(term) => term,
            None => {
                return Err(Error::compile(
                    "Expected a query term to run.",
                    QueryBacktrace::EMPTY,
                ));
            }
        };
        let global_optargs_json = params.global_optargs_json.take();

        let mut bt_reg = BacktraceRegistry::default();
        let (term_storage, global_optargs, root_term) =
            match compile_query(root_term_json, global_optargs_json, &mut bt_reg) {
                Ok(parts) => parts,
                Err(EvalError::Runtime { message, term }) => {
                    return Err(Error::compile(message, bt_reg.datum_backtrace(term)));
                }
                Err(EvalError::Datum { message }) => {
                    return Err(Error::compile(message, QueryBacktrace::EMPTY));
                }
                Err(EvalError::Interrupted) => return Err(Error::Interrupted),
            };

        let entry = Entry::new(params, bt_reg, term_storage, global_optargs, root_term);
        match self.queries.lock().entry(params.token) {
            hash_map::Entry::Occupied(_) => return Err(duplicate_token(params.token)),
            hash_map::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
            }
        }
        debug!(token = params.token, job_id = %entry.job_id, "query registered");

        match QueryRef::acquire(Arc::clone(self), params.token, Arc::clone(&entry), interruptor)
            .await
        {
            Ok(query_ref) => Ok(query_ref),
            Err(err) => {
                // The query never ran; take it back out of the map.
                self.unlink_entry(params.token, &entry);
                Err(err)
            }
        }
    }

    /// Ref onto an existing token; serialized behind any prior ref by
    /// the entry's mutex.
    pub async fn get(
        self: &Arc<Self>,
        params: &mut QueryParams,
        interruptor: &Interruptor,
    ) -> Result<QueryRef> {
        self.check_params(params);
        params.maybe_release_query_id();
        let entry = self
            .queries
            .lock()
            .get(&params.token)
            .cloned()
            .ok_or_else(|| {
                Error::client(format!("Token {} not in stream cache.", params.token))
            })?;
        QueryRef::acquire(Arc::clone(self), params.token, entry, interruptor).await
    }

    /// Client `STOP`: idempotent, no error on an absent token.
    pub fn terminate(&self, params: &mut QueryParams) {
        self.check_params(params);
        params.maybe_release_query_id();
        let entry = self.queries.lock().get(&params.token).cloned();
        if let Some(entry) = entry {
            Self::terminate_internal(&entry);
        }
    }

    pub(crate) fn terminate_internal(entry: &Entry) {
        entry.terminate();
    }

    /// Barrier: resolves once every query with a smaller id has been
    /// released from the tracker.
    pub async fn noreply_wait(
        &self,
        params: &QueryParams,
        interruptor: &Interruptor,
    ) -> Result<()> {
        self.check_params(params);
        if self.queries.lock().contains_key(&params.token) {
            return Err(duplicate_token(params.token));
        }

        let target = params.id_value();
        let mut oldest = self.tracker.subscribe();
        tokio::select! {
            changed = oldest.wait_for(|oldest| *oldest == target) => {
                changed.map_err(|_| Error::Interrupted)?;
                Ok(())
            }
            _ = interruptor.pulsed() => Err(Error::Interrupted),
        }
    }

    /// Admin snapshot of the live queries on this connection.
    pub fn jobs(&self) -> Vec<QueryJob> {
        self.queries
            .lock()
            .iter()
            .map(|(token, entry)| QueryJob {
                job_id: entry.job_id,
                token: *token,
                start_time: entry.start_time,
                client_addr: self.client_addr,
            })
            .collect()
    }

    /// Admin kill: pulses the entry's persistent interruptor without
    /// marking it done, so an in-flight response reports the jobs-table
    /// termination error.
    pub(crate) fn kill_job(&self, job_id: Uuid) -> bool {
        let entry = self
            .queries
            .lock()
            .values()
            .find(|entry| entry.job_id == job_id)
            .cloned();
        match entry {
            Some(entry) => {
                entry.persistent_interruptor.pulse();
                debug!(%job_id, "query killed via the jobs table");
                true
            }
            None => false,
        }
    }

    /// Remove `(token, entry)` if the map still holds that exact entry.
    pub(crate) fn unlink_entry(&self, token: i64, entry: &Arc<Entry>) -> Option<Arc<Entry>> {
        let mut queries = self.queries.lock();
        match queries.get(&token) {
            Some(existing) if Arc::ptr_eq(existing, entry) => queries.remove(&token),
            _ => None,
        }
    }

    fn check_params(&self, params: &QueryParams) {
        assert!(
            std::ptr::eq(params.cache.as_ptr(), self),
            "query params routed to a different cache"
        );
    }
}

impl Drop for QueryCache {
    fn drop(&mut self) {
        self.registry.deregister(self.registration);
    }
}

fn duplicate_token(token: i64) -> Error {
    Error::client(format!("ERROR: duplicate token {token}"))
}

/// Term ingestion for `create`: storage, optargs, backtrace walk, and
/// compilation, in that order.
fn compile_query(
    root_term_json: Datum,
    global_optargs_json: Option<Datum>,
    bt_reg: &mut BacktraceRegistry,
) -> EvalResult<(Arc<TermStorage>, Arc<GlobalOptArgs>, Arc<CompiledTerm>)> {
    let term_storage = Arc::new(TermStorage::parse(root_term_json)?);
    let global_optargs = Arc::new(GlobalOptArgs::parse(global_optargs_json)?);
    preprocess_term_tree(&term_storage, bt_reg)?;
    let mut compile_env = CompileEnv::new();
    let root_term = compile_term(&mut compile_env, &term_storage, term_storage.root())?;
    Ok((term_storage, global_optargs, root_term))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;
    use reql_core::proto::{QueryOp, ResponseNote, ResponseType};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn client_addr() -> SocketAddr {
        "127.0.0.1:28015".parse().unwrap()
    }

    fn new_cache() -> Arc<QueryCache> {
        QueryCache::new(&JobsRegistry::new(), client_addr(), false)
    }

    fn start(cache: &Arc<QueryCache>, token: i64, term: Value) -> QueryParams {
        QueryParams::new(cache, token, QueryOp::Start, Some(term), None)
    }

    fn start_with(
        cache: &Arc<QueryCache>,
        token: i64,
        term: Value,
        optargs: Value,
    ) -> QueryParams {
        QueryParams::new(cache, token, QueryOp::Start, Some(term), Some(optargs))
    }

    fn continue_params(cache: &Arc<QueryCache>, token: i64) -> QueryParams {
        QueryParams::new(cache, token, QueryOp::Continue, None, None)
    }

    fn stop_params(cache: &Arc<QueryCache>, token: i64) -> QueryParams {
        QueryParams::new(cache, token, QueryOp::Stop, None, None)
    }

    async fn run_to_response(
        cache: &Arc<QueryCache>,
        params: &mut QueryParams,
        interruptor: &Interruptor,
    ) -> Result<Response> {
        let mut query_ref = cache.create(params, interruptor).await?;
        let mut res = Response::new();
        query_ref.fill_response(&mut res).await?;
        Ok(res)
    }

    async fn continue_to_response(cache: &Arc<QueryCache>, token: i64) -> Result<Response> {
        let mut params = continue_params(cache, token);
        let mut query_ref = cache.get(&mut params, &Interruptor::new()).await?;
        let mut res = Response::new();
        query_ref.fill_response(&mut res).await?;
        Ok(res)
    }

    fn error_message(err: &Error) -> String {
        err.to_string()
    }

    #[tokio::test]
    async fn test_atom_query() {
        let cache = new_cache();
        let mut params = start(&cache, 1, json!([24, [1, 1]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessAtom));
        assert_eq!(res.data(), &[json!(2)]);

        // The ref has dropped; the token is gone from the map.
        let err = continue_to_response(&cache, 1).await.unwrap_err();
        assert_eq!(error_message(&err), "Token 1 not in stream cache.");
    }

    #[tokio::test]
    async fn test_small_sequence_materializes_as_atom() {
        let cache = new_cache();
        let mut params = start(&cache, 2, json!([173, [3]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessAtom));
        assert_eq!(res.data(), &[json!([0, 1, 2])]);

        assert!(continue_to_response(&cache, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_paged_stream() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            3,
            json!([173, [6]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));
        assert_eq!(res.data(), &[json!(0), json!(1)]);

        let res = continue_to_response(&cache, 3).await.unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));
        assert_eq!(res.data(), &[json!(2), json!(3)]);

        let res = continue_to_response(&cache, 3).await.unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessSequence));
        assert_eq!(res.data(), &[json!(4), json!(5)]);

        // Terminal batch delivered: the token is gone.
        let err = continue_to_response(&cache, 3).await.unwrap_err();
        assert_eq!(error_message(&err), "Token 3 not in stream cache.");
    }

    #[tokio::test]
    async fn test_duplicate_token() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            4,
            json!([173, [10]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));

        let mut second = start(&cache, 4, json!([24, [1, 1]]));
        let err = cache
            .create(&mut second, &Interruptor::new())
            .await
            .unwrap_err();
        assert_eq!(error_message(&err), "ERROR: duplicate token 4");
    }

    #[tokio::test]
    async fn test_client_stop_mid_stream() {
        let cache = new_cache();
        let mut params = start(&cache, 3, json!([152, [[173, [2]]]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));
        assert_eq!(res.notes(), &[ResponseNote::SequenceFeed]);
        assert_eq!(res.data().len(), 2);

        // A CONTINUE that is already waiting inside the feed when STOP
        // lands gets a clean empty SUCCESS_SEQUENCE.
        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { continue_to_response(&cache, 3).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        let mut stop = stop_params(&cache, 3);
        cache.terminate(&mut stop);

        let res = pending.await.unwrap().unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessSequence));
        assert!(res.data().is_empty());

        // The entry is gone once the stopped ref drops.
        let err = continue_to_response(&cache, 3).await.unwrap_err();
        assert_eq!(error_message(&err), "Token 3 not in stream cache.");
    }

    #[tokio::test]
    async fn test_admin_kill_mid_stream() {
        let registry = JobsRegistry::new();
        let cache = QueryCache::new(&registry, client_addr(), false);
        let mut params = start(&cache, 3, json!([152, [[173, [2]]]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].token, 3);
        assert_eq!(jobs[0].client_addr, client_addr());

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { continue_to_response(&cache, 3).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.kill(jobs[0].job_id));

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(
            error_message(&err),
            "Query terminated by the `rethinkdb.jobs` table."
        );

        // A kill is not a STOP: the entry stays live (and interrupted)
        // until the client stops it.
        let err = continue_to_response(&cache, 3).await.unwrap_err();
        assert_eq!(
            error_message(&err),
            "Query terminated by the `rethinkdb.jobs` table."
        );
    }

    #[tokio::test]
    async fn test_noreply_wait_barrier() {
        let cache = new_cache();
        let mut noreply = start_with(&cache, 10, json!([24, [1, 1]]), json!({"noreply": true}));
        assert!(noreply.noreply);

        let res = run_to_response(&cache, &mut noreply, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessAtom));

        let wait_params = QueryParams::new(&cache, 11, QueryOp::NoreplyWait, None, None);
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.noreply_wait(&wait_params, &Interruptor::new()).await })
        };

        // The noreply query has finished but its params record is still
        // alive, so its id is still outstanding and the barrier holds.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(noreply);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("noreply_wait did not resolve")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_noreply_wait_on_active_token_is_a_client_error() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            7,
            json!([173, [10]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();

        let wait_params = QueryParams::new(&cache, 7, QueryOp::NoreplyWait, None, None);
        let err = cache
            .noreply_wait(&wait_params, &Interruptor::new())
            .await
            .unwrap_err();
        assert_eq!(error_message(&err), "ERROR: duplicate token 7");
    }

    #[tokio::test]
    async fn test_get_on_unknown_token() {
        let cache = new_cache();
        let mut params = continue_params(&cache, 42);
        let err = cache
            .get(&mut params, &Interruptor::new())
            .await
            .unwrap_err();
        assert_eq!(error_message(&err), "Token 42 not in stream cache.");
    }

    #[tokio::test]
    async fn test_compile_error_carries_a_backtrace() {
        let cache = new_cache();
        // DIV with no arguments, nested as the second argument of ADD.
        let mut params = start(&cache, 1, json!([24, [1, [27, []]]]));
        let err = cache
            .create(&mut params, &Interruptor::new())
            .await
            .unwrap_err();
        match err {
            Error::Reql {
                kind,
                message,
                bt,
            } => {
                assert_eq!(kind, reql_core::ErrorKind::Compile);
                assert!(message.contains("`DIV` expected"));
                assert_eq!(bt.to_datum(), json!([1]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runtime_error_terminates_the_entry() {
        let cache = new_cache();
        let mut params = start(&cache, 1, json!([12, ["boom"]]));
        let mut query_ref = cache.create(&mut params, &Interruptor::new()).await.unwrap();
        let mut res = Response::new();
        let err = query_ref.fill_response(&mut res).await.unwrap_err();
        match err {
            Error::Reql { kind, message, .. } => {
                assert_eq!(kind, reql_core::ErrorKind::Runtime);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        drop(query_ref);

        let err = continue_to_response(&cache, 1).await.unwrap_err();
        assert_eq!(error_message(&err), "Token 1 not in stream cache.");
    }

    #[tokio::test]
    async fn test_stale_fill_after_stop_reports_duplicate_token() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            5,
            json!([173, [10]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();

        // Acquire the ref first, then let STOP land before fill runs.
        let mut continue_p = continue_params(&cache, 5);
        let mut query_ref = cache
            .get(&mut continue_p, &Interruptor::new())
            .await
            .unwrap();
        let mut stop = stop_params(&cache, 5);
        cache.terminate(&mut stop);

        let mut res = Response::new();
        let err = query_ref.fill_response(&mut res).await.unwrap_err();
        assert_eq!(error_message(&err), "ERROR: duplicate token 5");
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            6,
            json!([173, [10]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();

        for _ in 0..3 {
            let mut stop = stop_params(&cache, 6);
            cache.terminate(&mut stop);
        }
        // Unknown tokens are silently ignored too.
        let mut stop = stop_params(&cache, 999);
        cache.terminate(&mut stop);
    }

    #[tokio::test]
    async fn test_refs_on_one_token_are_serialized() {
        let cache = new_cache();
        let mut params = start_with(
            &cache,
            8,
            json!([173, [10]]),
            json!({"array_limit": 2, "max_batch_rows": 2}),
        );
        let mut first = cache.create(&mut params, &Interruptor::new()).await.unwrap();
        let mut res = Response::new();
        first.fill_response(&mut res).await.unwrap();

        // A second ref queues on the entry mutex until the first drops.
        let second = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { continue_to_response(&cache, 8).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        drop(first);
        let res = second.await.unwrap().unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));
        assert_eq!(res.data(), &[json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_interrupted_acquisition_leaves_no_entry_behind() {
        let cache = new_cache();
        let external = Interruptor::new();
        external.pulse();

        let mut params = start(&cache, 9, json!([24, [1, 1]]));
        let err = cache.create(&mut params, &external).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted));

        // The token is reusable: nothing was left in the map.
        let mut params = start(&cache, 9, json!([24, [1, 1]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.data(), &[json!(2)]);
    }

    #[tokio::test]
    async fn test_external_interrupt_during_evaluation_terminates() {
        let cache = new_cache();
        let mut params = start(&cache, 2, json!([152, [[173, [1]]]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessPartial));

        let external = Interruptor::new();
        let pending = {
            let cache = Arc::clone(&cache);
            let external = external.clone();
            tokio::spawn(async move {
                let mut params = continue_params(&cache, 2);
                let mut query_ref = cache.get(&mut params, &external).await?;
                let mut res = Response::new();
                query_ref.fill_response(&mut res).await.map(|_| res)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        external.pulse();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Interrupted));

        // The external abort terminated the query; the entry drained
        // away when the ref dropped.
        let err = continue_to_response(&cache, 2).await.unwrap_err();
        assert_eq!(error_message(&err), "Token 2 not in stream cache.");
    }

    #[tokio::test]
    async fn test_profiled_query_attaches_a_trace() {
        let cache = new_cache();
        let mut params = start_with(&cache, 1, json!([24, [1, 2]]), json!({"profile": true}));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.data(), &[json!(3)]);
        let profile = res.profile().expect("profile trace missing");
        assert!(!profile.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grouped_query_returns_the_pseudotype() {
        let cache = new_cache();
        let rows = json!([2, [
            {"player": "alice", "score": 3},
            {"player": "bob", "score": 5},
        ]]);
        let mut params = start(&cache, 1, json!([144, [rows, "player"]]));
        let res = run_to_response(&cache, &mut params, &Interruptor::new())
            .await
            .unwrap();
        assert_eq!(res.response_type(), Some(ResponseType::SuccessAtom));
        let atom = &res.data()[0];
        assert_eq!(atom["$reql_type$"], "GROUPED_DATA");
        assert_eq!(atom["data"].as_array().unwrap().len(), 2);
    }
}
