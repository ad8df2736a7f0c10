//! Evaluation environment.

use crate::error::{EvalError, EvalResult};
use crate::interruptor::CompositeInterruptor;
use crate::profile::ProfileTrace;
use crate::term::{TermStorage, TermType};
use parking_lot::Mutex;
use reql_core::datum::{type_name, Datum};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Largest sequence that may be materialized into a single array.
pub const DEFAULT_ARRAY_LIMIT: usize = 100_000;
/// Default row bound for one client batch.
pub const DEFAULT_MAX_BATCH_ROWS: usize = 1000;

/// Global optional arguments attached to a query at `START` time.
///
/// Values must be constants; the recognized tuning keys are
/// `array_limit` and `max_batch_rows`. `noreply` and `profile` are read
/// by the connection layer before the query reaches the evaluator.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptArgs {
    values: HashMap<String, Datum>,
}

impl GlobalOptArgs {
    /// Parse the raw wire optargs record.
    pub fn parse(raw: Option<Datum>) -> EvalResult<Self> {
        let mut values = HashMap::new();
        match raw {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (name, value) in map {
                    let datum = constant_value(&name, value)?;
                    values.insert(name, datum);
                }
            }
            Some(other) => {
                return Err(EvalError::datum(format!(
                    "Expected global optional arguments as an OBJECT but found {}.",
                    type_name(&other)
                )));
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.values.get(name)
    }

    pub fn array_limit(&self) -> usize {
        self.usize_arg("array_limit", DEFAULT_ARRAY_LIMIT)
    }

    pub fn max_batch_rows(&self) -> usize {
        self.usize_arg("max_batch_rows", DEFAULT_MAX_BATCH_ROWS)
    }

    pub fn bool_arg(&self, name: &str) -> bool {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn usize_arg(&self, name: &str, default: usize) -> usize {
        self.values
            .get(name)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(default)
    }
}

/// Optarg values may arrive as bare datums or as wire-form datum terms.
fn constant_value(name: &str, value: Datum) -> EvalResult<Datum> {
    if !matches!(value, Value::Array(_)) {
        return Ok(value);
    }
    let storage = TermStorage::parse(value)?;
    let root = storage.node(storage.root());
    if root.ty == TermType::Datum {
        Ok(root.datum.clone().unwrap_or(Value::Null))
    } else {
        Err(EvalError::datum(format!(
            "Global optional argument `{name}` must be a constant value."
        )))
    }
}

/// Context threaded through every term evaluation and stream call.
#[derive(Debug, Clone)]
pub struct EvalEnv {
    pub return_empty_normal_batches: bool,
    pub interruptor: CompositeInterruptor,
    pub optargs: Arc<GlobalOptArgs>,
    /// The scoped current term storage; datum terms read their payload
    /// from here.
    pub term_storage: Arc<TermStorage>,
    pub trace: Option<Arc<Mutex<ProfileTrace>>>,
}

impl EvalEnv {
    pub fn array_limit(&self) -> usize {
        self.optargs.array_limit()
    }

    pub fn max_batch_rows(&self) -> usize {
        self.optargs.max_batch_rows()
    }
}
