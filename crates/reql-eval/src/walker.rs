//! Term-tree preprocessing.
//!
//! The walk records, for every term node, the path of frames from the
//! root down to it. Compile- and runtime errors later use the registry
//! to attach that path to the error response.

use crate::error::{EvalError, EvalResult};
use crate::term::{TermId, TermStorage};
use reql_core::backtrace::{QueryBacktrace, Frame};
use std::collections::HashMap;

const MAX_TERM_NESTING: usize = 128;

/// Source-location registry populated during term preprocessing.
#[derive(Debug, Default)]
pub struct BacktraceRegistry {
    frames: HashMap<TermId, QueryBacktrace>,
}

impl BacktraceRegistry {
    /// QueryBacktrace of the given term, or the empty backtrace if the term
    /// is unknown or absent.
    pub fn datum_backtrace(&self, term: Option<TermId>) -> QueryBacktrace {
        term.and_then(|id| self.frames.get(&id).cloned())
            .unwrap_or(QueryBacktrace::EMPTY)
    }

    fn record(&mut self, id: TermId, path: &[Frame]) {
        self.frames.insert(id, QueryBacktrace::new(path.to_vec()));
    }
}

/// Walk the term tree, annotating every node's backtrace into `registry`.
pub fn preprocess_term_tree(
    storage: &TermStorage,
    registry: &mut BacktraceRegistry,
) -> EvalResult<()> {
    let mut path = Vec::new();
    walk(storage, storage.root(), &mut path, registry)
}

fn walk(
    storage: &TermStorage,
    id: TermId,
    path: &mut Vec<Frame>,
    registry: &mut BacktraceRegistry,
) -> EvalResult<()> {
    if path.len() > MAX_TERM_NESTING {
        return Err(EvalError::runtime(
            id,
            format!("Term tree exceeds maximum nesting depth ({MAX_TERM_NESTING})."),
        ));
    }
    registry.record(id, path);

    let node = storage.node(id);
    for (index, arg) in node.args.iter().enumerate() {
        path.push(Frame::Pos(index as u32));
        walk(storage, *arg, path, registry)?;
        path.pop();
    }
    for (name, optarg) in &node.optargs {
        path.push(Frame::Opt(name.clone()));
        walk(storage, *optarg, path, registry)?;
        path.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backtrace_paths() {
        let storage = TermStorage::parse(json!([24, [1, [26, [2, 3]]], {"flag": 7}])).unwrap();
        let mut registry = BacktraceRegistry::default();
        preprocess_term_tree(&storage, &mut registry).unwrap();

        let root = storage.node(storage.root());
        assert!(registry
            .datum_backtrace(Some(storage.root()))
            .is_empty());

        let mul = storage.node(root.args[1]);
        let bt = registry.datum_backtrace(Some(root.args[1]));
        assert_eq!(bt.to_datum(), json!([1]));

        let three = mul.args[1];
        assert_eq!(
            registry.datum_backtrace(Some(three)).to_datum(),
            json!([1, 1])
        );

        let flag = root.optargs[0].1;
        assert_eq!(
            registry.datum_backtrace(Some(flag)).to_datum(),
            json!(["flag"])
        );
    }

    #[test]
    fn test_unknown_term_gets_empty_backtrace() {
        let registry = BacktraceRegistry::default();
        assert!(registry.datum_backtrace(None).is_empty());
    }
}
