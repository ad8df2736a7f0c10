//! Lowering of raw term nodes into evaluable terms.

use crate::error::{EvalError, EvalResult};
use crate::term::{TermId, TermStorage, TermType};
use std::sync::Arc;

const MAX_COMPILE_DEPTH: usize = 128;

/// Compile-time context.
///
/// The supported term set has no variable-binding terms, so this only
/// carries the nesting bound.
#[derive(Debug, Default)]
pub struct CompileEnv {
    depth: usize,
}

impl CompileEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Arithmetic operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// An evaluable term tree.
#[derive(Debug)]
pub enum CompiledTerm {
    /// Datum literal; the payload stays in the scoped term storage.
    Constant { id: TermId },
    MakeArray {
        id: TermId,
        args: Vec<Arc<CompiledTerm>>,
    },
    Arith {
        id: TermId,
        op: ArithOp,
        args: Vec<Arc<CompiledTerm>>,
    },
    /// `RANGE()`, `RANGE(n)`, or `RANGE(a, b)`.
    Range {
        id: TermId,
        args: Vec<Arc<CompiledTerm>>,
    },
    /// User-raised runtime error.
    Fail {
        id: TermId,
        message: Arc<CompiledTerm>,
    },
    /// Group a sequence by a field name.
    Group {
        id: TermId,
        seq: Arc<CompiledTerm>,
        field: Arc<CompiledTerm>,
    },
    /// Replay a finite sequence as a live change feed.
    Changes {
        id: TermId,
        seq: Arc<CompiledTerm>,
    },
}

impl CompiledTerm {
    pub fn id(&self) -> TermId {
        match self {
            CompiledTerm::Constant { id }
            | CompiledTerm::MakeArray { id, .. }
            | CompiledTerm::Arith { id, .. }
            | CompiledTerm::Range { id, .. }
            | CompiledTerm::Fail { id, .. }
            | CompiledTerm::Group { id, .. }
            | CompiledTerm::Changes { id, .. } => *id,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            CompiledTerm::Constant { .. } => TermType::Datum.name(),
            CompiledTerm::MakeArray { .. } => TermType::MakeArray.name(),
            CompiledTerm::Arith { op: ArithOp::Add, .. } => TermType::Add.name(),
            CompiledTerm::Arith { op: ArithOp::Sub, .. } => TermType::Sub.name(),
            CompiledTerm::Arith { op: ArithOp::Mul, .. } => TermType::Mul.name(),
            CompiledTerm::Arith { op: ArithOp::Div, .. } => TermType::Div.name(),
            CompiledTerm::Range { .. } => TermType::Range.name(),
            CompiledTerm::Fail { .. } => TermType::Error.name(),
            CompiledTerm::Group { .. } => TermType::Group.name(),
            CompiledTerm::Changes { .. } => TermType::Changes.name(),
        }
    }
}

/// Compile the term rooted at `id` under `env`.
pub fn compile_term(
    env: &mut CompileEnv,
    storage: &TermStorage,
    id: TermId,
) -> EvalResult<Arc<CompiledTerm>> {
    env.depth += 1;
    if env.depth > MAX_COMPILE_DEPTH {
        return Err(EvalError::runtime(
            id,
            format!("Term tree exceeds maximum nesting depth ({MAX_COMPILE_DEPTH})."),
        ));
    }
    let compiled = compile_node(env, storage, id);
    env.depth -= 1;
    compiled
}

fn compile_node(
    env: &mut CompileEnv,
    storage: &TermStorage,
    id: TermId,
) -> EvalResult<Arc<CompiledTerm>> {
    let node = storage.node(id);

    // No supported term takes optional arguments.
    if let Some((name, _)) = node.optargs.first() {
        return Err(EvalError::runtime(
            id,
            format!("Unrecognized optional argument `{name}`."),
        ));
    }

    let term = match node.ty {
        TermType::Datum => CompiledTerm::Constant { id },
        TermType::MakeArray => CompiledTerm::MakeArray {
            id,
            args: compile_args(env, storage, &node.args)?,
        },
        TermType::Add | TermType::Sub | TermType::Mul | TermType::Div => {
            check_arity(id, node.ty, &node.args, 1, usize::MAX)?;
            let op = match node.ty {
                TermType::Add => ArithOp::Add,
                TermType::Sub => ArithOp::Sub,
                TermType::Mul => ArithOp::Mul,
                _ => ArithOp::Div,
            };
            CompiledTerm::Arith {
                id,
                op,
                args: compile_args(env, storage, &node.args)?,
            }
        }
        TermType::Range => {
            check_arity(id, node.ty, &node.args, 0, 2)?;
            CompiledTerm::Range {
                id,
                args: compile_args(env, storage, &node.args)?,
            }
        }
        TermType::Error => {
            check_arity(id, node.ty, &node.args, 1, 1)?;
            CompiledTerm::Fail {
                id,
                message: compile_term(env, storage, node.args[0])?,
            }
        }
        TermType::Group => {
            check_arity(id, node.ty, &node.args, 2, 2)?;
            CompiledTerm::Group {
                id,
                seq: compile_term(env, storage, node.args[0])?,
                field: compile_term(env, storage, node.args[1])?,
            }
        }
        TermType::Changes => {
            check_arity(id, node.ty, &node.args, 1, 1)?;
            CompiledTerm::Changes {
                id,
                seq: compile_term(env, storage, node.args[0])?,
            }
        }
    };
    Ok(Arc::new(term))
}

fn compile_args(
    env: &mut CompileEnv,
    storage: &TermStorage,
    args: &[TermId],
) -> EvalResult<Vec<Arc<CompiledTerm>>> {
    args.iter()
        .map(|arg| compile_term(env, storage, *arg))
        .collect()
}

fn check_arity(
    id: TermId,
    ty: TermType,
    args: &[TermId],
    min: usize,
    max: usize,
) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if max == usize::MAX {
            format!("{min} or more arguments")
        } else if min == max {
            format!("{min} argument{}", if min == 1 { "" } else { "s" })
        } else {
            format!("between {min} and {max} arguments")
        };
        return Err(EvalError::runtime(
            id,
            format!("`{}` expected {expected} but found {}.", ty.name(), args.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(raw: serde_json::Value) -> EvalResult<Arc<CompiledTerm>> {
        let storage = TermStorage::parse(raw)?;
        let mut env = CompileEnv::new();
        compile_term(&mut env, &storage, storage.root())
    }

    #[test]
    fn test_compile_supported_terms() {
        assert!(matches!(
            *compile(json!(42)).unwrap(),
            CompiledTerm::Constant { .. }
        ));
        assert!(matches!(
            *compile(json!([24, [1, 2, 3]])).unwrap(),
            CompiledTerm::Arith { op: ArithOp::Add, .. }
        ));
        assert!(matches!(
            *compile(json!([173, []])).unwrap(),
            CompiledTerm::Range { .. }
        ));
        assert!(matches!(
            *compile(json!([152, [[173, [4]]]])).unwrap(),
            CompiledTerm::Changes { .. }
        ));
    }

    #[test]
    fn test_arity_errors_carry_the_failing_term() {
        let err = compile(json!([27, []])).unwrap_err();
        match err {
            EvalError::Runtime { message, term } => {
                assert!(message.contains("`DIV` expected 1 or more arguments"));
                assert!(term.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(compile(json!([173, [1, 2, 3]])).is_err());
        assert!(compile(json!([12, []])).is_err());
        assert!(compile(json!([144, [[173, [2]]]])).is_err());
    }

    #[test]
    fn test_unknown_optargs_are_rejected() {
        let err = compile(json!([24, [1, 2], {"left_bound": "open"}])).unwrap_err();
        assert!(err.to_string().contains("left_bound"));
    }
}
