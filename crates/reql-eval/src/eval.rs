//! Recursive evaluation of compiled terms.

use crate::compile::{ArithOp, CompiledTerm};
use crate::env::EvalEnv;
use crate::error::{EvalError, EvalResult};
use crate::stream::{ChangesFeed, DatumStream, RangeStream};
use crate::term::TermId;
use reql_core::datum::{cmp_datum, type_name, Datum};
use serde_json::Value;
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Result of evaluating a term.
pub enum Val {
    Datum(Datum),
    /// Ordered groups of rows, keyed by group value.
    Grouped(Vec<(Datum, Vec<Datum>)>),
    Seq(Box<dyn DatumStream>),
}

impl std::fmt::Debug for Val {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Val::Datum(d) => f.debug_tuple("Datum").field(d).finish(),
            Val::Grouped(g) => f.debug_tuple("Grouped").field(g).finish(),
            Val::Seq(_) => f.write_str("Seq(..)"),
        }
    }
}

impl Val {
    pub fn type_str(&self) -> &'static str {
        match self {
            Val::Datum(_) => "DATUM",
            Val::Grouped(_) => "GROUPED_DATA",
            Val::Seq(_) => "STREAM",
        }
    }
}

impl CompiledTerm {
    /// Evaluate the term. Edge-checks the interruptor at every node and
    /// records a timing event when the environment carries a trace.
    pub fn eval<'a>(
        &'a self,
        env: &'a EvalEnv,
    ) -> Pin<Box<dyn Future<Output = EvalResult<Val>> + Send + 'a>> {
        Box::pin(async move {
            env.interruptor.check()?;
            let started = Instant::now();
            let result = self.eval_inner(env).await;
            if let Some(trace) = &env.trace {
                trace
                    .lock()
                    .record(format!("Evaluating {}.", self.type_name()), started.elapsed());
            }
            result
        })
    }

    async fn eval_inner(&self, env: &EvalEnv) -> EvalResult<Val> {
        match self {
            CompiledTerm::Constant { id } => {
                Ok(Val::Datum(env.term_storage.datum(*id)?.clone()))
            }
            CompiledTerm::MakeArray { args, .. } => {
                let mut items = Vec::with_capacity(args.len());
                for arg in args {
                    items.push(eval_datum(arg, env).await?);
                }
                Ok(Val::Datum(Value::Array(items)))
            }
            CompiledTerm::Arith { id, op, args } => {
                let mut acc = eval_datum(&args[0], env).await?;
                for arg in &args[1..] {
                    let rhs = eval_datum(arg, env).await?;
                    acc = apply_arith(*op, acc, rhs, *id)?;
                }
                Ok(Val::Datum(acc))
            }
            CompiledTerm::Range { id, args } => {
                let mut bounds = Vec::with_capacity(args.len());
                for arg in args {
                    let datum = eval_datum(arg, env).await?;
                    bounds.push(integer(&datum, *id)?);
                }
                let stream: Box<dyn DatumStream> = match bounds.as_slice() {
                    [] => Box::new(RangeStream::endless()),
                    [end] => Box::new(RangeStream::new(0, *end)),
                    [start, end] => Box::new(RangeStream::new(*start, *end)),
                    _ => unreachable!("arity checked at compile time"),
                };
                Ok(Val::Seq(stream))
            }
            CompiledTerm::Fail { id, message } => {
                let datum = eval_datum(message, env).await?;
                let text = datum.as_str().ok_or_else(|| {
                    EvalError::runtime(
                        *id,
                        format!("Expected type STRING but found {}.", type_name(&datum)),
                    )
                })?;
                Err(EvalError::runtime(*id, text.to_string()))
            }
            CompiledTerm::Group { id, seq, field } => {
                let field_datum = eval_datum(field, env).await?;
                let field_name = field_datum.as_str().ok_or_else(|| {
                    EvalError::runtime(
                        *id,
                        format!("Expected type STRING but found {}.", type_name(&field_datum)),
                    )
                })?;
                let rows = eval_rows(seq, env, *id).await?;
                group_rows(rows, field_name, *id)
            }
            CompiledTerm::Changes { id, seq } => {
                let rows = eval_rows(seq, env, *id).await?;
                Ok(Val::Seq(Box::new(ChangesFeed::new(rows))))
            }
        }
    }
}

async fn eval_datum(term: &Arc<CompiledTerm>, env: &EvalEnv) -> EvalResult<Datum> {
    match term.eval(env).await? {
        Val::Datum(datum) => Ok(datum),
        other => Err(EvalError::runtime(
            term.id(),
            format!("Expected type DATUM but found {}.", other.type_str()),
        )),
    }
}

/// Materialize a term's result into rows; streams must fit the array
/// limit.
async fn eval_rows(term: &Arc<CompiledTerm>, env: &EvalEnv, id: TermId) -> EvalResult<Vec<Datum>> {
    match term.eval(env).await? {
        Val::Datum(Value::Array(rows)) => Ok(rows),
        Val::Datum(other) => Err(EvalError::runtime(
            id,
            format!("Expected type SEQUENCE but found {}.", type_name(&other)),
        )),
        Val::Grouped(_) => Err(EvalError::runtime(
            id,
            "Expected type SEQUENCE but found GROUPED_DATA.".to_string(),
        )),
        Val::Seq(stream) => stream.as_array(env).ok_or_else(|| {
            EvalError::runtime(
                id,
                "Cannot fully materialize a stream of unbounded size.".to_string(),
            )
        }),
    }
}

fn group_rows(rows: Vec<Datum>, field: &str, id: TermId) -> EvalResult<Val> {
    let mut groups: Vec<(Datum, Vec<Datum>)> = Vec::new();
    for row in rows {
        let key = row
            .get(field)
            .cloned()
            .ok_or_else(|| EvalError::runtime(id, format!("No attribute `{field}` in object.")))?;
        match groups
            .iter_mut()
            .find(|(existing, _)| cmp_datum(existing, &key) == Ordering::Equal)
        {
            Some((_, rows)) => rows.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    groups.sort_by(|a, b| cmp_datum(&a.0, &b.0));
    Ok(Val::Grouped(groups))
}

fn number(datum: &Datum, term: TermId) -> EvalResult<f64> {
    datum.as_f64().ok_or_else(|| {
        EvalError::runtime(
            term,
            format!("Expected type NUMBER but found {}.", type_name(datum)),
        )
    })
}

fn integer(datum: &Datum, term: TermId) -> EvalResult<i64> {
    let value = number(datum, term)?;
    if value.fract() != 0.0 {
        return Err(EvalError::runtime(
            term,
            format!("Number not an integer: {value}"),
        ));
    }
    Ok(value as i64)
}

fn number_datum(value: f64, term: TermId) -> EvalResult<Datum> {
    if !value.is_finite() {
        return Err(EvalError::runtime(
            term,
            format!("Non-finite number: {value}"),
        ));
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Ok(Value::from(value as i64))
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| EvalError::runtime(term, format!("Non-finite number: {value}")))
    }
}

fn apply_arith(op: ArithOp, lhs: Datum, rhs: Datum, term: TermId) -> EvalResult<Datum> {
    match op {
        ArithOp::Add => match (lhs, rhs) {
            (Value::String(a), rhs) => match rhs {
                Value::String(b) => Ok(Value::from(a + &b)),
                other => Err(EvalError::runtime(
                    term,
                    format!("Expected type STRING but found {}.", type_name(&other)),
                )),
            },
            (Value::Array(mut a), rhs) => match rhs {
                Value::Array(b) => {
                    a.extend(b);
                    Ok(Value::Array(a))
                }
                other => Err(EvalError::runtime(
                    term,
                    format!("Expected type ARRAY but found {}.", type_name(&other)),
                )),
            },
            (lhs, rhs) => {
                let a = number(&lhs, term)?;
                let b = number(&rhs, term)?;
                number_datum(a + b, term)
            }
        },
        ArithOp::Sub => {
            let a = number(&lhs, term)?;
            let b = number(&rhs, term)?;
            number_datum(a - b, term)
        }
        ArithOp::Mul => {
            let a = number(&lhs, term)?;
            let b = number(&rhs, term)?;
            number_datum(a * b, term)
        }
        ArithOp::Div => {
            let a = number(&lhs, term)?;
            let b = number(&rhs, term)?;
            if b == 0.0 {
                return Err(EvalError::runtime(term, "Cannot divide by zero."));
            }
            number_datum(a / b, term)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile_term, CompileEnv};
    use crate::interruptor::{CompositeInterruptor, Interruptor};
    use crate::term::TermStorage;
    use crate::GlobalOptArgs;
    use serde_json::json;

    async fn eval(raw: Value) -> EvalResult<Val> {
        eval_with(raw, GlobalOptArgs::default()).await
    }

    async fn eval_with(raw: Value, optargs: GlobalOptArgs) -> EvalResult<Val> {
        let storage = Arc::new(TermStorage::parse(raw)?);
        let mut compile_env = CompileEnv::new();
        let root = compile_term(&mut compile_env, &storage, storage.root())?;
        let env = EvalEnv {
            return_empty_normal_batches: false,
            interruptor: CompositeInterruptor::new(Interruptor::new(), Interruptor::new()),
            optargs: Arc::new(optargs),
            term_storage: storage,
            trace: None,
        };
        root.eval(&env).await
    }

    async fn eval_to_datum(raw: Value) -> EvalResult<Datum> {
        match eval(raw).await? {
            Val::Datum(datum) => Ok(datum),
            other => panic!("expected datum, got {}", other.type_str()),
        }
    }

    #[tokio::test]
    async fn test_arithmetic() {
        assert_eq!(eval_to_datum(json!([24, [1, 1]])).await.unwrap(), json!(2));
        assert_eq!(
            eval_to_datum(json!([25, [10, [26, [2, 3]]]])).await.unwrap(),
            json!(4)
        );
        assert_eq!(
            eval_to_datum(json!([27, [7, 2]])).await.unwrap(),
            json!(3.5)
        );
    }

    #[tokio::test]
    async fn test_add_concatenates_strings_and_arrays() {
        assert_eq!(
            eval_to_datum(json!([24, ["foo", "bar"]])).await.unwrap(),
            json!("foobar")
        );
        assert_eq!(
            eval_to_datum(json!([24, [[2, [1]], [2, [2, 3]]]]))
                .await
                .unwrap(),
            json!([1, 2, 3])
        );
    }

    #[tokio::test]
    async fn test_arith_type_and_zero_errors() {
        let err = eval(json!([24, [1, "x"]])).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected type NUMBER but found STRING."
        );

        let err = eval(json!([27, [1, 0]])).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot divide by zero.");
    }

    #[tokio::test]
    async fn test_range_yields_a_stream() {
        match eval(json!([173, [3]])).await.unwrap() {
            Val::Seq(stream) => assert_eq!(stream.feed_type(), crate::FeedType::NotFeed),
            other => panic!("expected stream, got {}", other.type_str()),
        }
    }

    #[tokio::test]
    async fn test_error_term_raises_with_its_message() {
        let err = eval(json!([12, ["boom"]])).await.unwrap_err();
        match err {
            EvalError::Runtime { message, term } => {
                assert_eq!(message, "boom");
                assert!(term.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_group_by_field() {
        let rows = json!([2, [
            {"player": "alice", "score": 3},
            {"player": "bob", "score": 5},
            {"player": "alice", "score": 7},
        ]]);
        match eval(json!([144, [rows, "player"]])).await.unwrap() {
            Val::Grouped(groups) => {
                assert_eq!(groups.len(), 2);
                assert_eq!(groups[0].0, json!("alice"));
                assert_eq!(groups[0].1.len(), 2);
                assert_eq!(groups[1].0, json!("bob"));
            }
            other => panic!("expected grouped data, got {}", other.type_str()),
        }
    }

    #[tokio::test]
    async fn test_group_missing_attribute_fails() {
        let rows = json!([2, [{"player": "alice"}, {"score": 1}]]);
        let err = eval(json!([144, [rows, "player"]])).await.unwrap_err();
        assert!(err.to_string().contains("No attribute `player`"));
    }

    #[tokio::test]
    async fn test_changes_requires_a_bounded_sequence() {
        assert!(matches!(
            eval(json!([152, [[173, [2]]]])).await.unwrap(),
            Val::Seq(_)
        ));

        let err = eval(json!([152, [[173, []]]])).await.unwrap_err();
        assert!(err.to_string().contains("unbounded"));
    }

    #[tokio::test]
    async fn test_interrupted_evaluation() {
        let storage = Arc::new(TermStorage::parse(json!([24, [1, 1]])).unwrap());
        let mut compile_env = CompileEnv::new();
        let root = compile_term(&mut compile_env, &storage, storage.root()).unwrap();
        let persistent = Interruptor::new();
        let env = EvalEnv {
            return_empty_normal_batches: false,
            interruptor: CompositeInterruptor::new(Interruptor::new(), persistent.clone()),
            optargs: Arc::new(GlobalOptArgs::default()),
            term_storage: storage,
            trace: None,
        };
        persistent.pulse();
        assert!(matches!(
            root.eval(&env).await.unwrap_err(),
            EvalError::Interrupted
        ));
    }
}
