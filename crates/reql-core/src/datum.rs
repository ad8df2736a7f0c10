//! Datum helpers.
//!
//! A datum is a JSON value; the protocol additionally defines a total
//! order over datums and a handful of client pseudotypes.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A single protocol value.
pub type Datum = Value;

/// Protocol type name of a datum, used in error messages.
pub fn type_name(datum: &Datum) -> &'static str {
    match datum {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOL",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}

fn type_rank(datum: &Datum) -> u8 {
    match datum {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over datums: null < bool < number < string < array < object.
///
/// Arrays compare lexicographically; objects compare as sorted key/value
/// pairs.
pub fn cmp_datum(a: &Datum, b: &Datum) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ax, bx) in x.iter().zip(y.iter()) {
                let ord = cmp_datum(ax, bx);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xs: Vec<_> = x.iter().collect();
            let mut ys: Vec<_> = y.iter().collect();
            xs.sort_by(|l, r| l.0.cmp(r.0));
            ys.sort_by(|l, r| l.0.cmp(r.0));
            for ((ak, av), (bk, bv)) in xs.iter().zip(ys.iter()) {
                let key = ak.cmp(bk);
                if key != Ordering::Equal {
                    return key;
                }
                let val = cmp_datum(av, bv);
                if val != Ordering::Equal {
                    return val;
                }
            }
            xs.len().cmp(&ys.len())
        }
        _ => Ordering::Equal,
    }
}

/// Render grouped data as the `GROUPED_DATA` client pseudotype.
pub fn grouped_to_client(groups: Vec<(Datum, Vec<Datum>)>) -> Datum {
    let data = groups
        .into_iter()
        .map(|(key, rows)| Value::Array(vec![key, Value::Array(rows)]))
        .collect();
    let mut obj = Map::new();
    obj.insert("$reql_type$".to_string(), Value::from("GROUPED_DATA"));
    obj.insert("data".to_string(), Value::Array(data));
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cross_type_order() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(1.5),
            json!("a"),
            json!([1]),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(cmp_datum(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_array_order_is_lexicographic() {
        assert_eq!(cmp_datum(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
        assert_eq!(cmp_datum(&json!([2]), &json!([1, 9])), Ordering::Greater);
        assert_eq!(cmp_datum(&json!([1, 2]), &json!([1, 2])), Ordering::Equal);
    }

    #[test]
    fn test_grouped_pseudotype_shape() {
        let grouped = grouped_to_client(vec![
            (json!("a"), vec![json!(1), json!(2)]),
            (json!("b"), vec![json!(3)]),
        ]);
        assert_eq!(
            grouped,
            json!({
                "$reql_type$": "GROUPED_DATA",
                "data": [["a", [1, 2]], ["b", [3]]],
            })
        );
    }
}
