//! Raw term storage.
//!
//! The wire form of a term is either a bare JSON value (a datum term) or
//! an array `[type, [args...], {optargs...}]`. Parsing flattens the tree
//! into an arena so every node has a stable id that backtrace lookups
//! and compiled terms can refer back to.

use crate::error::{EvalError, EvalResult};
use reql_core::datum::{type_name, Datum};
use serde_json::Value;

/// Stable index of a term node within its [`TermStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermId(u32);

impl TermId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Term kinds, with the wire protocol numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermType {
    Datum,
    MakeArray,
    Error,
    Add,
    Sub,
    Mul,
    Div,
    Group,
    Changes,
    Range,
}

impl TermType {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(TermType::Datum),
            2 => Some(TermType::MakeArray),
            12 => Some(TermType::Error),
            24 => Some(TermType::Add),
            25 => Some(TermType::Sub),
            26 => Some(TermType::Mul),
            27 => Some(TermType::Div),
            144 => Some(TermType::Group),
            152 => Some(TermType::Changes),
            173 => Some(TermType::Range),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TermType::Datum => "DATUM",
            TermType::MakeArray => "MAKE_ARRAY",
            TermType::Error => "ERROR",
            TermType::Add => "ADD",
            TermType::Sub => "SUB",
            TermType::Mul => "MUL",
            TermType::Div => "DIV",
            TermType::Group => "GROUP",
            TermType::Changes => "CHANGES",
            TermType::Range => "RANGE",
        }
    }
}

/// One parsed term node.
#[derive(Debug)]
pub struct TermNode {
    pub ty: TermType,
    pub datum: Option<Datum>,
    pub args: Vec<TermId>,
    pub optargs: Vec<(String, TermId)>,
}

/// Arena of parsed term nodes for one query, rooted at [`root`].
///
/// [`root`]: TermStorage::root
#[derive(Debug)]
pub struct TermStorage {
    nodes: Vec<TermNode>,
    root: TermId,
}

impl TermStorage {
    /// Parse the wire form of a query term tree.
    pub fn parse(raw: Datum) -> EvalResult<Self> {
        let mut nodes = Vec::new();
        let root = parse_node(raw, &mut nodes)?;
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> TermId {
        self.root
    }

    pub fn node(&self, id: TermId) -> &TermNode {
        &self.nodes[id.index()]
    }

    /// Raw datum of a datum term.
    pub fn datum(&self, id: TermId) -> EvalResult<&Datum> {
        self.node(id).datum.as_ref().ok_or_else(|| {
            EvalError::runtime(id, "Term has no datum payload.".to_string())
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn parse_node(raw: Datum, nodes: &mut Vec<TermNode>) -> EvalResult<TermId> {
    let id = TermId(nodes.len() as u32);
    nodes.push(TermNode {
        ty: TermType::Datum,
        datum: None,
        args: Vec::new(),
        optargs: Vec::new(),
    });

    let node = match raw {
        // A bare JSON value is a datum term; only arrays carry term structure.
        Value::Array(parts) => parse_wire_term(parts, nodes)?,
        datum => TermNode {
            ty: TermType::Datum,
            datum: Some(datum),
            args: Vec::new(),
            optargs: Vec::new(),
        },
    };
    nodes[id.index()] = node;
    Ok(id)
}

fn parse_wire_term(parts: Vec<Value>, nodes: &mut Vec<TermNode>) -> EvalResult<TermNode> {
    if parts.is_empty() || parts.len() > 3 {
        return Err(EvalError::datum(format!(
            "Expected between 1 and 3 elements in a raw term, but found {}.",
            parts.len()
        )));
    }

    let mut parts = parts.into_iter();
    let type_value = parts.next().unwrap_or(Value::Null);
    let wire_type = type_value.as_u64().ok_or_else(|| {
        EvalError::datum(format!(
            "Expected a TERM type as a NUMBER but found {}.",
            type_name(&type_value)
        ))
    })?;
    let ty = TermType::from_wire(wire_type)
        .ok_or_else(|| EvalError::datum(format!("Unrecognized TERM type ({wire_type}).")))?;

    let mut args = Vec::new();
    if let Some(raw_args) = parts.next() {
        match raw_args {
            Value::Array(items) => {
                for item in items {
                    args.push(parse_node(item, nodes)?);
                }
            }
            other => {
                return Err(EvalError::datum(format!(
                    "Expected term arguments as an ARRAY but found {}.",
                    type_name(&other)
                )));
            }
        }
    }

    let mut optargs = Vec::new();
    if let Some(raw_optargs) = parts.next() {
        match raw_optargs {
            Value::Object(map) => {
                for (name, value) in map {
                    let child = parse_node(value, nodes)?;
                    optargs.push((name, child));
                }
            }
            other => {
                return Err(EvalError::datum(format!(
                    "Expected term optional arguments as an OBJECT but found {}.",
                    type_name(&other)
                )));
            }
        }
    }

    Ok(TermNode {
        ty,
        datum: None,
        args,
        optargs,
    })
}
