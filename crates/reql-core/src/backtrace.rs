//! QueryBacktrace paths attached to error responses.

use crate::datum::Datum;

/// One step in the path from the root term to a nested term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Positional argument index.
    Pos(u32),
    /// Optional argument name.
    Opt(String),
}

/// Path of frames identifying the term a failure originated from.
///
/// Rendered to clients as an array of integers and strings, e.g.
/// `[0, 1, "default"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBacktrace {
    frames: Vec<Frame>,
}

impl QueryBacktrace {
    pub const EMPTY: QueryBacktrace = QueryBacktrace { frames: Vec::new() };

    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Client rendering of the path.
    pub fn to_datum(&self) -> Datum {
        Datum::Array(
            self.frames
                .iter()
                .map(|frame| match frame {
                    Frame::Pos(index) => Datum::from(*index),
                    Frame::Opt(name) => Datum::from(name.as_str()),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backtrace_rendering() {
        let bt = QueryBacktrace::new(vec![
            Frame::Pos(0),
            Frame::Opt("default".to_string()),
            Frame::Pos(2),
        ]);
        assert_eq!(bt.to_datum(), json!([0, "default", 2]));
        assert!(!bt.is_empty());
        assert!(QueryBacktrace::EMPTY.is_empty());
    }
}
