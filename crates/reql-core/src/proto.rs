//! Wire-level protocol enums.
//!
//! The numbers are the protocol constants clients send and receive; they
//! must not change.

/// Client-to-server operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Start,
    Continue,
    Stop,
    NoreplyWait,
}

impl QueryOp {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(QueryOp::Start),
            2 => Some(QueryOp::Continue),
            3 => Some(QueryOp::Stop),
            4 => Some(QueryOp::NoreplyWait),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u64 {
        match self {
            QueryOp::Start => 1,
            QueryOp::Continue => 2,
            QueryOp::Stop => 3,
            QueryOp::NoreplyWait => 4,
        }
    }
}

/// Server-to-client response classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseType {
    pub fn to_wire(self) -> u64 {
        match self {
            ResponseType::SuccessAtom => 1,
            ResponseType::SuccessSequence => 2,
            ResponseType::SuccessPartial => 3,
            ResponseType::WaitComplete => 4,
            ResponseType::ClientError => 16,
            ResponseType::CompileError => 17,
            ResponseType::RuntimeError => 18,
        }
    }
}

/// Annotations attached to streaming responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseNote {
    SequenceFeed,
    AtomFeed,
    OrderByLimitFeed,
    UnionedFeed,
    IncludesStates,
}

impl ResponseNote {
    pub fn to_wire(self) -> u64 {
        match self {
            ResponseNote::SequenceFeed => 1,
            ResponseNote::AtomFeed => 2,
            ResponseNote::OrderByLimitFeed => 3,
            ResponseNote::UnionedFeed => 4,
            ResponseNote::IncludesStates => 5,
        }
    }
}
