//! The response record populated by `fill_response`.

use reql_core::backtrace::QueryBacktrace;
use reql_core::datum::Datum;
use reql_core::error::Error;
use reql_core::proto::{ResponseNote, ResponseType};
use serde_json::{Map, Value};

/// Server response for one client frame.
#[derive(Debug, Default)]
pub struct Response {
    response_type: Option<ResponseType>,
    data: Vec<Datum>,
    notes: Vec<ResponseNote>,
    profile: Option<Datum>,
    error_backtrace: Option<QueryBacktrace>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a boundary error as the matching wire response.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Reql {
                kind,
                message,
                bt,
            } => Self {
                response_type: Some(kind.response_type()),
                data: vec![Value::from(message.as_str())],
                notes: Vec::new(),
                profile: None,
                error_backtrace: Some(bt.clone()),
            },
            Error::Interrupted => Self {
                response_type: Some(ResponseType::RuntimeError),
                data: vec![Value::from(
                    "Query interrupted.  Did you shut down the server?",
                )],
                notes: Vec::new(),
                profile: None,
                error_backtrace: Some(QueryBacktrace::EMPTY),
            },
        }
    }

    pub fn set_type(&mut self, response_type: ResponseType) {
        self.response_type = Some(response_type);
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        self.response_type
    }

    pub fn set_data(&mut self, data: Vec<Datum>) {
        self.data = data;
    }

    pub fn data(&self) -> &[Datum] {
        &self.data
    }

    pub fn add_note(&mut self, note: ResponseNote) {
        self.notes.push(note);
    }

    pub fn notes(&self) -> &[ResponseNote] {
        &self.notes
    }

    pub fn set_profile(&mut self, profile: Datum) {
        self.profile = Some(profile);
    }

    pub fn profile(&self) -> Option<&Datum> {
        self.profile.as_ref()
    }

    pub fn clear(&mut self) {
        *self = Response::new();
    }

    /// Wire rendering: `{t, r, n?, p?, b?}`.
    pub fn to_wire(&self) -> Datum {
        let mut obj = Map::new();
        let response_type = self
            .response_type
            .unwrap_or(ResponseType::RuntimeError)
            .to_wire();
        obj.insert("t".to_string(), Value::from(response_type));
        obj.insert("r".to_string(), Value::Array(self.data.clone()));
        if !self.notes.is_empty() {
            obj.insert(
                "n".to_string(),
                Value::Array(
                    self.notes
                        .iter()
                        .map(|note| Value::from(note.to_wire()))
                        .collect(),
                ),
            );
        }
        if let Some(profile) = &self.profile {
            obj.insert("p".to_string(), profile.clone());
        }
        if let Some(backtrace) = &self.error_backtrace {
            obj.insert("b".to_string(), backtrace.to_datum());
        }
        Value::Object(obj)
    }
}
