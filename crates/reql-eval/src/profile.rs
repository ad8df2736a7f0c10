//! Profiling trace collected while a profiled query executes.

use reql_core::datum::Datum;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug)]
struct TraceEvent {
    description: String,
    duration: Duration,
}

/// Per-term timing events, rendered into the response's `profile` field.
#[derive(Debug, Default)]
pub struct ProfileTrace {
    events: Vec<TraceEvent>,
}

impl ProfileTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, description: impl Into<String>, duration: Duration) {
        self.events.push(TraceEvent {
            description: description.into(),
            duration,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_datum(&self) -> Datum {
        Value::Array(
            self.events
                .iter()
                .map(|event| {
                    json!({
                        "description": event.description,
                        "duration(ms)": event.duration.as_secs_f64() * 1000.0,
                    })
                })
                .collect(),
        )
    }
}
