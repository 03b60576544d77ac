use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// A structured message taken off the event stream.
///
/// Keys are whatever the producer sent. `timestamp` is always present: the
/// consumer stamps receipt time when the producer left it out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(serde_json::Map<String, serde_json::Value>);

impl Event {
    pub fn from_fields(mut fields: serde_json::Map<String, serde_json::Value>) -> Self {
        if !fields.contains_key("timestamp") {
            fields.insert("timestamp".into(), serde_json::json!(now_epoch_secs()));
        }
        Self(fields)
    }

    /// Decodes a raw stream payload. Only JSON objects are events.
    pub fn decode(raw: &[u8]) -> Result<Self, String> {
        match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(fields)) => Ok(Self::from_fields(fields)),
            Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
            Err(e) => Err(format!("invalid event json: {e}")),
        }
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.0.get("timestamp").and_then(serde_json::Value::as_f64)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// Most-recent-N store of stream events, oldest at the front.
///
/// One writer (the stream consumer) and many readers (context gathering).
/// Reads copy out a snapshot so no lock is held past the call.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: Event) {
        if self.capacity == 0 {
            return;
        }
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The `n` newest events, newest first.
    pub fn recent(&self, n: usize) -> Vec<Event> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every mutation leaves the deque valid, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn now_epoch_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
