//! Last-known-value tracking per variable
//!
//! A detector lives for exactly one session. The engine builds a fresh one
//! after every reconnect, so the first observation of each variable in a
//! session is always recorded as a baseline.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{ChangeRecord, ObservedValue, Value};

/// Tracks the last value seen for each identifier
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_values: Mutex<HashMap<String, Value>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare an observation against the last known value
    ///
    /// Returns a record only when the value is new for this session or
    /// differs from the last one. A transition to or from `Null` counts.
    pub fn observe(&self, observed: &ObservedValue) -> Option<ChangeRecord> {
        let mut last_values = self.last_values.lock().unwrap_or_else(|e| e.into_inner());

        match last_values.get_mut(observed.key()) {
            Some(previous) if previous.same_as(&observed.value) => None,
            Some(previous) => {
                let old = std::mem::replace(previous, observed.value.clone());
                Some(ChangeRecord::from_observation(observed, Some(old)))
            }
            None => {
                last_values.insert(observed.key().to_string(), observed.value.clone());
                Some(ChangeRecord::from_observation(observed, None))
            }
        }
    }

    /// Record an observation unconditionally
    ///
    /// Used for pushed notifications: the endpoint already decided the
    /// value changed, so no local filtering applies.
    pub fn record(&self, observed: &ObservedValue) -> ChangeRecord {
        let mut last_values = self.last_values.lock().unwrap_or_else(|e| e.into_inner());
        let previous = last_values.insert(observed.key().to_string(), observed.value.clone());
        ChangeRecord::from_observation(observed, previous)
    }

    /// Last value seen for `identifier`
    pub fn last_value(&self, identifier: &str) -> Option<Value> {
        self.last_values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .cloned()
    }

    /// Forget everything
    pub fn reset(&self) {
        self.last_values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
