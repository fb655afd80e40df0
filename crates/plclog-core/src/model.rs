//! Data model shared by acquisition, detection and persistence
//!
//! ```text
//! VariableDescriptor ──resolve──► ResolvedHandle ──read/push──► ObservedValue
//!                                                                   │
//!                                                          ChangeDetector
//!                                                                   ▼
//!                                              ChangeRecord ──► LogEntry (one line)
//! ```

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::catalog::VariableDescriptor;
use crate::traits::transport::LiveHandle;

/// Decoded scalar value of a variable
///
/// `Null` stands for "no value": a per-variable read failure inside an
/// otherwise successful batch, or a bad status pushed by the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Value {
    /// Returns `true` for [`Value::Null`]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality on the decoded scalar
    ///
    /// Two NaN floats are the same value; otherwise this is `==`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) if a.is_nan() && b.is_nan() => true,
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Null => f.write_str("null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Data type reported by the endpoint when a variable is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Boolean,
    Int32,
    Float,
    #[default]
    Unknown,
}

/// A catalog entry bound to a live, session-scoped handle
///
/// Only valid for the session that produced it. Nothing outside
/// [`SessionState`](crate::engine::session::SessionState) keeps these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHandle {
    pub descriptor: VariableDescriptor,
    pub live_handle: LiveHandle,
    pub data_kind: DataKind,
}

/// One value seen for one variable, by a read cycle or a push notification
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedValue {
    pub handle: ResolvedHandle,
    pub value: Value,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub local_timestamp: DateTime<Utc>,
}

impl ObservedValue {
    /// Key used by the change detector
    pub fn key(&self) -> &str {
        &self.handle.descriptor.identifier
    }
}

/// A detected value transition
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub variable: String,
    pub identifier: String,
    pub data_kind: DataKind,
    /// `None` on the first observation of a session
    pub previous_value: Option<Value>,
    pub current_value: Value,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub local_timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub(crate) fn from_observation(observed: &ObservedValue, previous_value: Option<Value>) -> Self {
        Self {
            variable: observed.handle.descriptor.display_name.clone(),
            identifier: observed.handle.descriptor.identifier.clone(),
            data_kind: observed.handle.data_kind,
            previous_value,
            current_value: observed.value.clone(),
            source_timestamp: observed.source_timestamp,
            server_timestamp: observed.server_timestamp,
            local_timestamp: observed.local_timestamp,
        }
    }
}

/// One line of the durable log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Change(ChangeEntry),
    Snapshot(SnapshotEntry),
}

impl LogEntry {
    /// Session that wrote this entry
    pub fn session_id(&self) -> Uuid {
        match self {
            LogEntry::Change(e) => e.session_id,
            LogEntry::Snapshot(e) => e.session_id,
        }
    }

    /// Position of this entry within its session
    pub fn seq(&self) -> u64 {
        match self {
            LogEntry::Change(e) => e.seq,
            LogEntry::Snapshot(e) => e.seq,
        }
    }

    /// Replay key; a repeated key is a duplicate write of the same entry
    pub fn replay_key(&self) -> (Uuid, u64) {
        (self.session_id(), self.seq())
    }
}

/// Persisted form of a [`ChangeRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub session_id: Uuid,
    pub seq: u64,
    pub variable: String,
    pub identifier: String,
    #[serde(default)]
    pub data_kind: DataKind,
    pub previous_value: Value,
    pub current_value: Value,
    /// First observation of this variable in its session
    #[serde(default)]
    pub baseline: bool,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub local_timestamp: DateTime<Utc>,
}

impl ChangeEntry {
    pub fn new(session_id: Uuid, seq: u64, record: ChangeRecord) -> Self {
        let baseline = record.previous_value.is_none();
        Self {
            session_id,
            seq,
            variable: record.variable,
            identifier: record.identifier,
            data_kind: record.data_kind,
            previous_value: record.previous_value.unwrap_or(Value::Null),
            current_value: record.current_value,
            baseline,
            source_timestamp: record.source_timestamp.map(millis),
            server_timestamp: record.server_timestamp.map(millis),
            local_timestamp: millis(record.local_timestamp),
        }
    }
}

/// Full-catalog read written as a single entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub session_id: Uuid,
    pub seq: u64,
    pub local_timestamp: DateTime<Utc>,
    /// Keyed by display name
    pub values: BTreeMap<String, Value>,
}

impl SnapshotEntry {
    pub fn new(
        session_id: Uuid,
        seq: u64,
        local_timestamp: DateTime<Utc>,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            session_id,
            seq,
            local_timestamp: millis(local_timestamp),
            values,
        }
    }
}

/// Log timestamps carry millisecond precision
fn millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}
