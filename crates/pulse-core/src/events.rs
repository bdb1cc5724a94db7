//! Wire frames exchanged on the progress stream.
//!
//! The server pushes two kinds of JSON objects:
//!
//! - **Progress events**: untagged objects describing job state
//!   (`status`, `overall_progress`, item lists, ...). The client passes
//!   them through without interpreting them.
//! - **Control frames**: objects with a `type` of `heartbeat_response`,
//!   `connection_established`, or `restart_response`.
//!
//! The client sends a single frame kind, the [`HeartbeatProbe`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProgressError;

// ─────────────────────────────────────────────────────────────────────────────
// ProgressEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Job status reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// The job is running.
    Processing,
    /// The job finished successfully.
    Completed,
    /// The job failed.
    Error,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ProgressStatus {
    /// Status named by a wire string.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Whether the job will emit no further progress.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A server-pushed progress update for one analysis job.
///
/// Decoding never fails for a JSON object. Known keys whose values have the
/// expected shape fill the typed fields; everything else, including known
/// keys with an unexpected shape, stays in [`extra`](Self::extra) so a
/// subscriber sees the whole payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ProgressEvent {
    /// Identifier of the job's document, as the server sent it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Value>,
    /// Name of the item being analysed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    /// Index of the item being analysed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_index: Option<u64>,
    /// Number of items in the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u64>,
    /// Items finished so far, as the server sent them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed_items: Vec<Value>,
    /// Items skipped so far, as the server sent them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_items: Vec<Value>,
    /// Overall completion in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_progress: Option<f64>,
    /// Job status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProgressStatus>,
    /// Any other fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressEvent {
    /// Whether this event reports a finished job.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status.is_some_and(ProgressStatus::is_finished)
    }
}

impl From<Map<String, Value>> for ProgressEvent {
    fn from(mut map: Map<String, Value>) -> Self {
        Self {
            document_id: take(&mut map, "document_id", |v| (!v.is_null()).then(|| v.clone())),
            current_item: take(&mut map, "current_item", |v| v.as_str().map(str::to_owned)),
            current_item_index: take(&mut map, "current_item_index", Value::as_u64),
            total_items: take(&mut map, "total_items", Value::as_u64),
            completed_items: take(&mut map, "completed_items", |v| v.as_array().cloned())
                .unwrap_or_default(),
            skipped_items: take(&mut map, "skipped_items", |v| v.as_array().cloned())
                .unwrap_or_default(),
            overall_progress: take(&mut map, "overall_progress", Value::as_f64),
            status: take(&mut map, "status", |v| v.as_str().map(ProgressStatus::from_wire)),
            extra: map,
        }
    }
}

/// Remove `key` from `map` if `read` understands its value.
fn take<T>(
    map: &mut Map<String, Value>,
    key: &str,
    read: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let value = read(map.get(key)?)?;
    let _ = map.remove(key);
    Some(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// InboundFrame
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded server-to-client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Reply to a [`HeartbeatProbe`].
    HeartbeatAck {
        /// Server timestamp, in whatever format it chose.
        timestamp: Option<Value>,
    },
    /// Greeting sent right after the upgrade.
    Established {
        /// Document the server bound the stream to.
        document_id: Option<Value>,
    },
    /// Outcome of a restart requested over the stream.
    RestartAck {
        /// Whether the server restarted the job.
        success: bool,
        /// Server message.
        message: Option<String>,
    },
    /// A progress update.
    Progress(ProgressEvent),
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// Fails with [`ProgressError::MessageDecode`] only when the text is not
    /// JSON or not a JSON object.
    pub fn decode(text: &str) -> Result<Self, ProgressError> {
        let value: Value = serde_json::from_str(text)?;
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProgressError::MessageDecode {
                    message: format!("expected a JSON object, got {}", kind_of(&other)),
                });
            }
        };

        let frame = match map.get("type").and_then(Value::as_str) {
            Some("heartbeat_response") => Self::HeartbeatAck {
                timestamp: map.remove("timestamp"),
            },
            Some("connection_established") => Self::Established {
                document_id: map.remove("document_id"),
            },
            Some("restart_response") => Self::RestartAck {
                success: map.get("success").and_then(Value::as_bool).unwrap_or(false),
                message: map.get("message").and_then(Value::as_str).map(str::to_owned),
            },
            _ => Self::Progress(ProgressEvent::from(map)),
        };
        Ok(frame)
    }

    /// Whether this frame is protocol chatter rather than progress.
    #[must_use]
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HeartbeatProbe
// ─────────────────────────────────────────────────────────────────────────────

/// Client liveness probe: `{"type":"heartbeat","timestamp":<ms>}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "heartbeat")]
pub struct HeartbeatProbe {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HeartbeatProbe {
    /// Probe stamped with the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialized text frame.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
