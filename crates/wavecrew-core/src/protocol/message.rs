//! Wire message types exchanged with worker subprocesses.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The fixed protocol vocabulary.
///
/// Client-to-worker: `initialize`, `execute_task`, `cancel_task`, `shutdown`,
/// `list_tools`. Worker-to-client: `initialized`, `task_started`, `tool_use`,
/// `progress`, `task_complete`, `task_error`, `log`, `tools_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Initialize,
    ExecuteTask,
    CancelTask,
    Shutdown,
    ListTools,
    Initialized,
    TaskStarted,
    ToolUse,
    Progress,
    TaskComplete,
    TaskError,
    Log,
    ToolsResponse,
}

impl MessageType {
    /// Wire name of this message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::ExecuteTask => "execute_task",
            Self::CancelTask => "cancel_task",
            Self::Shutdown => "shutdown",
            Self::ListTools => "list_tools",
            Self::Initialized => "initialized",
            Self::TaskStarted => "task_started",
            Self::ToolUse => "tool_use",
            Self::Progress => "progress",
            Self::TaskComplete => "task_complete",
            Self::TaskError => "task_error",
            Self::Log => "log",
            Self::ToolsResponse => "tools_response",
        }
    }

    /// Whether the message type flows from the client to the worker.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            Self::Initialize | Self::ExecuteTask | Self::CancelTask | Self::Shutdown | Self::ListTools
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown message type: {s:?}"))
    }
}

/// A single protocol message: `{type, id, timestamp, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub id: String,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(kind: MessageType, id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            id: id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Read a string field from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Read a list of strings from the payload, ignoring non-string entries.
    pub fn payload_strings(&self, key: &str) -> Vec<String> {
        self.payload
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build a payload map from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty payload.
pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// A tool advertised by a worker in a `tools_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(default = "default_tool_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
}

fn default_tool_name() -> String {
    "unknown".to_string()
}

/// Timestamps are written as RFC 3339. Naive ISO-8601 input (no offset) is
/// accepted and read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}
