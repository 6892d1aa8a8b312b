//! Reassembles streamed tool-call fragments.
//!
//! Providers stream a tool call as a first fragment carrying its id and name, followed by
//! argument fragments that share the same `index`. Nothing is released until the stream ends.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A complete tool call, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Arguments as JSON; empty or malformed input is treated as `{}`.
    pub fn parsed_arguments(&self) -> Value {
        if self.arguments.trim().is_empty() {
            return json!({});
        }
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| json!({}))
    }

    /// The `tool_calls` entry echoed back to the provider in the follow-up request.
    pub fn to_request_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": { "name": self.name, "arguments": self.arguments },
        })
    }
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn push(&mut self, delta: ToolCallDelta) {
        let function = delta.function.unwrap_or_default();
        let index = delta.index;

        match self.calls.get_mut(&index) {
            Some(call) => {
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
                if call.name.is_empty() {
                    if let Some(name) = function.name {
                        call.name = name;
                    }
                }
            }
            None => {
                let id = delta
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}_{index}", Utc::now().timestamp_millis()));
                self.calls.insert(
                    index,
                    ToolCall {
                        id,
                        name: function.name.unwrap_or_default(),
                        arguments: function.arguments.unwrap_or_default(),
                    },
                );
            }
        }
    }

    /// Feed every entry of a `delta.tool_calls` array. Entries that do not parse are ignored.
    pub fn push_json(&mut self, tool_calls: &Value) {
        let Some(entries) = tool_calls.as_array() else {
            return;
        };
        for entry in entries {
            if let Ok(delta) = serde_json::from_value::<ToolCallDelta>(entry.clone()) {
                self.push(delta);
            }
        }
    }

    /// Buffered calls ordered by index.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls.into_values().collect()
    }
}
