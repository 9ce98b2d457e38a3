//! Agent event stream: one JSON object per line, server → client.
//!
//! This is the surface an automated collaborator speaks while producing a
//! patch: text tokens, tool activity, the patch itself, and terminal
//! warning/error/done markers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::ScenePatch;

/// One event on the agent stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    Token {
        content: String,
    },
    ToolStart {
        tool_name: String,
        call_id: String,
        input: Value,
    },
    ToolResult {
        tool_name: String,
        call_id: String,
        output: Value,
    },
    ScenePatch {
        patch: ScenePatch,
        scene_version: u64,
    },
    Warning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Error {
        message: String,
        code: String,
        retryable: bool,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
}

impl AgentEvent {
    /// Serialize to a single JSON line (no trailing newline).
    pub fn encode_line(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| e.to_string())
    }

    /// Parse one line of the stream.
    pub fn decode_line(line: &str) -> Result<AgentEvent, String> {
        serde_json::from_str(line.trim()).map_err(|e| e.to_string())
    }
}
