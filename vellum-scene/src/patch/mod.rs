//! Structured mutation batches and the validate/apply/rebase pipeline.
//!
//! A [`ScenePatch`] is an ordered, non-empty list of [`PatchOp`]s. The op
//! set is closed: every consumer matches exhaustively so a new op kind
//! cannot be silently ignored.
//!
//! Pipeline:
//! ```text
//! untyped JSON ──► validate ──► ScenePatch ──► apply ──► ApplyOutcome
//!                     │                          ▲
//!                     └── Vec<String> issues     │
//!                                                │
//!            stale base? ──► rebase (materialize target, diff files)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::element::SceneElement;
use crate::scene::BinaryFile;

pub mod apply;
pub mod rebase;
pub mod validate;

pub use apply::{apply_patch, validate_and_apply, ApplyOutcome, ApplySummary};
pub use rebase::{rebase_patch, rebase_raw, RebaseOutcome};
pub use validate::validate_patch;

/// One mutation within a patch.
///
/// Wire shape: JSON objects tagged by an `op` field, camelCase field names
/// (`fileId`, `noteContent`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PatchOp {
    AddElement {
        element: SceneElement,
    },
    UpdateElement {
        id: String,
        changes: Map<String, Value>,
    },
    DeleteElement {
        id: String,
    },
    /// Full snapshot, not a diff: unconditionally replaces the element list.
    ReplaceElements {
        elements: Vec<SceneElement>,
    },
    UpdateAppState {
        changes: Map<String, Value>,
    },
    UpsertFile {
        file_id: String,
        file: BinaryFile,
    },
    DeleteFile {
        file_id: String,
    },
    NoteSetContent {
        id: String,
        note_content: String,
    },
    NoteFromText {
        id: String,
        text: String,
    },
    NoteFromMarkdown {
        id: String,
        markdown: String,
    },
}

/// An atomic, typed mutation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePatch {
    pub ops: Vec<PatchOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ScenePatch {
    pub fn new(ops: Vec<PatchOp>) -> Self {
        Self {
            ops,
            base_version: None,
            reason: None,
            metadata: None,
        }
    }
}
