//! # vellum-scene — Scene document model and patch engine
//!
//! The shared, mutable scene document (drawable/text/note elements, app
//! settings, binary assets) plus the deterministic mutation pipeline that
//! keeps it consistent under programmatic and concurrent human edits.
//!
//! ## Architecture
//!
//! ```text
//!          untyped patch JSON
//!                 │
//!                 ▼
//!          ┌─────────────┐   issues    ┌──────────────┐
//!          │  validate    │ ──────────► │ Vec<String>  │
//!          └──────┬───────┘             └──────────────┘
//!                 │ ScenePatch
//!                 ▼
//!          ┌─────────────┐   stale base? ┌─────────────┐
//!          │   apply      │ ◄──────────── │   rebase    │
//!          └──────┬───────┘               └─────────────┘
//!                 │ ApplyOutcome
//!                 ▼
//!          SceneState ◄──── reconcile ◄──── remote elements
//! ```
//!
//! Everything here is synchronous and side-effect-free on its inputs; the
//! async synchronization layer lives in `vellum-collab`.
//!
//! ## Modules
//!
//! - [`element`] — versioned scene elements, normalization
//! - [`note`] — rich-text block documents for note elements
//! - [`scene`] — the document (elements + app state + files + version)
//! - [`patch`] — op types, validation, application, rebasing
//! - [`reconcile`] — the convergent live-merge rule
//! - [`stream`] — the agent event stream (JSON lines)

pub mod element;
pub mod note;
pub mod patch;
pub mod reconcile;
pub mod scene;
pub mod stream;

pub use element::{fresh_nonce, normalize_elements, ElementType, SceneElement};
pub use note::{NoteBlock, NoteRenderCache};
pub use patch::{
    apply_patch, rebase_patch, rebase_raw, validate_and_apply, validate_patch, ApplyOutcome,
    ApplySummary, PatchOp, RebaseOutcome, ScenePatch,
};
pub use reconcile::{reconcile_elements, reconcile_into};
pub use scene::{BinaryFile, SceneState};
pub use stream::AgentEvent;
