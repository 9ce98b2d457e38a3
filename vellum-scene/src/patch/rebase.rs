//! Re-targeting a patch authored against a stale base snapshot.
//!
//! Strategy: if base and head are structurally equivalent the patch passes
//! through unchanged. Otherwise the original patch is applied to `base` to
//! materialize the intended target state, and a new patch is synthesized
//! against `head`: a full `replace_elements` snapshot, a full
//! `update_app_state` map, and a minimal file diff. Elements and app state
//! are cheap to send whole; files may be large blobs, so only those get
//! diffed.

use serde_json::Value;

use super::{apply_patch, validate_patch, PatchOp, ScenePatch};
use crate::scene::SceneState;

/// A rebased patch plus the warnings accumulated while producing it.
#[derive(Debug, Clone)]
pub struct RebaseOutcome {
    pub patch: ScenePatch,
    pub warnings: Vec<String>,
}

/// Rebase a validated patch from `base` onto `head`.
///
/// Identity when base and head are structurally equivalent.
pub fn rebase_patch(base: &SceneState, head: &SceneState, patch: &ScenePatch) -> RebaseOutcome {
    if base.structurally_equivalent(head) {
        return RebaseOutcome {
            patch: patch.clone(),
            warnings: Vec::new(),
        };
    }

    let target = apply_patch(base, patch);
    let mut warnings = target.warnings;

    let mut ops = vec![
        PatchOp::ReplaceElements {
            elements: target.scene.elements,
        },
        PatchOp::UpdateAppState {
            changes: target.scene.app_state,
        },
    ];

    // File diff: content-equal entries untouched, head-only deleted,
    // new/differing upserted.
    for (file_id, file) in &target.scene.files {
        if head.files.get(file_id) != Some(file) {
            ops.push(PatchOp::UpsertFile {
                file_id: file_id.clone(),
                file: file.clone(),
            });
        }
    }
    for file_id in head.files.keys() {
        if !target.scene.files.contains_key(file_id) {
            ops.push(PatchOp::DeleteFile {
                file_id: file_id.clone(),
            });
        }
    }

    warnings.push(
        "rebase: base diverged from head; patch rematerialized (full element/app-state snapshot, files diffed)"
            .to_string(),
    );
    log::info!(
        "rebased patch against newer scene (base v{}, head v{})",
        base.version,
        head.version
    );

    RebaseOutcome {
        patch: ScenePatch {
            ops,
            base_version: Some(head.version),
            reason: patch.reason.clone(),
            metadata: patch.metadata.clone(),
        },
        warnings,
    }
}

/// Rebase an untyped candidate patch.
///
/// Fails with the validator's issue list when the patch cannot even apply
/// to its own base.
pub fn rebase_raw(
    base: &SceneState,
    head: &SceneState,
    raw: &Value,
) -> Result<RebaseOutcome, Vec<String>> {
    let patch = validate_patch(raw)?;
    Ok(rebase_patch(base, head, &patch))
}
