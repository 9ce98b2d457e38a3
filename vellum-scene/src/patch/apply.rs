//! Patch application: a left-to-right reduction over ops.
//!
//! Per-op irregularities (missing target, type mismatch, duplicate id) are
//! warnings, never errors — a batch may target elements a concurrent edit
//! already removed, and partial observable success beats all-or-nothing
//! rejection. Only upstream validation failures are hard errors.
//!
//! Elements whose content an op changes get their per-element version
//! bumped (and nonce refreshed), matching what the live reconciler does on
//! merge, so programmatic edits are visible to the broadcast watermark
//! filter. The whole-document version bumps by exactly 1 per apply call.

use serde_json::Value;
use std::collections::HashSet;

use super::{PatchOp, ScenePatch};
use crate::element::{fresh_nonce, normalize_elements, ElementType, SceneElement};
use crate::note;
use crate::scene::SceneState;

/// Running counts of what an apply call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub notes_updated: usize,
    pub files_upserted: usize,
    pub files_deleted: usize,
}

/// Result of a successful apply: the new document, counts, and soft issues.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub scene: SceneState,
    pub summary: ApplySummary,
    pub warnings: Vec<String>,
}

/// Validate an untyped patch, then apply it. The only hard-failure path.
pub fn validate_and_apply(scene: &SceneState, raw: &Value) -> Result<ApplyOutcome, Vec<String>> {
    let patch = super::validate_patch(raw)?;
    Ok(apply_patch(scene, &patch))
}

/// Apply a validated patch to a scene, producing a new scene.
///
/// The input scene is untouched; ops reduce over a working copy.
pub fn apply_patch(scene: &SceneState, patch: &ScenePatch) -> ApplyOutcome {
    let mut working = scene.clone();
    let mut summary = ApplySummary::default();
    let mut warnings = Vec::new();

    for op in &patch.ops {
        match op {
            PatchOp::AddElement { element } => {
                apply_add(&mut working, element.clone(), &mut summary, &mut warnings);
            }

            PatchOp::UpdateElement { id, changes } => {
                match working.element(id).cloned() {
                    None => warnings.push(format!(
                        "update_element: no element with id \"{id}\"; skipped"
                    )),
                    Some(existing) => match existing.merged_with(changes) {
                        Err(e) => warnings.push(format!(
                            "update_element: changes for \"{id}\" rejected: {e}"
                        )),
                        Ok(mut merged) => {
                            if merged.content_eq(&existing) {
                                // No observable change; don't count or bump.
                            } else {
                                merged.version = merged.version.max(existing.version + 1);
                                merged.version_nonce = fresh_nonce();
                                if let Some(slot) = working.element_mut(id) {
                                    *slot = merged;
                                }
                                summary.updated += 1;
                            }
                        }
                    },
                }
            }

            PatchOp::DeleteElement { id } => {
                let before = working.elements.len();
                working.elements.retain(|e| e.id != *id);
                if working.elements.len() < before {
                    summary.deleted += 1;
                } else {
                    warnings.push(format!(
                        "delete_element: no element with id \"{id}\"; skipped"
                    ));
                }
            }

            PatchOp::ReplaceElements { elements } => {
                apply_replace(&mut working, elements.clone(), &mut summary, &mut warnings);
            }

            PatchOp::UpdateAppState { changes } => {
                for (key, value) in changes {
                    working.app_state.insert(key.clone(), value.clone());
                }
            }

            PatchOp::UpsertFile { file_id, file } => {
                working.files.insert(file_id.clone(), file.clone());
                summary.files_upserted += 1;
            }

            PatchOp::DeleteFile { file_id } => {
                if working.files.remove(file_id).is_some() {
                    summary.files_deleted += 1;
                } else {
                    warnings.push(format!(
                        "delete_file: no file with id \"{file_id}\"; skipped"
                    ));
                }
            }

            PatchOp::NoteSetContent { id, note_content } => {
                match note::parse_blocks(note_content) {
                    None => warnings.push(format!(
                        "note_set_content: invalid block content for \"{id}\"; skipped"
                    )),
                    Some(blocks) => {
                        set_note_content(&mut working, id, &blocks, &mut summary, &mut warnings, "note_set_content");
                    }
                }
            }

            PatchOp::NoteFromText { id, text } => {
                let blocks = note::blocks_from_text(text);
                set_note_content(&mut working, id, &blocks, &mut summary, &mut warnings, "note_from_text");
            }

            PatchOp::NoteFromMarkdown { id, markdown } => {
                let blocks = note::blocks_from_markdown(markdown);
                set_note_content(&mut working, id, &blocks, &mut summary, &mut warnings, "note_from_markdown");
            }
        }
    }

    let (normalized, norm_warnings) = normalize_elements(std::mem::take(&mut working.elements));
    working.elements = normalized;
    warnings.extend(norm_warnings);

    // Exactly +1 per apply call, regardless of op count.
    working.version = scene.version + 1;

    if !warnings.is_empty() {
        log::debug!("apply_patch: {} warning(s)", warnings.len());
    }

    ApplyOutcome {
        scene: working,
        summary,
        warnings,
    }
}

fn apply_add(
    working: &mut SceneState,
    element: SceneElement,
    summary: &mut ApplySummary,
    warnings: &mut Vec<String>,
) {
    let (mut normalized, norm_warnings) = normalize_elements(vec![element]);
    warnings.extend(norm_warnings);
    let mut element = match normalized.pop() {
        Some(e) => e,
        None => return,
    };

    match working.element(&element.id).cloned() {
        None => {
            working.elements.push(element);
            summary.added += 1;
        }
        Some(existing) => {
            warnings.push(format!(
                "add_element: element \"{}\" already exists; overwriting",
                element.id
            ));
            if !element.content_eq(&existing) {
                element.version = element.version.max(existing.version + 1);
                element.version_nonce = fresh_nonce();
            }
            if let Some(slot) = working.element_mut(&existing.id) {
                *slot = element;
            }
            summary.updated += 1;
        }
    }
}

fn apply_replace(
    working: &mut SceneState,
    elements: Vec<SceneElement>,
    summary: &mut ApplySummary,
    warnings: &mut Vec<String>,
) {
    let (mut incoming, norm_warnings) = normalize_elements(elements);
    warnings.extend(norm_warnings);

    let old_ids: HashSet<String> = working.elements.iter().map(|e| e.id.clone()).collect();
    let new_ids: HashSet<String> = incoming.iter().map(|e| e.id.clone()).collect();

    for element in &mut incoming {
        match working.element(&element.id) {
            None => summary.added += 1,
            Some(previous) => {
                if element.content_eq(previous) {
                    // A snapshot built from a stale read may carry an older
                    // version for unchanged content. Versions never move
                    // backward through a replace: a regression here would
                    // put later edits below the broadcast watermark and
                    // lose them at peer reconcile.
                    element.version = element.version.max(previous.version);
                    element.version_nonce = previous.version_nonce;
                } else {
                    element.version = element.version.max(previous.version + 1);
                    element.version_nonce = fresh_nonce();
                    summary.updated += 1;
                }
            }
        }
    }
    summary.deleted += old_ids.difference(&new_ids).count();

    working.elements = incoming;
}

fn set_note_content(
    working: &mut SceneState,
    id: &str,
    blocks: &[note::NoteBlock],
    summary: &mut ApplySummary,
    warnings: &mut Vec<String>,
    op_name: &str,
) {
    let element = match working.element_mut(id) {
        Some(e) => e,
        None => {
            warnings.push(format!("{op_name}: no element with id \"{id}\"; skipped"));
            return;
        }
    };
    if element.element_type != ElementType::Note {
        warnings.push(format!(
            "{op_name}: element \"{id}\" is not a note; skipped"
        ));
        return;
    }

    let content = note::serialize_blocks(blocks);
    if element.note_content.as_deref() == Some(content.as_str()) {
        return;
    }
    element.note_content = Some(content);
    element.touch();
    summary.notes_updated += 1;
}
