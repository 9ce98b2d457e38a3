//! Convergent merge of a remote element set into a local document.
//!
//! This is the live-collaboration rule (the patch applier never calls it).
//! Per element id:
//! - only local has it → keep local
//! - only remote has it → adopt remote
//! - both → strictly higher `version` wins; ties break on higher
//!   `version_nonce`, and an exact tie on both falls back to comparing the
//!   serialized content, so every peer picks the same winner with no
//!   coordination.
//!
//! Elements whose merged content differs from the pre-merge local value get
//! their version bumped past the local one, so the next re-broadcast is
//! distinguishable from what was already sent.

use std::collections::HashMap;

use crate::element::{fresh_nonce, ElementType, SceneElement};
use crate::note;
use crate::scene::SceneState;

/// Merge `remote` into `local`, returning the merged element list.
///
/// Local ordering is preserved for surviving ids; remote-only elements are
/// appended in remote order.
pub fn reconcile_elements(
    local: &[SceneElement],
    remote: Vec<SceneElement>,
) -> Vec<SceneElement> {
    let remote = sanitize_remote(remote);

    let mut remote_by_id: HashMap<String, SceneElement> = HashMap::with_capacity(remote.len());
    let mut remote_order: Vec<String> = Vec::with_capacity(remote.len());
    for element in remote {
        if !remote_by_id.contains_key(&element.id) {
            remote_order.push(element.id.clone());
        }
        remote_by_id.insert(element.id.clone(), element);
    }

    let mut merged = Vec::with_capacity(local.len() + remote_order.len());

    for local_el in local {
        let winner = match remote_by_id.remove(&local_el.id) {
            None => local_el.clone(),
            Some(remote_el) => {
                if remote_wins(local_el, &remote_el) {
                    remote_el
                } else {
                    local_el.clone()
                }
            }
        };

        let mut winner = winner;
        if !winner.content_eq(local_el) {
            // Content changed relative to pre-merge local: make the change
            // visible to watermark-based re-broadcast.
            winner.version = winner.version.max(local_el.version + 1);
            winner.version_nonce = fresh_nonce();
        }
        merged.push(winner);
    }

    for id in remote_order {
        if let Some(element) = remote_by_id.remove(&id) {
            merged.push(element);
        }
    }

    merged
}

/// Merge remote elements into a scene and advance the version watermark.
///
/// Returns `max(watermark, max element version)` — never regresses, no
/// matter how stale or duplicated the remote set is. The whole-document
/// patch counter (`scene.version`) is untouched; it only counts applies.
pub fn reconcile_into(scene: &mut SceneState, remote: Vec<SceneElement>, watermark: u64) -> u64 {
    scene.elements = reconcile_elements(&scene.elements, remote);
    watermark.max(scene.max_element_version())
}

/// Does the remote element beat the local one?
///
/// Commutative by construction: swapping the arguments flips the result
/// unless the elements are fully identical.
fn remote_wins(local: &SceneElement, remote: &SceneElement) -> bool {
    if remote.version != local.version {
        return remote.version > local.version;
    }
    if remote.version_nonce != local.version_nonce {
        return remote.version_nonce > local.version_nonce;
    }
    // Exact (version, nonce) tie: deterministic content-order fallback.
    let local_key = local.content_fingerprint().to_string();
    let remote_key = remote.content_fingerprint().to_string();
    remote_key > local_key
}

/// Fill safe defaults on elements from peers whose editors evolved
/// independently: versions start at 1 and note content is always valid.
fn sanitize_remote(remote: Vec<SceneElement>) -> Vec<SceneElement> {
    remote
        .into_iter()
        .map(|mut element| {
            if element.version == 0 {
                element.version = 1;
            }
            if element.element_type == ElementType::Note {
                element.note_content =
                    Some(note::normalize_content(element.note_content.as_deref()));
            }
            element
        })
        .collect()
}
