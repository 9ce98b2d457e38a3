//! The shared scene document: elements + app settings + binary assets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::element::{normalize_elements, SceneElement};

/// One binary asset (image bytes, etc.) referenced by elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryFile {
    pub mime_type: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl BinaryFile {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            created: 0,
            data,
        }
    }
}

/// The whole document.
///
/// `version` counts successful patch applications and is independent from
/// per-element versions. Files use a BTreeMap so diff-derived file ops come
/// out in a deterministic order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SceneState {
    #[serde(default)]
    pub elements: Vec<SceneElement>,
    #[serde(default)]
    pub app_state: Map<String, Value>,
    #[serde(default)]
    pub files: BTreeMap<String, BinaryFile>,
    #[serde(default)]
    pub version: u64,
}

impl SceneState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, id: &str) -> Option<&SceneElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn element_mut(&mut self, id: &str) -> Option<&mut SceneElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    /// Highest element version in the document (0 when empty).
    pub fn max_element_version(&self) -> u64 {
        self.elements.iter().map(|e| e.version).max().unwrap_or(0)
    }

    /// Order-independent structural comparison of normalized elements,
    /// app state, and files. Elements compare by content fingerprint, so
    /// version bookkeeping (version, nonce) does not affect equivalence.
    /// Used by the rebaser's fast path.
    pub fn structurally_equivalent(&self, other: &SceneState) -> bool {
        if self.app_state != other.app_state || self.files != other.files {
            return false;
        }
        let (mut a, _) = normalize_elements(self.elements.clone());
        let (mut b, _) = normalize_elements(other.elements.clone());
        if a.len() != b.len() {
            return false;
        }
        a.sort_by(|x, y| x.id.cmp(&y.id));
        b.sort_by(|x, y| x.id.cmp(&y.id));
        a.iter().zip(b.iter()).all(|(x, y)| x.content_eq(y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementType;

    #[test]
    fn test_element_lookup() {
        let mut scene = SceneState::new();
        scene
            .elements
            .push(SceneElement::new("r1", ElementType::Rectangle));
        assert!(scene.element("r1").is_some());
        assert!(scene.element("r2").is_none());
    }

    #[test]
    fn test_structural_equivalence_ignores_order() {
        let a = SceneElement::new("a", ElementType::Rectangle);
        let b = SceneElement::new("b", ElementType::Ellipse);

        let mut left = SceneState::new();
        left.elements = vec![a.clone(), b.clone()];
        let mut right = SceneState::new();
        right.elements = vec![b, a];

        assert!(left.structurally_equivalent(&right));
    }

    #[test]
    fn test_structural_equivalence_detects_file_diff() {
        let mut left = SceneState::new();
        let mut right = SceneState::new();
        right
            .files
            .insert("f1".to_string(), BinaryFile::new("image/png", vec![1]));
        assert!(!left.structurally_equivalent(&right));
        left.files
            .insert("f1".to_string(), BinaryFile::new("image/png", vec![1]));
        assert!(left.structurally_equivalent(&right));
    }

    #[test]
    fn test_max_element_version() {
        let mut scene = SceneState::new();
        assert_eq!(scene.max_element_version(), 0);

        let mut el = SceneElement::new("a", ElementType::Rectangle);
        el.version = 7;
        scene.elements.push(el);
        assert_eq!(scene.max_element_version(), 7);
    }
}
