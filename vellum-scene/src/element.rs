//! Scene element model: versioned, soft-deletable drawable/text units.
//!
//! Every element carries a `(version, version_nonce)` pair. The version
//! increases on each content-affecting mutation; the nonce is a random
//! tie-breaker so that concurrent edits with equal versions still resolve
//! to the same winner on every peer (see [`crate::reconcile`]).

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::note;

/// Closed set of element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Rectangle,
    Ellipse,
    Diamond,
    Arrow,
    Line,
    Freedraw,
    Text,
    Note,
    Image,
    Frame,
    Embed,
}

/// One drawable/text/note unit in the scene.
///
/// Unknown fields from other editors land in `extra` (flattened), so an
/// element round-trips losslessly through peers with richer schemas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneElement {
    pub id: String,

    #[serde(rename = "type")]
    pub element_type: ElementType,

    /// Increases on every content-affecting mutation.
    #[serde(default = "default_version")]
    pub version: u64,

    /// Random tie-breaker for equal versions.
    #[serde(default)]
    pub version_nonce: u64,

    #[serde(default)]
    pub is_deleted: bool,

    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub angle: f32,

    /// Serialized rich-text blocks; always present and valid for note
    /// elements after normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_content: Option<String>,

    /// Type-specific style fields (stroke, fill, fileId, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u64 {
    1
}

/// Fresh random nonce for version tie-breaking.
pub fn fresh_nonce() -> u64 {
    rand::thread_rng().gen()
}

impl SceneElement {
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            version: 1,
            version_nonce: fresh_nonce(),
            is_deleted: false,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            angle: 0.0,
            note_content: None,
            extra: Map::new(),
        }
    }

    pub fn with_bounds(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    /// JSON value of this element with `version`/`versionNonce` stripped.
    ///
    /// Two elements with equal fingerprints are content-identical even if
    /// their version bookkeeping differs.
    pub fn content_fingerprint(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.remove("version");
            map.remove("versionNonce");
        }
        value
    }

    /// Content equality, ignoring version bookkeeping.
    pub fn content_eq(&self, other: &SceneElement) -> bool {
        self.content_fingerprint() == other.content_fingerprint()
    }

    /// Mark a content-affecting mutation: bump version, refresh nonce.
    pub fn touch(&mut self) {
        self.version += 1;
        self.version_nonce = fresh_nonce();
    }

    /// Shallow-merge a change map onto this element.
    ///
    /// Changes overlay the element's JSON representation key-by-key; the
    /// original id always survives. Fails (with a message, not a panic) if
    /// the merged object no longer parses as an element, e.g. a change set
    /// an unknown `type`.
    pub fn merged_with(&self, changes: &Map<String, Value>) -> Result<SceneElement, String> {
        let mut value = serde_json::to_value(self).map_err(|e| e.to_string())?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| "element did not serialize to an object".to_string())?;
        for (key, change) in changes {
            map.insert(key.clone(), change.clone());
        }
        map.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

/// Deterministically normalize an element list.
///
/// - Duplicate ids inside one input array: the first occurrence keeps its
///   id, later duplicates get a `{id}-{n}` suffix and a fresh nonce.
/// - Note elements always end up with valid serialized block content.
///
/// Returns the normalized list plus one warning per adjustment.
pub fn normalize_elements(elements: Vec<SceneElement>) -> (Vec<SceneElement>, Vec<String>) {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut warnings = Vec::new();
    let mut out = Vec::with_capacity(elements.len());

    for mut element in elements {
        if seen.contains(&element.id) {
            let original = element.id.clone();
            let mut n = 2;
            while seen.contains(&format!("{original}-{n}")) {
                n += 1;
            }
            element.id = format!("{original}-{n}");
            element.version_nonce = fresh_nonce();
            warnings.push(format!(
                "duplicate element id \"{original}\" renamed to \"{}\"",
                element.id
            ));
        }

        if element.element_type == ElementType::Note {
            let normalized = note::normalize_content(element.note_content.as_deref());
            if element.note_content.as_deref() != Some(normalized.as_str()) {
                warnings.push(format!(
                    "note \"{}\": content normalized to a valid block document",
                    element.id
                ));
            }
            element.note_content = Some(normalized);
        }

        seen.insert(element.id.clone());
        out.push(element);
    }

    (out, warnings)
}
