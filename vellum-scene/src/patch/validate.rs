//! Structural and semantic validation of untyped candidate patches.
//!
//! Validation never mutates anything: the result is either the typed patch
//! or a list of human-readable issues, one per violation, each with a
//! path-like locator (`ops[3].changes: ...`).

use serde_json::Value;

use super::{PatchOp, ScenePatch};

/// Validate an untyped candidate patch into a [`ScenePatch`].
pub fn validate_patch(raw: &Value) -> Result<ScenePatch, Vec<String>> {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => return Err(vec!["patch: expected a JSON object".to_string()]),
    };

    let mut issues = Vec::new();

    let ops_value = match obj.get("ops") {
        Some(v) => v,
        None => return Err(vec!["ops: missing required field".to_string()]),
    };
    let ops_array = match ops_value.as_array() {
        Some(a) => a,
        None => return Err(vec!["ops: expected an array".to_string()]),
    };
    if ops_array.is_empty() {
        return Err(vec!["ops: must contain at least one operation".to_string()]);
    }

    let mut ops = Vec::with_capacity(ops_array.len());
    for (i, op_value) in ops_array.iter().enumerate() {
        match serde_json::from_value::<PatchOp>(op_value.clone()) {
            Ok(op) => {
                check_semantics(i, &op, &mut issues);
                ops.push(op);
            }
            Err(e) => issues.push(format!("ops[{i}]: {e}")),
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(ScenePatch {
        ops,
        base_version: obj.get("baseVersion").and_then(Value::as_u64),
        reason: obj
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata: obj.get("metadata").cloned(),
    })
}

/// Checks beyond what the type structure enforces.
fn check_semantics(index: usize, op: &PatchOp, issues: &mut Vec<String>) {
    match op {
        PatchOp::UpdateElement { changes, .. } => {
            if changes.is_empty() {
                issues.push(format!(
                    "ops[{index}].changes: must contain at least one change key"
                ));
            }
        }
        PatchOp::UpdateAppState { changes } => {
            if changes.is_empty() {
                issues.push(format!(
                    "ops[{index}].changes: must contain at least one change key"
                ));
            }
        }
        PatchOp::AddElement { .. }
        | PatchOp::DeleteElement { .. }
        | PatchOp::ReplaceElements { .. }
        | PatchOp::UpsertFile { .. }
        | PatchOp::DeleteFile { .. }
        | PatchOp::NoteSetContent { .. }
        | PatchOp::NoteFromText { .. }
        | PatchOp::NoteFromMarkdown { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_patch() {
        let raw = json!({
            "ops": [
                {"op": "add_element", "element": {"id": "r1", "type": "rectangle"}},
                {"op": "update_app_state", "changes": {"zoom": 2.0}},
            ],
            "baseVersion": 5,
            "reason": "setup",
        });
        let patch = validate_patch(&raw).unwrap();
        assert_eq!(patch.ops.len(), 2);
        assert_eq!(patch.base_version, Some(5));
        assert_eq!(patch.reason.as_deref(), Some("setup"));
    }

    #[test]
    fn test_empty_ops_rejected() {
        let raw = json!({"ops": []});
        let issues = validate_patch(&raw).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("ops:"));
    }

    #[test]
    fn test_missing_ops_rejected() {
        let issues = validate_patch(&json!({})).unwrap_err();
        assert!(issues[0].contains("missing"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(validate_patch(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_empty_changes_rejected() {
        let raw = json!({
            "ops": [{"op": "update_element", "id": "x", "changes": {}}]
        });
        let issues = validate_patch(&raw).unwrap_err();
        assert!(issues[0].contains("ops[0].changes"));
    }

    #[test]
    fn test_unknown_op_rejected_with_locator() {
        let raw = json!({
            "ops": [
                {"op": "add_element", "element": {"id": "r1", "type": "rectangle"}},
                {"op": "teleport_element", "id": "r1"},
            ]
        });
        let issues = validate_patch(&raw).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("ops[1]:"));
    }

    #[test]
    fn test_replace_elements_requires_array() {
        let raw = json!({
            "ops": [{"op": "replace_elements", "elements": "nope"}]
        });
        let issues = validate_patch(&raw).unwrap_err();
        assert!(issues[0].starts_with("ops[0]:"));
    }

    #[test]
    fn test_multiple_issues_collected() {
        let raw = json!({
            "ops": [
                {"op": "update_element", "id": "a", "changes": {}},
                {"op": "bogus"},
            ]
        });
        let issues = validate_patch(&raw).unwrap_err();
        assert_eq!(issues.len(), 2);
    }
}
