//! Diff result types and options.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single change at one path.
///
/// Serialized in the wire shape `{oldValue, newValue}` for replace,
/// `{action: "add", newValue}` and `{action: "remove", oldValue}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawChangeOp", into = "RawChangeOp")]
pub enum ChangeOp {
    Replace { old: Value, new: Value },
    Add { new: Value },
    Remove { old: Value },
}

impl ChangeOp {
    /// The value present after the change, if any.
    pub fn new_value(&self) -> Option<&Value> {
        match self {
            ChangeOp::Replace { new, .. } | ChangeOp::Add { new } => Some(new),
            ChangeOp::Remove { .. } => None,
        }
    }

    /// The value present before the change, if any.
    pub fn old_value(&self) -> Option<&Value> {
        match self {
            ChangeOp::Replace { old, .. } | ChangeOp::Remove { old } => Some(old),
            ChangeOp::Add { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChangeOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    old_value: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    new_value: Option<Value>,
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl From<ChangeOp> for RawChangeOp {
    fn from(op: ChangeOp) -> Self {
        match op {
            ChangeOp::Replace { old, new } => RawChangeOp {
                action: None,
                old_value: Some(old),
                new_value: Some(new),
            },
            ChangeOp::Add { new } => RawChangeOp {
                action: Some("add".to_string()),
                old_value: None,
                new_value: Some(new),
            },
            ChangeOp::Remove { old } => RawChangeOp {
                action: Some("remove".to_string()),
                old_value: Some(old),
                new_value: None,
            },
        }
    }
}

impl TryFrom<RawChangeOp> for ChangeOp {
    type Error = String;

    fn try_from(raw: RawChangeOp) -> std::result::Result<Self, Self::Error> {
        match (raw.action.as_deref(), raw.old_value, raw.new_value) {
            (Some("add"), _, Some(new)) => Ok(ChangeOp::Add { new }),
            (Some("remove"), Some(old), _) => Ok(ChangeOp::Remove { old }),
            (None, Some(old), Some(new)) => Ok(ChangeOp::Replace { old, new }),
            (Some(action), _, _) => Err(format!("malformed change op with action {:?}", action)),
            (None, _, _) => Err("replace op needs both oldValue and newValue".to_string()),
        }
    }
}

/// An array element that changed position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Move {
    /// Path of the array holding the element; empty for the root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    pub from: usize,
    pub to: usize,
    /// The element as it was at `from`.
    pub value: Value,
}

/// Informational change counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
    pub moved: usize,
    pub total_changes: usize,
}

/// Shape of the compared root values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Object,
    Array,
    Value,
}

/// Output format for a diff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffFormat {
    /// No `type` discriminant and no stats; used on the wire.
    #[default]
    Compact,
    /// Keeps `type` and stats for local inspection.
    Detailed,
}

/// Options controlling [`diff`](crate::diff::diff).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DiffOptions {
    /// Subtrees below this depth are replaced wholesale.
    pub max_depth: usize,

    /// Compare strings ignoring ASCII and Unicode case.
    pub case_insensitive: bool,

    /// Field used to correlate array elements instead of position.
    pub object_identifier: Option<String>,

    /// Detect reordered elements in scalar arrays (index mode only).
    pub detect_array_move: bool,

    pub include_stats: bool,

    pub format: DiffFormat,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            case_insensitive: false,
            object_identifier: None,
            detect_array_move: false,
            include_stats: false,
            format: DiffFormat::Compact,
        }
    }
}

impl DiffOptions {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_object_identifier(mut self, field: impl Into<String>) -> Self {
        self.object_identifier = Some(field.into());
        self
    }

    pub fn with_detect_array_move(mut self, detect: bool) -> Self {
        self.detect_array_move = detect;
        self
    }

    pub fn with_stats(mut self, include: bool) -> Self {
        self.include_stats = include;
        self
    }

    pub fn with_format(mut self, format: DiffFormat) -> Self {
        self.format = format;
        self
    }
}

/// The difference between two values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffNode {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DiffKind>,

    pub changes: BTreeMap<String, ChangeOp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_changed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moves: Vec<Move>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DiffStats>,
}

impl DiffNode {
    /// True when the two values were equal.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.moves.is_empty()
    }

    /// Number of path changes plus moves.
    pub fn len(&self) -> usize {
        self.changes.len() + self.moves.len()
    }

    /// A copy without the discriminant and stats.
    pub fn to_compact(&self) -> DiffNode {
        DiffNode {
            kind: None,
            stats: None,
            ..self.clone()
        }
    }

    /// Recount stats from the recorded changes.
    pub fn compute_stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for op in self.changes.values() {
            match op {
                ChangeOp::Replace { .. } => stats.changed += 1,
                ChangeOp::Add { .. } => stats.added += 1,
                ChangeOp::Remove { .. } => stats.removed += 1,
            }
        }
        stats.moved = self.moves.len();
        stats.total_changes = stats.changed + stats.added + stats.removed + stats.moved;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_op_wire_shapes() {
        let replace = ChangeOp::Replace {
            old: json!(1),
            new: json!(2),
        };
        assert_eq!(
            serde_json::to_value(&replace).unwrap(),
            json!({"oldValue": 1, "newValue": 2})
        );

        let add = ChangeOp::Add { new: json!("x") };
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"action": "add", "newValue": "x"})
        );

        let remove = ChangeOp::Remove { old: json!([1]) };
        assert_eq!(
            serde_json::to_value(&remove).unwrap(),
            json!({"action": "remove", "oldValue": [1]})
        );
    }

    #[test]
    fn test_null_values_survive_decoding() {
        let op: ChangeOp =
            serde_json::from_value(json!({"oldValue": null, "newValue": 3})).unwrap();
        assert_eq!(
            op,
            ChangeOp::Replace {
                old: Value::Null,
                new: json!(3)
            }
        );
    }

    #[test]
    fn test_malformed_op_rejected() {
        let result = serde_json::from_value::<ChangeOp>(json!({"newValue": 3}));
        assert!(result.is_err());
        let result = serde_json::from_value::<ChangeOp>(json!({"action": "frobnicate"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_compact_strips_kind_and_stats() {
        let mut node = DiffNode {
            kind: Some(DiffKind::Object),
            ..Default::default()
        };
        node.changes.insert("a".into(), ChangeOp::Add { new: json!(1) });
        node.stats = Some(node.compute_stats());

        let compact = node.to_compact();
        assert_eq!(compact.kind, None);
        assert_eq!(compact.stats, None);
        assert_eq!(
            serde_json::to_value(&compact).unwrap(),
            json!({"changes": {"a": {"action": "add", "newValue": 1}}})
        );
    }
}
