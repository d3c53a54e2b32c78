//! Applying a diff to a value.

use super::node::{ChangeOp, DiffNode, Move};
use super::path::{Path, PathSegment};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Apply `node` to a copy of `target`, returning the patched value.
///
/// The caller's value is never mutated. Application order:
///
/// 1. A change at the empty path short-circuits to its new value.
/// 2. Every array that has moves is rebuilt in one step, shallowest first.
///    Removes, adds and replaces directly under that array belong to the
///    rebuild: removes and replaces drop old elements, adds and replaces fill
///    new slots, moves carry old elements to their new index, and all other
///    slots keep the old element at the same index.
/// 3. Remaining replaces and adds are assigned, creating intermediate
///    containers as needed.
/// 4. Remaining removes run in descending path order so that several
///    removals from one array never shift each other's indices.
///
/// The input must be acyclic; JSON values always are.
pub fn patch(target: &Value, node: &DiffNode) -> Value {
    if let Some(op) = node.changes.get("") {
        return op.new_value().cloned().unwrap_or(Value::Null);
    }

    let mut result = target.clone();

    let mut rebuilds: BTreeMap<Path, Vec<&Move>> = BTreeMap::new();
    for mv in &node.moves {
        rebuilds.entry(Path::parse(&mv.path)).or_default().push(mv);
    }

    let mut slot_ops: BTreeMap<Path, Vec<(usize, &ChangeOp)>> = BTreeMap::new();
    let mut assigns = Vec::new();
    let mut removes = Vec::new();

    for (raw, op) in &node.changes {
        let path = Path::parse(raw);
        if let (Some(parent), Some(PathSegment::Index(index))) = (path.parent(), path.last()) {
            if rebuilds.contains_key(&parent) {
                slot_ops.entry(parent).or_default().push((*index, op));
                continue;
            }
        }
        match op {
            ChangeOp::Remove { .. } => removes.push(path),
            ChangeOp::Replace { new, .. } | ChangeOp::Add { new } => assigns.push((path, new)),
        }
    }

    let mut arrays: Vec<(Path, Vec<&Move>)> = rebuilds.into_iter().collect();
    arrays.sort_by_key(|(path, _)| path.len());
    for (path, moves) in arrays {
        let ops = slot_ops.remove(&path).unwrap_or_default();
        match get_mut(&mut result, &path) {
            Some(Value::Array(items)) => rebuild_array(items, &moves, &ops),
            _ => tracing::debug!(path = %path, "skipping moves: target is not an array"),
        }
    }

    for (path, value) in assigns {
        set_at(&mut result, &path, value.clone());
    }

    removes.sort_by(|a, b| b.cmp(a));
    for path in removes {
        remove_at(&mut result, &path);
    }

    result
}

fn rebuild_array(items: &mut Vec<Value>, moves: &[&Move], ops: &[(usize, &ChangeOp)]) {
    let old = std::mem::take(items);

    let mut len = old.len() as isize;
    for (_, op) in ops {
        match op {
            ChangeOp::Add { .. } => len += 1,
            ChangeOp::Remove { .. } => len -= 1,
            ChangeOp::Replace { .. } => {}
        }
    }
    let len = len.max(0) as usize;

    let mut slots: Vec<Option<Value>> = vec![None; len];
    for mv in moves {
        if mv.to < len {
            let value = old.get(mv.from).unwrap_or(&mv.value);
            slots[mv.to] = Some(value.clone());
        }
    }
    for (index, op) in ops {
        if let Some(value) = op.new_value() {
            if *index < len {
                slots[*index] = Some(value.clone());
            }
        }
    }

    *items = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| old.get(index).cloned().unwrap_or(Value::Null))
        })
        .collect();
}

fn get_mut<'a>(root: &'a mut Value, path: &Path) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match (current, segment) {
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            (Value::Object(map), segment) => map.get_mut(&segment.as_key())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Step into `segment`, turning `current` into a container of the right
/// kind first if it is not one.
fn descend<'a>(current: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    let compatible = match segment {
        PathSegment::Index(_) => current.is_array() || current.is_object(),
        PathSegment::Key(_) => current.is_object(),
    };
    if !compatible {
        *current = match segment {
            PathSegment::Index(_) => Value::Array(Vec::new()),
            PathSegment::Key(_) => Value::Object(Map::new()),
        };
    }

    match (current, segment) {
        (Value::Array(items), PathSegment::Index(index)) => {
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            &mut items[*index]
        }
        (Value::Object(map), segment) => map.entry(segment.as_key()).or_insert(Value::Null),
        (other, _) => other,
    }
}

fn set_at(root: &mut Value, path: &Path, value: Value) {
    let mut current = root;
    for segment in path.segments() {
        current = descend(current, segment);
    }
    *current = value;
}

fn remove_at(root: &mut Value, path: &Path) {
    let (Some(parent), Some(last)) = (path.parent(), path.last()) else {
        return;
    };
    match (get_mut(root, &parent), last) {
        (Some(Value::Array(items)), PathSegment::Index(index)) => {
            if *index < items.len() {
                items.remove(*index);
            }
        }
        (Some(Value::Object(map)), segment) => {
            map.remove(&segment.as_key());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, DiffOptions};
    use serde_json::json;

    fn roundtrip(old: Value, new: Value, options: &DiffOptions) {
        let node = diff(&old, &new, options);
        assert_eq!(patch(&old, &node), new, "diff was {:?}", node);
    }

    #[test]
    fn test_patch_does_not_mutate_target() {
        let old = json!({"a": 1});
        let node = diff(&old, &json!({"a": 2}), &DiffOptions::default());
        let patched = patch(&old, &node);
        assert_eq!(old, json!({"a": 1}));
        assert_eq!(patched, json!({"a": 2}));
    }

    #[test]
    fn test_root_replace_short_circuits() {
        let node = diff(&json!("x"), &json!({"now": "object"}), &DiffOptions::default());
        assert_eq!(patch(&json!("unrelated"), &node), json!({"now": "object"}));
    }

    #[test]
    fn test_multiple_array_removals_apply_highest_first() {
        roundtrip(json!([1, 2, 3, 4, 5]), json!([1, 2]), &DiffOptions::default());
        roundtrip(
            json!({"list": [{"a": 1}, {"b": 2}, {"c": 3}]}),
            json!({"list": [{"a": 1}]}),
            &DiffOptions::default(),
        );
    }

    #[test]
    fn test_creates_intermediate_containers() {
        let mut node = DiffNode::default();
        node.changes.insert("a.list.1.name".into(), ChangeOp::Add { new: json!("n") });

        let patched = patch(&json!({}), &node);
        assert_eq!(patched, json!({"a": {"list": [null, {"name": "n"}]}}));
    }

    #[test]
    fn test_numeric_key_on_object() {
        roundtrip(json!({"1": "a"}), json!({"1": "b", "2": "c"}), &DiffOptions::default());
    }

    #[test]
    fn test_remove_of_missing_path_is_ignored() {
        let mut node = DiffNode::default();
        node.changes.insert("x.y".into(), ChangeOp::Remove { old: json!(1) });
        assert_eq!(patch(&json!({"z": 1}), &node), json!({"z": 1}));
    }

    #[test]
    fn test_identity_moves_roundtrip() {
        let options = DiffOptions::default().with_object_identifier("id");
        roundtrip(
            json!([{"id": 1, "v": "a"}, {"id": 2, "v": "b"}, {"id": 3, "v": "c"}]),
            json!([{"id": 3, "v": "c"}, {"id": 1, "v": "A"}, {"id": 4, "v": "d"}]),
            &options,
        );
        roundtrip(
            json!({"rows": [{"id": "a"}, {"id": "b"}]}),
            json!({"rows": [{"id": "b"}, {"id": "c"}, {"id": "a", "x": 1}]}),
            &options,
        );
        roundtrip(
            json!([{"id": 1}, {"id": 2}, {"id": 3}]),
            json!([{"id": 2}]),
            &options,
        );
    }

    #[test]
    fn test_scalar_moves_roundtrip() {
        let options = DiffOptions::default().with_detect_array_move(true);
        roundtrip(json!(["a", "b", "c"]), json!(["c", "a", "b"]), &options);
        roundtrip(json!([1, 2]), json!([3, 1, 2]), &options);
        roundtrip(json!([1, 2, 3]), json!([3, 1]), &options);
        roundtrip(json!([1, 1, 2, 2]), json!([2, 1, 9, 1]), &options);
    }

    #[test]
    fn test_nested_moves_inside_moved_elements() {
        let options = DiffOptions::default()
            .with_object_identifier("id")
            .with_detect_array_move(true);
        roundtrip(
            json!([{"id": 1, "tags": ["x", "y"]}, {"id": 2, "tags": []}]),
            json!([{"id": 2, "tags": ["z"]}, {"id": 1, "tags": ["y", "x"]}]),
            &options,
        );
    }

    #[test]
    fn test_depth_capped_identity_elements() {
        let options = DiffOptions::default()
            .with_object_identifier("id")
            .with_max_depth(1);
        roundtrip(
            json!([{"id": 1, "v": 1}, {"id": 2, "v": 2}]),
            json!([{"id": 2, "v": 3}, {"id": 1, "v": 1}]),
            &options,
        );
    }
}
