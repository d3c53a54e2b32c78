//! Structural comparison of JSON trees.

use super::node::{ChangeOp, DiffFormat, DiffKind, DiffNode, DiffOptions, Move};
use super::path::Path;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Runtime shape of a value. Values of different shapes are never diffed
/// field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Null,
    Object,
    Array,
    Scalar,
}

fn shape_of(value: &Value) -> Shape {
    match value {
        Value::Null => Shape::Null,
        Value::Object(_) => Shape::Object,
        Value::Array(_) => Shape::Array,
        _ => Shape::Scalar,
    }
}

/// Deep equality, optionally ignoring case in strings.
pub fn values_equal(a: &Value, b: &Value, case_insensitive: bool) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) if case_insensitive => {
            x == y || x.to_lowercase() == y.to_lowercase()
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|(l, r)| values_equal(l, r, case_insensitive))
        }
        (Value::Object(x), Value::Object(y)) => values_equal_objects(x, y, case_insensitive),
        _ => a == b,
    }
}

/// Whether a dot path can name `key` without colliding with the parent
/// path or splitting into several segments.
fn addressable(key: &str) -> bool {
    !key.is_empty() && !key.contains('.')
}

fn values_equal_objects(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    case_insensitive: bool,
) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, l)| {
            b.get(key)
                .map_or(false, |r| values_equal(l, r, case_insensitive))
        })
}

/// Compute the structural difference between `old` and `new`.
///
/// Values of different shapes produce a single replace at the empty path.
/// Containers at `max_depth` or deeper are compared as whole values.
pub fn diff(old: &Value, new: &Value, options: &DiffOptions) -> DiffNode {
    let mut builder = DiffBuilder {
        options,
        changes: BTreeMap::new(),
        moves: Vec::new(),
    };
    builder.diff_value(old, new, &Path::root(), 0);

    let mut node = DiffNode {
        changes: builder
            .changes
            .into_iter()
            .map(|(path, op)| (path.to_string(), op))
            .collect(),
        moves: builder.moves,
        ..Default::default()
    };

    if let (Value::Array(a), Value::Array(b)) = (old, new) {
        if a.len() != b.len() {
            node.length_changed = Some(true);
            node.old_length = Some(a.len());
            node.new_length = Some(b.len());
        }
    }

    if options.format == DiffFormat::Detailed {
        node.kind = Some(match (shape_of(old), shape_of(new)) {
            (Shape::Object, Shape::Object) => DiffKind::Object,
            (Shape::Array, Shape::Array) => DiffKind::Array,
            _ => DiffKind::Value,
        });
        if options.include_stats {
            node.stats = Some(node.compute_stats());
        }
    }

    node
}

struct DiffBuilder<'a> {
    options: &'a DiffOptions,
    changes: BTreeMap<Path, ChangeOp>,
    moves: Vec<Move>,
}

impl DiffBuilder<'_> {
    fn diff_value(&mut self, old: &Value, new: &Value, path: &Path, depth: usize) {
        let old_shape = shape_of(old);
        if old_shape != shape_of(new) {
            self.replace(path, old, new);
            return;
        }

        let is_container = matches!(old_shape, Shape::Object | Shape::Array);
        if is_container && depth >= self.options.max_depth {
            if !values_equal(old, new, self.options.case_insensitive) {
                self.replace(path, old, new);
            }
            return;
        }

        match (old, new) {
            (Value::Object(a), Value::Object(b)) => self.diff_objects(a, b, path, depth),
            (Value::Array(a), Value::Array(b)) => self.diff_arrays(a, b, path, depth),
            (Value::Null, Value::Null) => {}
            _ => {
                if !values_equal(old, new, self.options.case_insensitive) {
                    self.replace(path, old, new);
                }
            }
        }
    }

    fn diff_objects(
        &mut self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &Path,
        depth: usize,
    ) {
        if !old.keys().chain(new.keys()).all(|key| addressable(key)) {
            if !values_equal_objects(old, new, self.options.case_insensitive) {
                self.record(path.clone(), ChangeOp::Replace {
                    old: Value::Object(old.clone()),
                    new: Value::Object(new.clone()),
                });
            }
            return;
        }

        for (key, old_value) in old {
            let child = path.child_key(key);
            match new.get(key) {
                Some(new_value) => self.diff_value(old_value, new_value, &child, depth + 1),
                None => self.record(child, ChangeOp::Remove {
                    old: old_value.clone(),
                }),
            }
        }

        for (key, new_value) in new {
            if !old.contains_key(key) {
                self.record(path.child_key(key), ChangeOp::Add {
                    new: new_value.clone(),
                });
            }
        }
    }

    fn diff_arrays(&mut self, old: &[Value], new: &[Value], path: &Path, depth: usize) {
        if let Some(field) = self.options.object_identifier.as_deref() {
            if all_identified(old, field) && all_identified(new, field) {
                let key_of = |value: &Value| identity_key(value, field);
                self.diff_correlated(old, new, path, depth, key_of);
                return;
            }
        }

        if self.options.detect_array_move && all_scalar(old) && all_scalar(new) {
            let case_insensitive = self.options.case_insensitive;
            let key_of = |value: &Value| scalar_key(value, case_insensitive);
            self.diff_correlated(old, new, path, depth, key_of);
            return;
        }

        for index in 0..old.len().max(new.len()) {
            let child = path.child_index(index);
            match (old.get(index), new.get(index)) {
                (Some(a), Some(b)) => self.diff_value(a, b, &child, depth + 1),
                (None, Some(b)) => self.record(child, ChangeOp::Add { new: b.clone() }),
                (Some(a), None) => self.record(child, ChangeOp::Remove { old: a.clone() }),
                (None, None) => {}
            }
        }
    }

    /// Diff two arrays whose elements are correlated by a key instead of
    /// position.
    ///
    /// Each new element claims the first unclaimed old element with the same
    /// key (greedy, not a minimal edit script). Unmatched old elements are
    /// removed at their old index, unmatched new elements are added at their
    /// new index, and a remove and an add landing on the same index fold into
    /// a replace. Matched elements that changed index are recorded as moves
    /// and their contents are diffed under the new index.
    fn diff_correlated<F>(
        &mut self,
        old: &[Value],
        new: &[Value],
        path: &Path,
        depth: usize,
        key_of: F,
    ) where
        F: Fn(&Value) -> String,
    {
        let mut pool: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (index, value) in old.iter().enumerate() {
            pool.entry(key_of(value)).or_default().push_back(index);
        }

        // Element contents past the depth cap cannot be diffed, so a changed
        // element there is treated as a remove plus an add.
        let contents_capped = depth + 1 >= self.options.max_depth;

        let mut claimed = vec![false; old.len()];
        let mut pairs = Vec::new();
        let mut added = Vec::new();

        for (to, value) in new.iter().enumerate() {
            let candidate = pool
                .get_mut(&key_of(value))
                .and_then(|indices| indices.pop_front());
            match candidate {
                Some(from)
                    if !contents_capped
                        || values_equal(&old[from], value, self.options.case_insensitive) =>
                {
                    claimed[from] = true;
                    pairs.push((from, to));
                }
                _ => added.push(to),
            }
        }

        for (from, value) in old.iter().enumerate() {
            if !claimed[from] {
                self.record(path.child_index(from), ChangeOp::Remove { old: value.clone() });
            }
        }
        for to in added {
            self.record(path.child_index(to), ChangeOp::Add {
                new: new[to].clone(),
            });
        }

        for (from, to) in pairs {
            if from != to {
                self.moves.push(Move {
                    path: path.to_string(),
                    from,
                    to,
                    value: old[from].clone(),
                });
            }
            self.diff_value(&old[from], &new[to], &path.child_index(to), depth + 1);
        }
    }

    fn replace(&mut self, path: &Path, old: &Value, new: &Value) {
        self.changes.insert(path.clone(), ChangeOp::Replace {
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn record(&mut self, path: Path, op: ChangeOp) {
        let merged = match (self.changes.remove(&path), op) {
            (Some(ChangeOp::Remove { old }), ChangeOp::Add { new }) => ChangeOp::Replace { old, new },
            (_, op) => op,
        };
        self.changes.insert(path, merged);
    }
}

fn all_identified(values: &[Value], field: &str) -> bool {
    values
        .iter()
        .all(|value| value.get(field).map_or(false, |id| !id.is_null()))
}

fn all_scalar(values: &[Value]) -> bool {
    values
        .iter()
        .all(|value| !value.is_object() && !value.is_array())
}

fn identity_key(value: &Value, field: &str) -> String {
    value
        .get(field)
        .map(|id| id.to_string())
        .unwrap_or_default()
}

fn scalar_key(value: &Value, case_insensitive: bool) -> String {
    match value {
        Value::String(s) if case_insensitive => format!("s:{}", s.to_lowercase()),
        Value::String(s) => format!("s:{}", s),
        other => other.to_string(),
    }
}
