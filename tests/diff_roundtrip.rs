//! Diff/patch properties over generated JSON.

use delta_store::diff::{diff, patch, ChangeOp, DiffFormat, DiffOptions};
use proptest::prelude::*;
use serde_json::{json, Value};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-20i64..20).prop_map(Value::from),
        "[a-c]{0,2}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-d.]{0,2}", inner, 0..5)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn scalar_array() -> impl Strategy<Value = Value> {
    prop::collection::vec(
        prop_oneof![
            (0i64..4).prop_map(Value::from),
            "[xy]".prop_map(Value::String),
        ],
        0..8,
    )
    .prop_map(Value::Array)
}

fn identified_rows() -> impl Strategy<Value = Value> {
    prop::collection::vec((0u8..6, 0i64..3, scalar_array()), 0..6).prop_map(|rows| {
        Value::Array(
            rows.into_iter()
                .map(|(id, v, tags)| json!({"id": id, "v": v, "tags": tags}))
                .collect(),
        )
    })
}

proptest! {
    #[test]
    fn prop_roundtrip_index_mode(a in json_value(), b in json_value()) {
        let node = diff(&a, &b, &DiffOptions::default());
        prop_assert_eq!(patch(&a, &node), b);
    }

    #[test]
    fn prop_identical_values_have_empty_diff(a in json_value()) {
        let node = diff(&a, &a, &DiffOptions::default().with_detect_array_move(true));
        prop_assert!(node.is_empty());
    }

    #[test]
    fn prop_roundtrip_scalar_moves(a in scalar_array(), b in scalar_array()) {
        let options = DiffOptions::default().with_detect_array_move(true);
        let node = diff(&a, &b, &options);
        prop_assert_eq!(patch(&a, &node), b);
    }

    #[test]
    fn prop_roundtrip_identity_mode(a in identified_rows(), b in identified_rows()) {
        let options = DiffOptions::default()
            .with_object_identifier("id")
            .with_detect_array_move(true);
        let wrapped_a = json!({"rows": a});
        let wrapped_b = json!({"rows": b});

        let node = diff(&wrapped_a, &wrapped_b, &options);
        prop_assert_eq!(patch(&wrapped_a, &node), wrapped_b);
    }

    #[test]
    fn prop_roundtrip_with_shallow_depth(a in json_value(), b in json_value(), depth in 0usize..3) {
        let options = DiffOptions::default().with_max_depth(depth);
        let node = diff(&a, &b, &options);
        prop_assert_eq!(patch(&a, &node), b);
    }

    #[test]
    fn prop_serialized_diff_still_applies(a in json_value(), b in json_value()) {
        let options = DiffOptions::default().with_format(DiffFormat::Detailed).with_stats(true);
        let node = diff(&a, &b, &options);

        let wire = serde_json::to_string(&node.to_compact()).unwrap();
        let decoded = serde_json::from_str(&wire).unwrap();
        prop_assert_eq!(patch(&a, &decoded), b);
    }
}

// --- Literal Scenarios ---

#[test]
fn test_object_scalar_change() {
    let node = diff(
        &json!({"a": 1, "b": "x"}),
        &json!({"a": 2, "b": "x"}),
        &DiffOptions::default(),
    );
    assert_eq!(
        serde_json::to_value(&node).unwrap(),
        json!({"changes": {"a": {"oldValue": 1, "newValue": 2}}})
    );
}

#[test]
fn test_array_positional_replace() {
    let node = diff(&json!([1, 2, 3, 4]), &json!([1, 5, 3, 6]), &DiffOptions::default());

    assert_eq!(node.changes.len(), 2);
    assert_eq!(
        node.changes["1"],
        ChangeOp::Replace {
            old: json!(2),
            new: json!(5)
        }
    );
    assert_eq!(
        node.changes["3"],
        ChangeOp::Replace {
            old: json!(4),
            new: json!(6)
        }
    );
    assert_eq!(node.length_changed, None);
}

#[test]
fn test_array_growth() {
    let node = diff(&json!([1, 2, 3]), &json!([1, 2, 3, 4, 5]), &DiffOptions::default());

    assert_eq!(node.changes["3"], ChangeOp::Add { new: json!(4) });
    assert_eq!(node.changes["4"], ChangeOp::Add { new: json!(5) });
    assert_eq!(node.length_changed, Some(true));
    assert_eq!(node.old_length, Some(3));
    assert_eq!(node.new_length, Some(5));
}

#[test]
fn test_shape_change_replaces_root() {
    let node = diff(&json!({"a": 1}), &json!([1]), &DiffOptions::default());
    assert_eq!(node.changes.keys().collect::<Vec<_>>(), vec![""]);
    assert_eq!(patch(&json!({"a": 1}), &node), json!([1]));
}
