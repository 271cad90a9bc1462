//! Merge engine properties

use serde_json::{json, Value};

use datum_core::merge::{combine_with, Conflict};
use datum_core::{combine, merge_values, MergeError, MergeStrategy, NamedStrategy, Object};

fn obj(value: Value) -> Object {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_disjoint_keys_union_when_both_sides_kept() {
    let a = obj(json!({"x": 1, "nested": {"k": true}}));
    let b = obj(json!({"y": "two", "list": [1, 2]}));

    for strategy in NamedStrategy::ALL {
        let disposition = strategy.disposition();
        if !(disposition.just_a && disposition.just_b) {
            continue;
        }
        let combined = combine(&a, &b, &strategy.into()).unwrap();
        let mut expected = a.clone();
        expected.extend(b.clone());
        assert_eq!(combined, expected, "strategy {strategy}");
    }
}

#[test]
fn test_array_merge_invariants() {
    let x = json!(["x", "dup"]);
    let y = json!(["y", "dup"]);

    assert_eq!(
        merge_values(Some(&x), Some(&y), true, false).unwrap(),
        Some(json!(["x", "dup", "y"]))
    );
    assert_eq!(
        merge_values(Some(&x), Some(&y), false, false).unwrap(),
        Some(json!(["x", "dup", "y", "dup"]))
    );
    assert!(matches!(
        merge_values(Some(&json!({"a": 1})), Some(&json!("s")), true, false),
        Err(MergeError::IncompatibleValues { .. })
    ));
    assert_eq!(merge_values(None, Some(&y), true, false).unwrap(), Some(y));
}

#[test]
fn test_inputs_are_not_modified() {
    let a = obj(json!({"k": [1], "o": {"p": 1}}));
    let b = obj(json!({"k": [2], "o": {"q": 2}}));
    let (a_before, b_before) = (a.clone(), b.clone());

    let combined = combine(&a, &b, &NamedStrategy::Append.into()).unwrap();
    assert_eq!(combined, obj(json!({"k": [1, 2], "o": {"p": 1, "q": 2}})));
    assert_eq!(a, a_before);
    assert_eq!(b, b_before);
}

#[test]
fn test_conflict_policies() {
    let a = obj(json!({"k": "old", "same": 1}));
    let b = obj(json!({"k": "new", "same": 1}));

    let pick = |name: &str| {
        let strategy: MergeStrategy = name.parse().unwrap();
        combine(&a, &b, &strategy).unwrap()
    };

    assert_eq!(pick("preferNew"), obj(json!({"k": "new", "same": 1})));
    assert_eq!(pick("preferOld"), obj(json!({"k": "old", "same": 1})));
    assert_eq!(pick("removeConflicting"), obj(json!({"same": 1})));
    assert_eq!(pick("xor"), Object::new());
    assert_eq!(pick("prepend"), obj(json!({"k": ["new", "old"], "same": 1})));
}

#[test]
fn test_custom_disposition() {
    let mut disposition = NamedStrategy::Update.disposition();
    disposition.conflict = Conflict::Drop;

    let combined = combine_with(
        &obj(json!({"a": 1, "c": 1})),
        &obj(json!({"b": 2, "c": 2})),
        disposition,
    )
    .unwrap();
    assert_eq!(combined, obj(json!({"a": 1})));
}

#[test]
fn test_rekey_renames_by_path() {
    let a = obj(json!({"old": 1, "inner": {"x": true}, "kept": 0}));
    let b = obj(json!({"old": "new", "inner": {"x": "y"}, "absent": "ignored"}));

    let combined = combine(&a, &b, &MergeStrategy::Rekey).unwrap();
    assert_eq!(
        combined,
        obj(json!({"new": 1, "inner": {"y": true}, "kept": 0}))
    );

    let bad = obj(json!({"old": 5}));
    assert!(matches!(
        combine(&a, &bad, &MergeStrategy::Rekey),
        Err(MergeError::Rekey(_))
    ));
}
