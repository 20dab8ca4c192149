//! Deterministic message encoding: the same key order and number
//! representation on every run, so two peers signing/verifying the same
//! logical payload always hash the same bytes.

use serde::Serialize;
use std::collections::BTreeMap;

/// Canonicalizes `payload` to its signing bytes. Re-serializes through a
/// `BTreeMap<String, serde_json::Value>` so object keys sort
/// lexicographically regardless of field declaration order, then renders
/// with `serde_json`'s default (non-pretty, no trailing whitespace)
/// formatting.
pub fn canonicalize<T: Serialize>(payload: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(payload)?;
    let sorted = sort_keys(value);
    serde_json::to_vec(&sorted)
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap re-encodes to an object")
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn field_order_does_not_affect_canonical_bytes() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let a = json!({"outer": {"z": 1, "y": 2}});
        let b = json!({"outer": {"y": 2, "z": 1}});
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    proptest! {
        /// Shuffling the declaration order of a flat object's fields never
        /// changes its canonical bytes.
        #[test]
        fn canonical_bytes_are_independent_of_field_order(
            mut pairs in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 1..8)
        ) {
            pairs.sort();
            pairs.dedup_by(|a, b| a.0 == b.0);
            let forward: serde_json::Map<String, serde_json::Value> = pairs
                .iter()
                .cloned()
                .map(|(k, v)| (k, json!(v)))
                .collect();
            let mut shuffled = forward.clone().into_iter().collect::<Vec<_>>();
            shuffled.reverse();
            let backward: serde_json::Map<String, serde_json::Value> =
                shuffled.into_iter().collect();

            prop_assert_eq!(
                canonicalize(&serde_json::Value::Object(forward)).unwrap(),
                canonicalize(&serde_json::Value::Object(backward)).unwrap(),
            );
        }
    }
}
