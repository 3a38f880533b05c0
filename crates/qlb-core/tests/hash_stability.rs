use std::collections::BTreeMap;

use proptest::prelude::*;
use qlb_core::hash_value;
use qlb_core::serde::{canonical_text, from_json_slice, to_pretty_json_bytes};
use serde_json::{json, Value};

#[test]
fn key_order_does_not_change_the_hash() {
    let a: Value = serde_json::from_str(r#"{"p": 0.01, "d": 3}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{"d": 3, "p": 0.01}"#).unwrap();
    assert_eq!(hash_value(&a), hash_value(&b));
    assert_eq!(canonical_text(&a), r#"{"d":3,"p":0.01}"#);
}

#[test]
fn different_values_hash_differently() {
    let a = json!({"d": 3, "p": 0.01});
    let b = json!({"d": 5, "p": 0.01});
    assert_ne!(hash_value(&a), hash_value(&b));
    assert_ne!(hash_value(&json!("3")), hash_value(&json!(3)));
}

#[test]
fn hash_is_lower_hex_sha256() {
    let hash = hash_value(&json!([1, 2, 3]));
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

proptest! {
    #[test]
    fn pretty_json_roundtrips_and_keeps_the_hash(entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)) {
        let bytes = to_pretty_json_bytes(&entries).unwrap();
        let back: BTreeMap<String, i64> = from_json_slice(&bytes).unwrap();
        prop_assert_eq!(&back, &entries);
        let reparsed: Value = from_json_slice(&bytes).unwrap();
        prop_assert_eq!(hash_value(&reparsed), hash_value(&json!(entries)));
    }
}
