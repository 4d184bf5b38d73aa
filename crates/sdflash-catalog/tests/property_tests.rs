//! Property-based tests for catalog loading

use proptest::prelude::*;
use sdflash_catalog::prelude::*;
use serde_json::{Value, json};

fn arb_fw_id() -> impl Strategy<Value = String> {
    "[A-Z]{2}_[a-z0-9]{4}"
}

fn arb_malformed_entry() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(json!({"device_type": "orphan"})),
        Just(json!({"fw_id": ""})),
        Just(json!({"fw_id": 17})),
        Just(json!("not an object")),
        Just(json!(null)),
        any::<i64>().prop_map(Value::from),
    ]
}

fn arb_manifest() -> impl Strategy<Value = (Vec<String>, Vec<Value>)> {
    (
        prop::collection::hash_set(arb_fw_id(), 1..12),
        prop::collection::vec(arb_malformed_entry(), 0..8),
    )
        .prop_flat_map(|(ids, bad)| {
            let ids: Vec<String> = ids.into_iter().collect();
            let good: Vec<Value> = ids
                .iter()
                .map(|id| json!({"fw_id": id, "path": format!("/{id}.bin")}))
                .collect();
            let mut all = good;
            all.extend(bad);
            (Just(ids), Just(all).prop_shuffle())
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_listing_counts_well_formed_plus_exit((ids, entries) in arb_manifest()) {
        let bytes = serde_json::to_vec(&Value::Array(entries))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let catalog = Catalog::load(&bytes)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(catalog.list().len(), ids.len() + 1);
        prop_assert!(catalog.list().last().is_some_and(MenuEntry::is_exit));
        for id in &ids {
            prop_assert!(catalog.resolve(id).is_ok(), "missing {}", id);
        }
    }

    #[test]
    fn prop_unknown_ids_never_resolve(
        ids in prop::collection::hash_set(arb_fw_id(), 0..8),
        unknown in "[a-z]{1,12}",
    ) {
        // Unknown ids are lowercase, generated ids never are.
        let entries: Vec<Value> = ids.iter().map(|id| json!({"fw_id": id})).collect();
        let bytes = serde_json::to_vec(&entries)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let catalog = Catalog::load(&bytes)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let result = catalog.resolve(&unknown);
        prop_assert!(
            matches!(result, Err(CatalogError::FirmwareNotFound(ref id)) if *id == unknown),
            "unexpected resolution for {}",
            unknown
        );
    }
}
