use std::collections::BTreeSet;

use milo_connector::PathTranslation;
use milo_path::parse_access_path;
use proptest::prelude::*;

fn keys() -> impl Strategy<Value = BTreeSet<String>> {
    proptest::collection::btree_set("[a-z]{1,6}", 1..8)
}

proptest! {
    #[test]
    fn inverted_table_maps_targets_back(keys in keys(), depth in 1usize..3) {
        let stars = "*".repeat(depth);
        let mut entries: Vec<(String, String)> = keys
            .iter()
            .map(|k| (format!(".src.{k}"), format!(".dst.{k}_t")))
            .collect();
        entries.push((format!(".wild{stars}"), format!(".mirror{stars}")));
        let table = PathTranslation::parse(entries.clone()).unwrap();
        let back = table.invert().unwrap();

        prop_assert_eq!(&back.invert().unwrap(), &table);
        for (source, target) in &entries {
            if source.contains('*') {
                continue;
            }
            let source = parse_access_path(source).unwrap();
            let target = parse_access_path(target).unwrap();
            prop_assert_eq!(table.translate(&source), Some(target.clone()));
            prop_assert_eq!(back.translate(&target), Some(source));
        }
    }

    #[test]
    fn wildcard_rule_round_trips_captured_steps(key in "[a-z]{1,6}", index in 0usize..20) {
        let table = PathTranslation::parse([(".list**", ".items**")]).unwrap();
        let back = table.invert().unwrap();
        let path = parse_access_path(&format!(".list[{index}].{key}")).unwrap();
        let moved = table.translate(&path).unwrap();
        prop_assert_eq!(back.translate(&moved), Some(path));
    }
}
