//! Model-based property tests: a random sequence of store/fetch/delete
//! calls against a `Database` is checked against a plain `HashMap` model.
//! Catches cross-cutting invariants (insert/replace semantics, scan
//! completeness) without hand-writing a scenario per invariant.

use std::collections::HashMap;
use std::path::PathBuf;

use proptest::collection::vec as arb_vec;
use proptest::prelude::*;

use chainkv::{Database, DeleteOutcome, Options, StoreMode, StoreOutcome};

#[derive(Debug, Clone)]
enum Op {
    Store { key: u8, value: u8, mode: StoreMode },
    Delete { key: u8 },
    Fetch { key: u8 },
}

fn arb_store_mode() -> impl Strategy<Value = StoreMode> {
    prop_oneof![Just(StoreMode::Insert), Just(StoreMode::Replace), Just(StoreMode::Upsert)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u8>(), any::<u8>(), arb_store_mode()).prop_map(|(key, value, mode)| Op::Store { key, value, mode }),
        any::<u8>().prop_map(|key| Op::Delete { key }),
        any::<u8>().prop_map(|key| Op::Fetch { key }),
    ]
}

fn temp_db_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("chainkv-model-{}-{}-{}", tag, std::process::id(), std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos()));
    std::fs::create_dir_all(&path).unwrap();
    path.push("db");
    path
}

fn key_bytes(k: u8) -> Vec<u8> {
    format!("k{}", k).into_bytes()
}

fn value_bytes(v: u8) -> Vec<u8> {
    format!("v{}", v).into_bytes()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn matches_hashmap_model(ops in arb_vec(arb_op(), 0..200)) {
        let path = temp_db_path("matches");
        let dir = path.parent().unwrap().to_path_buf();
        let mut db = Database::create(&path, Options::default()).unwrap();
        let mut model: HashMap<u8, u8> = HashMap::new();

        for op in ops {
            match op {
                Op::Store { key, value, mode } => {
                    let outcome = db.store(&key_bytes(key), &value_bytes(value), mode);
                    let present = model.contains_key(&key);
                    match mode {
                        StoreMode::Insert => {
                            if present {
                                prop_assert_eq!(outcome, StoreOutcome::AlreadyExists);
                            } else {
                                model.insert(key, value);
                                prop_assert!(matches!(outcome, StoreOutcome::Inserted | StoreOutcome::InsertedReusingFreeSlot));
                            }
                        }
                        StoreMode::Replace => {
                            if present {
                                model.insert(key, value);
                                prop_assert!(matches!(outcome, StoreOutcome::ReplacedInPlace | StoreOutcome::ReplacedWithReinsert));
                            } else {
                                prop_assert_eq!(outcome, StoreOutcome::NotFound);
                            }
                        }
                        StoreMode::Upsert => {
                            model.insert(key, value);
                            prop_assert!(matches!(
                                outcome,
                                StoreOutcome::Inserted
                                    | StoreOutcome::InsertedReusingFreeSlot
                                    | StoreOutcome::ReplacedInPlace
                                    | StoreOutcome::ReplacedWithReinsert
                            ));
                        }
                    }
                }
                Op::Delete { key } => {
                    let outcome = db.delete(&key_bytes(key));
                    if model.remove(&key).is_some() {
                        prop_assert_eq!(outcome, DeleteOutcome::Deleted);
                    } else {
                        prop_assert_eq!(outcome, DeleteOutcome::NotFound);
                    }
                }
                Op::Fetch { key } => {
                    let got = db.fetch(&key_bytes(key));
                    match model.get(&key) {
                        Some(&v) => prop_assert_eq!(got, Some(value_bytes(v))),
                        None => prop_assert_eq!(got, None),
                    }
                }
            }
        }

        // Scan completeness: every live key the model tracked is
        // reachable in exactly one pass of next_record, and nothing else.
        db.rewind();
        let mut scanned = HashMap::new();
        while let Some((k, v)) = db.next_record() {
            let key_str = String::from_utf8(k).unwrap();
            let key: u8 = key_str[1..].parse().unwrap();
            let val_str = String::from_utf8(v).unwrap();
            let val: u8 = val_str[1..].parse().unwrap();
            prop_assert!(scanned.insert(key, val).is_none(), "duplicate key in scan");
        }
        prop_assert_eq!(scanned, model);

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
