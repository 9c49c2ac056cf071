/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reading and writing typed values at hierarchical paths.

use std::collections::HashMap;

use crate::codec::TypedValue;

use super::block_txn::{TxnRead, TxnWrite};
use super::symlink;
use super::StoreError;

/// Symlink resolution gives up after this many indirections and reports a cycle.
const MAX_SYMLINK_HOPS: usize = 16;

/// Fetch and decode the value stored at exactly `path`.
pub fn get_value<R: TxnRead>(txn: &R, path: &str) -> Result<Option<TypedValue>, StoreError> {
    match txn.get_raw(path) {
        None => Ok(None),
        Some(bytes) => Ok(Some(TypedValue::decode(&bytes)?)),
    }
}

/// Fetch `path` as a subtree: a scalar stored at `path` itself wins; otherwise every key under
/// `path + "/"` is assembled into a nested map, splitting the remainders on `/`.
///
/// When an intermediate component of a longer key is already occupied by a scalar, the scalar
/// wins and the conflicting branch is dropped.
pub fn get_subtree<R: TxnRead>(txn: &R, path: &str) -> Result<Option<TypedValue>, StoreError> {
    if let Some(value) = get_value(txn, path)? {
        return Ok(Some(value));
    }
    let prefix = format!("{}/", path);
    let mut root = HashMap::new();
    for (key, bytes) in txn.scan_prefix(&prefix) {
        let value = TypedValue::decode(&bytes)?;
        store_dense_key(&mut root, &key[prefix.len()..], value);
    }
    if root.is_empty() {
        Ok(None)
    } else {
        Ok(Some(TypedValue::Map(root)))
    }
}

/// Write `value` at `path`, maintaining any symlink indexes registered for `path` first.
/// `None` deletes the key.
pub fn set_value<W: TxnWrite>(
    txn: &mut W,
    path: &str,
    value: Option<&TypedValue>,
) -> Result<(), StoreError> {
    symlink::maintain(txn, path, value)?;
    match value {
        None => txn.delete_raw(path),
        Some(value) => txn.set_raw(path, value.encode()),
    }
    Ok(())
}

/// Substitute every `seg:rest` indirection in `path` with the string stored at `seg`.
///
/// Each `seg` must reach into a registered index destination; any other `:` is malformed. An
/// absent mapping yields `None` (the caller treats this as "not found"). Resolution is bounded:
/// exceeding [MAX_SYMLINK_HOPS] is reported as a cycle.
pub fn resolve_symlink<R: TxnRead>(txn: &R, path: &str) -> Result<Option<String>, StoreError> {
    let mut current = path.to_owned();
    let mut hops = 0;
    while let Some(colon) = current.find(':') {
        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(StoreError::SymlinkCycle {
                path: path.to_owned(),
            });
        }
        let segment = &current[..colon];
        let rest = &current[colon + 1..];
        if !symlink::is_indirect_prefix(segment) {
            return Err(StoreError::MalformedIndirection {
                segment: segment.to_owned(),
            });
        }
        match get_value(txn, segment)? {
            None => return Ok(None),
            Some(TypedValue::String(dest)) => {
                current = format!("{}/{}", dest, rest);
            }
            Some(_) => {
                return Err(StoreError::SymlinkUnexpectedType {
                    path: segment.to_owned(),
                })
            }
        }
    }
    Ok(Some(current))
}

fn store_dense_key(store: &mut HashMap<String, TypedValue>, key: &str, value: TypedValue) {
    match key.split_once('/') {
        None => {
            store.insert(key.to_owned(), value);
        }
        Some((head, body)) => match store
            .entry(head.to_owned())
            .or_insert_with(|| TypedValue::Map(HashMap::new()))
        {
            TypedValue::Map(sub) => store_dense_key(sub, body, value),
            // the intermediate component is already a scalar: it wins, the branch is dropped
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::symlink::key_map_path;
    use super::*;

    /// A bare-bones path-keyed store for exercising the operations in this module.
    #[derive(Default)]
    struct TestTxn(BTreeMap<String, Vec<u8>>);

    impl TxnRead for TestTxn {
        fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
            self.0.get(path).cloned()
        }

        fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
            self.0
                .range(prefix.to_owned()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        }
    }

    impl TxnWrite for TestTxn {
        fn set_raw(&mut self, path: &str, value: Vec<u8>) {
            self.0.insert(path.to_owned(), value);
        }

        fn delete_raw(&mut self, path: &str) {
            self.0.remove(path);
        }
    }

    fn auth_record(pub_key: &[u8]) -> TypedValue {
        TypedValue::Map(HashMap::from([(
            "pubKey".to_owned(),
            TypedValue::Bytes(pub_key.to_vec()),
        )]))
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut txn = TestTxn::default();
        set_value(&mut txn, "user/alice/store/x", Some(&TypedValue::Int(5))).unwrap();
        assert_eq!(
            get_value(&txn, "user/alice/store/x").unwrap(),
            Some(TypedValue::Int(5))
        );
        set_value(&mut txn, "user/alice/store/x", None).unwrap();
        assert_eq!(get_value(&txn, "user/alice/store/x").unwrap(), None);
    }

    #[test]
    fn subtree_assembles_nested_maps() {
        let mut txn = TestTxn::default();
        set_value(&mut txn, "d/a/x", Some(&TypedValue::Int(1))).unwrap();
        set_value(&mut txn, "d/a/y", Some(&TypedValue::Int(2))).unwrap();
        set_value(&mut txn, "d/b", Some(&TypedValue::Bool(true))).unwrap();

        let tree = get_subtree(&txn, "d").unwrap().unwrap();
        let root = tree.as_map().unwrap();
        assert_eq!(root.get("b"), Some(&TypedValue::Bool(true)));
        let a = root.get("a").unwrap().as_map().unwrap();
        assert_eq!(a.get("x"), Some(&TypedValue::Int(1)));
        assert_eq!(a.get("y"), Some(&TypedValue::Int(2)));

        assert_eq!(get_subtree(&txn, "missing").unwrap(), None);
    }

    #[test]
    fn subtree_scalar_wins_over_branch() {
        let mut txn = TestTxn::default();
        // "d/a" is a scalar leaf; the deeper "d/a/x" branch is dropped during assembly
        set_value(&mut txn, "d/a", Some(&TypedValue::Int(7))).unwrap();
        set_value(&mut txn, "d/a/x", Some(&TypedValue::Int(8))).unwrap();

        let tree = get_subtree(&txn, "d").unwrap().unwrap();
        assert_eq!(tree.as_map().unwrap().get("a"), Some(&TypedValue::Int(7)));
    }

    #[test]
    fn auth_writes_maintain_key_map() {
        let mut txn = TestTxn::default();
        let first = [1u8; 32];
        let second = [2u8; 32];

        set_value(&mut txn, "user/alice/auth", Some(&auth_record(&first))).unwrap();
        assert_eq!(
            get_value(&txn, &key_map_path(&first)).unwrap(),
            Some(TypedValue::String("user/alice".to_owned()))
        );

        // rotating the key moves the index entry
        set_value(&mut txn, "user/alice/auth", Some(&auth_record(&second))).unwrap();
        assert_eq!(get_value(&txn, &key_map_path(&first)).unwrap(), None);
        assert_eq!(
            get_value(&txn, &key_map_path(&second)).unwrap(),
            Some(TypedValue::String("user/alice".to_owned()))
        );

        // a second account claiming the same key is a conflict
        let err = set_value(&mut txn, "user/bob/auth", Some(&auth_record(&second))).unwrap_err();
        assert!(matches!(err, StoreError::SymlinkConflict { .. }));
    }

    #[test]
    fn deleting_auth_record_drops_key_map_entry() {
        let mut txn = TestTxn::default();
        let key = [3u8; 32];
        set_value(&mut txn, "user/carol/auth", Some(&auth_record(&key))).unwrap();
        set_value(&mut txn, "user/carol/auth", None).unwrap();
        assert_eq!(get_value(&txn, &key_map_path(&key)).unwrap(), None);
    }

    #[test]
    fn email_writes_maintain_attribute_index() {
        let mut txn = TestTxn::default();
        let record = TypedValue::Map(HashMap::from([(
            "hash".to_owned(),
            TypedValue::String("c29tZWhhc2g".to_owned()),
        )]));
        set_value(&mut txn, "user/alice/email", Some(&record)).unwrap();
        assert_eq!(
            get_value(&txn, "users/email/c29tZWhhc2g").unwrap(),
            Some(TypedValue::String("user/alice".to_owned()))
        );
    }

    #[test]
    fn resolves_symlink_paths() {
        let mut txn = TestTxn::default();
        let key = [4u8; 32];
        set_value(&mut txn, "user/dave/auth", Some(&auth_record(&key))).unwrap();

        let resolved = resolve_symlink(&txn, &format!("{}:auth", key_map_path(&key))).unwrap();
        assert_eq!(resolved.as_deref(), Some("user/dave/auth"));

        // paths without indirections pass through untouched
        assert_eq!(
            resolve_symlink(&txn, "user/dave/auth").unwrap().as_deref(),
            Some("user/dave/auth")
        );

        // an absent mapping is "not found", not an error
        assert_eq!(
            resolve_symlink(&txn, "keyMap/bm9ib2R5:auth").unwrap(),
            None
        );
    }

    #[test]
    fn rejects_unregistered_indirections() {
        let txn = TestTxn::default();
        let err = resolve_symlink(&txn, "user/alice/store:x").unwrap_err();
        assert!(matches!(err, StoreError::MalformedIndirection { .. }));
    }

    #[test]
    fn bounded_resolution_reports_cycles() {
        let mut txn = TestTxn::default();
        set_value(
            &mut txn,
            "keyMap/loop",
            Some(&TypedValue::String("keyMap/loop:again".to_owned())),
        )
        .unwrap();
        let err = resolve_symlink(&txn, "keyMap/loop:x").unwrap_err();
        assert!(matches!(err, StoreError::SymlinkCycle { .. }));
    }
}
