/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactional views over the backend store.
//!
//! Three layers, all exposing the same path-keyed read interface:
//! - [CommittedView]: committed state only. Authentication, `CheckTx`, and `Query` read through
//!   this view and can never observe partial block effects.
//! - [BlockTxn]: the one read-write block transaction, opened at `BeginBlock` and flushed as a
//!   write batch at `Commit`. Reads see committed state overlaid with the block's own writes.
//! - [TxnStage]: a scratch overlay for a single client transaction. Merged into the block
//!   transaction only if every entry of the transaction succeeds, so a mid-transaction failure
//!   leaves no partial writes behind.

use std::collections::BTreeMap;

use crate::types::StoreUpdates;

use super::kv_store::{KVGet, KVStore, WriteBatch};

/// Read access to store state, keyed by UTF-8 path.
pub trait TxnRead {
    fn get_raw(&self, path: &str) -> Option<Vec<u8>>;

    /// All pairs under keys starting with `prefix`, ascending. Backend keys that are not valid
    /// UTF-8 cannot participate in the path namespace and are skipped.
    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)>;
}

/// Write access on top of [TxnRead].
pub trait TxnWrite: TxnRead {
    fn set_raw(&mut self, path: &str, value: Vec<u8>);
    fn delete_raw(&mut self, path: &str);
}

/// A read-only view of the backend's committed state.
pub struct CommittedView<K: KVStore> {
    kv: K,
}

impl<K: KVStore> CommittedView<K> {
    pub fn new(kv: K) -> CommittedView<K> {
        CommittedView { kv }
    }
}

impl<K: KVStore> TxnRead for CommittedView<K> {
    fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
        self.kv.snapshot().get(path.as_bytes())
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.kv
            .snapshot()
            .prefix(prefix.as_bytes())
            .into_iter()
            .filter_map(|(key, value)| String::from_utf8(key).ok().map(|key| (key, value)))
            .collect()
    }
}

/// The block's read-write transaction: an update overlay over committed state.
pub struct BlockTxn<K: KVStore> {
    kv: K,
    writes: StoreUpdates,
}

impl<K: KVStore> BlockTxn<K> {
    /// Open a fresh block transaction over the store's current committed state.
    pub fn open(kv: K) -> BlockTxn<K> {
        BlockTxn {
            kv,
            writes: StoreUpdates::new(),
        }
    }

    /// Begin a scratch overlay for one client transaction.
    pub fn stage(&mut self) -> TxnStage<'_, K> {
        TxnStage {
            txn: self,
            pending: StoreUpdates::new(),
        }
    }

    /// Convert the accumulated updates into a write batch ready for [KVStore::write].
    pub fn into_write_batch(self) -> K::WriteBatch {
        let mut wb = K::WriteBatch::new();
        for (key, value) in self.writes.inserts() {
            wb.set(key, value);
        }
        for key in self.writes.deletions() {
            wb.delete(key);
        }
        wb
    }
}

impl<K: KVStore> TxnRead for BlockTxn<K> {
    fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
        let key = path.as_bytes();
        if self.writes.contains_delete(&key.to_vec()) {
            return None;
        }
        if let Some(value) = self.writes.get_insert(&key.to_vec()) {
            return Some(value.clone());
        }
        self.kv.snapshot().get(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let mut merged: BTreeMap<String, Vec<u8>> = self
            .kv
            .snapshot()
            .prefix(prefix.as_bytes())
            .into_iter()
            .filter_map(|(key, value)| String::from_utf8(key).ok().map(|key| (key, value)))
            .collect();
        overlay_prefix(&mut merged, &self.writes, prefix);
        merged.into_iter().collect()
    }
}

impl<K: KVStore> TxnWrite for BlockTxn<K> {
    fn set_raw(&mut self, path: &str, value: Vec<u8>) {
        self.writes.insert(path.as_bytes().to_vec(), value);
    }

    fn delete_raw(&mut self, path: &str) {
        self.writes.delete(path.as_bytes().to_vec());
    }
}

/// A scratch overlay over an open [BlockTxn], holding one client transaction's writes until the
/// whole transaction is known to succeed. Dropping the stage discards them.
pub struct TxnStage<'a, K: KVStore> {
    txn: &'a mut BlockTxn<K>,
    pending: StoreUpdates,
}

impl<'a, K: KVStore> TxnStage<'a, K> {
    /// Fold this transaction's writes into the block transaction.
    pub fn commit(self) {
        self.txn.writes.merge(self.pending);
    }
}

impl<'a, K: KVStore> TxnRead for TxnStage<'a, K> {
    fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
        let key = path.as_bytes().to_vec();
        if self.pending.contains_delete(&key) {
            return None;
        }
        if let Some(value) = self.pending.get_insert(&key) {
            return Some(value.clone());
        }
        self.txn.get_raw(path)
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.txn.scan_prefix(prefix).into_iter().collect();
        overlay_prefix(&mut merged, &self.pending, prefix);
        merged.into_iter().collect()
    }
}

impl<'a, K: KVStore> TxnWrite for TxnStage<'a, K> {
    fn set_raw(&mut self, path: &str, value: Vec<u8>) {
        self.pending.insert(path.as_bytes().to_vec(), value);
    }

    fn delete_raw(&mut self, path: &str) {
        self.pending.delete(path.as_bytes().to_vec());
    }
}

fn overlay_prefix(merged: &mut BTreeMap<String, Vec<u8>>, updates: &StoreUpdates, prefix: &str) {
    for (key, value) in updates.inserts() {
        if let Ok(key) = std::str::from_utf8(key) {
            if key.starts_with(prefix) {
                merged.insert(key.to_owned(), value.clone());
            }
        }
    }
    for key in updates.deletions() {
        if let Ok(key) = std::str::from_utf8(key) {
            if key.starts_with(prefix) {
                merged.remove(key);
            }
        }
    }
}
