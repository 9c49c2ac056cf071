/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The required interface for the ordered key-value backend provided by the user.
//!
//! The backend treats keys as opaque byte strings; this crate lays a `/`-separated hierarchical
//! namespace over them, so the backend must support iteration over a key prefix in ascending key
//! order in addition to point reads and atomic batched writes.

/// Read access to a key-value store or to a snapshot of one.
pub trait KVGet {
    /// Get the value at `key`, if any.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All key-value pairs whose key starts with `prefix`, in ascending key order.
    fn prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// An ordered key-value store that supports atomic batched writes and consistent snapshots.
pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Atomically apply a batch of insertions and deletions.
    fn write(&mut self, wb: Self::WriteBatch);

    /// A read view that will not observe writes applied after this call.
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

/// A set of insertions and deletions applied into a [KVStore] as one atomic unit.
pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}
