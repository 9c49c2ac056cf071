/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Inert types shared across the crate. These follow the newtype pattern: they are sent around
//! and inspected, but have no active behavior of their own.

use std::{
    collections::{hash_map, hash_set, HashMap, HashSet},
    fmt::{self, Display, Formatter},
    hash::Hash,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

/// Height of a committed block. `EndBlock` is authoritative for the next value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockHeight(i64);

impl BlockHeight {
    pub const fn new(int: i64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> i64 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// An Ed25519 public key in transit. 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes([u8; 32]);

impl PublicKeyBytes {
    pub const LENGTH: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for PublicKeyBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Base64URL::encode(self.0).fmt(f)
    }
}

/// An Ed25519 signature in transit. 64 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const LENGTH: usize = 64;

    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// A String that is the Base64URL (RFC 4648, unpadded) encoding of a slice of bytes. Every
/// user-facing rendering of key material, signatures, and hashes in this crate uses this form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Base64URL(String);

impl Base64URL {
    /// Encode bytes into a Base64URL string.
    pub fn encode<T: AsRef<[u8]>>(bytes: T) -> Base64URL {
        Base64URL(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Try to decode a string into a vector of bytes. Returns a [base64::DecodeError] if the
    /// string is not valid unpadded Base64URL.
    pub fn decode<T: ?Sized + AsRef<[u8]>>(string: &T) -> Result<Vec<u8>, base64::DecodeError> {
        URL_SAFE_NO_PAD.decode(string)
    }
}

impl Display for Base64URL {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::ops::Deref for Base64URL {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A buffered set of key-value insertions and deletions, applied into the backend as one batch.
#[derive(Clone, Default)]
pub struct UpdateSet<K: Eq + Hash, V> {
    inserts: HashMap<K, V>,
    deletes: HashSet<K>,
}

impl<K: Eq + Hash, V> UpdateSet<K, V> {
    pub fn new() -> Self {
        Self {
            inserts: HashMap::new(),
            deletes: HashSet::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.deletes.remove(&key);
        self.inserts.insert(key, value);
    }

    pub fn delete(&mut self, key: K) {
        self.inserts.remove(&key);
        self.deletes.insert(key);
    }

    pub fn get_insert(&self, key: &K) -> Option<&V> {
        self.inserts.get(key)
    }

    pub fn contains_delete(&self, key: &K) -> bool {
        self.deletes.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// Iterator over all of the key-value pairs inserted by this `UpdateSet`.
    pub fn inserts(&self) -> hash_map::Iter<K, V> {
        self.inserts.iter()
    }

    /// Iterator over all of the keys deleted by this `UpdateSet`.
    pub fn deletions(&self) -> hash_set::Iter<K> {
        self.deletes.iter()
    }

    /// Fold another update set into this one. `other`'s operations win on overlap.
    pub fn merge(&mut self, other: UpdateSet<K, V>) {
        for (key, value) in other.inserts {
            self.insert(key, value);
        }
        for key in other.deletes {
            self.delete(key);
        }
    }
}

/// The updates accumulated by an open block transaction, keyed by raw store key.
pub type StoreUpdates = UpdateSet<Vec<u8>, Vec<u8>>;
