/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The path store: a slash-structured hierarchical namespace layered over a flat, ordered
//! key-value backend, with subtree reads and automatically maintained symlink indexes.

pub mod block_txn;
pub mod kv_store;
pub mod paths;
pub mod symlink;

pub use block_txn::{BlockTxn, CommittedView, TxnRead, TxnStage, TxnWrite};
pub use kv_store::{KVGet, KVStore, WriteBatch};

use std::fmt::{self, Display, Formatter};

use crate::codec::CodecError;

/// Error from a path-store operation.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// A stored value failed to decode, or a value could not be encoded.
    Codec(CodecError),
    /// A symlink index entry already exists at the destination and points elsewhere.
    SymlinkConflict { dest: String },
    /// A symlink destination resolved to a non-string value.
    SymlinkUnexpectedType { path: String },
    /// A `:` segment whose prefix is not a registered symlink index.
    MalformedIndirection { segment: String },
    /// Symlink resolution did not terminate within the hop bound.
    SymlinkCycle { path: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Codec(err) => write!(f, "{}", err),
            StoreError::SymlinkConflict { dest } => {
                write!(f, "unexpected: there is already a symlink declared at {}", dest)
            }
            StoreError::SymlinkUnexpectedType { path } => {
                write!(f, "symlink destination at {} has unexpected type", path)
            }
            StoreError::MalformedIndirection { segment } => {
                write!(f, "{} does not name a symlink index", segment)
            }
            StoreError::SymlinkCycle { path } => {
                write!(f, "symlink resolution of {} does not terminate", path)
            }
        }
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        StoreError::Codec(err)
    }
}
