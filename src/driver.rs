/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The contract between the state machine and the BFT consensus driver that calls it.
//!
//! The driver serializes the block lifecycle calls (`InitChain`, `BeginBlock`, `DeliverTx`,
//! `EndBlock`, `Commit`), but may interleave `CheckTx`, `Query`, and `Info` with them; those
//! take `&self` and read only committed state. The consensus engine itself lives outside this
//! crate and is only visible through these types.

use std::time::SystemTime;

use crate::error::{AppError, CODESPACE, CODE_OK};
use crate::types::BlockHeight;

/// The callbacks the consensus driver makes into the state machine.
pub trait Application {
    /// Information about the application state, reported on startup.
    fn info(&self) -> InfoResponse;

    /// Called once upon genesis.
    fn init_chain(&mut self, genesis: Genesis);

    /// Signals the beginning of a new block, prior to any `deliver_tx`. The header's height is
    /// ignored; `end_block` is authoritative for the next height.
    fn begin_block(&mut self, header: BlockHeader);

    /// Execute the transaction in full against the open block.
    fn deliver_tx(&mut self, tx: &[u8]) -> TxResponse;

    /// Guardian of the mempool: check a transaction against committed state without executing
    /// it.
    fn check_tx(&self, tx: &[u8]) -> TxResponse;

    /// Signals the end of a block, after all transactions and prior to `commit`.
    fn end_block(&mut self, height: BlockHeight);

    /// Persist the block's state. The returned hash is always empty in this version.
    fn commit(&mut self) -> CommitResponse;

    /// Read data from the application at the current committed height.
    fn query(&self, request: QueryRequest) -> QueryResponse;
}

/// Response to `info`.
pub struct InfoResponse {
    pub last_block_height: BlockHeight,
    pub last_block_hash: Vec<u8>,
}

/// The block header passed to `begin_block`.
pub struct BlockHeader {
    pub height: BlockHeight,
}

/// Response to `deliver_tx` and `check_tx`.
#[derive(Debug, PartialEq, Eq)]
pub struct TxResponse {
    pub code: u32,
    pub codespace: &'static str,
    pub info: String,
}

impl TxResponse {
    pub fn ok() -> TxResponse {
        TxResponse {
            code: CODE_OK,
            codespace: CODESPACE,
            info: String::new(),
        }
    }
}

impl From<AppError> for TxResponse {
    fn from(err: AppError) -> Self {
        TxResponse {
            code: err.code(),
            codespace: CODESPACE,
            info: err.to_string(),
        }
    }
}

/// Response to `commit`.
pub struct CommitResponse {
    pub hash: Vec<u8>,
}

/// A query: a path into the store, and either empty `data` (anonymous) or a
/// `pubkey(32) || signature(64)` over the path string.
pub struct QueryRequest {
    pub path: String,
    pub data: Vec<u8>,
}

/// Response to `query`. `value` is the JSON encoding of the result.
#[derive(Debug, PartialEq, Eq)]
pub struct QueryResponse {
    pub code: u32,
    pub codespace: &'static str,
    pub value: Vec<u8>,
    pub info: String,
}

impl QueryResponse {
    pub fn ok(value: Vec<u8>) -> QueryResponse {
        QueryResponse {
            code: CODE_OK,
            codespace: CODESPACE,
            value,
            info: String::new(),
        }
    }
}

impl From<AppError> for QueryResponse {
    fn from(err: AppError) -> Self {
        QueryResponse {
            code: err.code(),
            codespace: CODESPACE,
            value: Vec::new(),
            info: err.to_string(),
        }
    }
}

/// The genesis document handed to `init_chain`: enough to regenerate the chain's starting
/// parameters.
pub struct Genesis {
    pub time: SystemTime,
    pub chain_id: String,
    pub consensus_params: ConsensusParams,
    pub validators: Vec<GenesisValidator>,
}

impl Default for Genesis {
    fn default() -> Genesis {
        Genesis {
            time: SystemTime::UNIX_EPOCH,
            chain_id: String::new(),
            consensus_params: ConsensusParams::default(),
            validators: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
    pub validator: ValidatorParams,
}

#[derive(Default)]
pub struct BlockParams {
    pub max_bytes: i64,
    pub max_gas: i64,
}

#[derive(Default)]
pub struct EvidenceParams {
    pub max_age_num_blocks: i64,
    pub max_age_duration: i64,
}

#[derive(Default)]
pub struct ValidatorParams {
    pub pub_key_types: Vec<String>,
}

pub struct GenesisValidator {
    pub pub_key: ValidatorKey,
    pub power: i64,
}

pub struct ValidatorKey {
    pub key_type: String,
    pub data: Vec<u8>,
}
