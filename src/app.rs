/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated store's state machine: the [Application] implementation driven by the
//! consensus engine.
//!
//! A block moves through two states: `Idle` (no open transaction) and `Open` (the block
//! transaction created by `BeginBlock` is accepting `DeliverTx`es). `Commit` persists the
//! accumulated writes plus the block-height record and returns to `Idle`. Lifecycle violations
//! by the driver are logged and recovered, never panicked on: a duplicate `BeginBlock` discards
//! the open transaction, and a `DeliverTx` or `Commit` in `Idle` reports an unexpected-error
//! response.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, UNIX_EPOCH};

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use crate::account::{Account, AccountKind};
use crate::auth::authenticate;
use crate::codec::TypedValue;
use crate::driver::{
    Application, BlockHeader, BlockParams, CommitResponse, ConsensusParams, EvidenceParams,
    Genesis, GenesisValidator, InfoResponse, QueryRequest, QueryResponse, TxResponse,
    ValidatorKey, ValidatorParams,
};
use crate::error::AppError;
use crate::logging;
use crate::store::paths::{get_subtree, get_value, set_value};
use crate::store::{BlockTxn, CommittedView, KVStore};
use crate::tx::{
    evaluate_query, execute, unpack_query_sig, unpack_transaction, validate, wire_origin,
};
use crate::types::{Base64URL, BlockHeight};

const BLOCK_STATE_PATH: &str = "mesh/blockState";
const GENESIS_PREFIX: &str = "mesh/genesis";
const GENESIS_TIME_PATH: &str = "mesh/genesis/time";
const GENESIS_CHAIN_ID_PATH: &str = "mesh/genesis/chain_id";
const GENESIS_CONSENSUS_PARAMS_PATH: &str = "mesh/genesis/consensus_params";
const GENESIS_VALIDATORS_PATH: &str = "mesh/genesis/validators";

/// Operator-configurable behavior of the state machine.
pub struct Configuration {
    /// Print the lifecycle event log lines defined in [crate::logging].
    pub log_events: bool,
    /// Fired (once) on the first `Commit` after this signal is registered. The enclosing
    /// program's "run one cycle" mode uses this to know when to shut the node down.
    pub first_commit_signal: Option<Sender<()>>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            log_events: true,
            first_commit_signal: None,
        }
    }
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration::builder().build()
    }
}

pub struct ConfigurationBuilder {
    log_events: bool,
    first_commit_signal: Option<Sender<()>>,
}

impl ConfigurationBuilder {
    pub fn log_events(mut self, log_events: bool) -> ConfigurationBuilder {
        self.log_events = log_events;
        self
    }

    pub fn notify_first_commit(mut self, signal: Sender<()>) -> ConfigurationBuilder {
        self.first_commit_signal = Some(signal);
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            log_events: self.log_events,
            first_commit_signal: self.first_commit_signal,
        }
    }
}

#[derive(Default)]
struct TreeState {
    last_block_height: BlockHeight,
    next_block_height: BlockHeight,
    last_block_hash: Vec<u8>,
}

/// The deterministic application state machine behind the consensus driver.
pub struct AthenaStore<K: KVStore> {
    kv: K,
    config: Configuration,
    tree_state: TreeState,
    block_txn: Option<BlockTxn<K>>,
}

impl<K: KVStore> AthenaStore<K> {
    /// Create a state machine over `kv`, reading the block-state record left by the last
    /// committed block (if any).
    pub fn new(kv: K, config: Configuration) -> Result<AthenaStore<K>, AppError> {
        let tree_state = load_tree_state(&kv)?;
        let store = AthenaStore {
            kv,
            config,
            tree_state,
            block_txn: None,
        };
        if let Some(genesis) = store.genesis_snapshot()? {
            log::info!(
                "resuming chain {} at height {}",
                genesis.chain_id,
                store.tree_state.last_block_height
            );
        }
        Ok(store)
    }

    /// Rebuild the genesis document persisted at chain initialization, or `None` if this store
    /// has never been initialized.
    pub fn genesis_snapshot(&self) -> Result<Option<Genesis>, AppError> {
        let view = CommittedView::new(self.kv.clone());
        match get_subtree(&view, GENESIS_PREFIX)? {
            None => Ok(None),
            Some(tree) => {
                let tree = tree
                    .as_map()
                    .ok_or_else(|| malformed_genesis(GENESIS_PREFIX))?;
                Ok(Some(decode_genesis(tree)?))
            }
        }
    }

    fn try_init_chain(&mut self, genesis: &Genesis) -> Result<SigningKey, AppError> {
        if self.genesis_snapshot()?.is_some() {
            return Err(AppError::Unexpected(
                "chain is already initialized".to_owned(),
            ));
        }
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut txn = BlockTxn::open(self.kv.clone());

        create_root_account(&mut txn, &signing_key.verifying_key().to_bytes())?;

        // store the genesis parameters so we can regenerate them
        let time = genesis
            .time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let time_bytes = (time.as_secs(), time.subsec_nanos())
            .try_to_vec()
            .map_err(|err| AppError::Unexpected(err.to_string()))?;
        set_value(&mut txn, GENESIS_TIME_PATH, Some(&TypedValue::Bytes(time_bytes)))?;
        set_value(
            &mut txn,
            GENESIS_CHAIN_ID_PATH,
            Some(&TypedValue::String(genesis.chain_id.clone())),
        )?;

        let params = &genesis.consensus_params;
        let consensus = TypedValue::Map(HashMap::from([
            (
                "Block".to_owned(),
                TypedValue::Map(HashMap::from([
                    ("MaxBytes".to_owned(), TypedValue::Int(params.block.max_bytes)),
                    ("MaxGas".to_owned(), TypedValue::Int(params.block.max_gas)),
                ])),
            ),
            (
                "Evidence".to_owned(),
                TypedValue::Map(HashMap::from([
                    (
                        "MaxAgeNumBlocks".to_owned(),
                        TypedValue::Int(params.evidence.max_age_num_blocks),
                    ),
                    (
                        "MaxAgeDuration".to_owned(),
                        TypedValue::Int(params.evidence.max_age_duration),
                    ),
                ])),
            ),
            (
                "Validator".to_owned(),
                TypedValue::Map(HashMap::from([(
                    "PubKeyTypes".to_owned(),
                    TypedValue::Array(
                        params
                            .validator
                            .pub_key_types
                            .iter()
                            .map(|t| TypedValue::String(t.clone()))
                            .collect(),
                    ),
                )])),
            ),
        ]));
        set_value(&mut txn, GENESIS_CONSENSUS_PARAMS_PATH, Some(&consensus))?;

        let validators = TypedValue::Array(
            genesis
                .validators
                .iter()
                .map(|validator| {
                    TypedValue::Map(HashMap::from([
                        (
                            "PubKey".to_owned(),
                            TypedValue::Map(HashMap::from([
                                (
                                    "Type".to_owned(),
                                    TypedValue::String(validator.pub_key.key_type.clone()),
                                ),
                                (
                                    "Data".to_owned(),
                                    TypedValue::Bytes(validator.pub_key.data.clone()),
                                ),
                            ])),
                        ),
                        ("Power".to_owned(), TypedValue::Int(validator.power)),
                    ]))
                })
                .collect(),
        );
        set_value(&mut txn, GENESIS_VALIDATORS_PATH, Some(&validators))?;

        // make the bootstrap block state observable before the first EndBlock
        set_value(
            &mut txn,
            BLOCK_STATE_PATH,
            Some(&TypedValue::Map(HashMap::from([(
                "lastBlockHeight".to_owned(),
                TypedValue::Int(0),
            )]))),
        )?;

        self.kv.write(txn.into_write_batch());
        Ok(signing_key)
    }
}

impl<K: KVStore> Application for AthenaStore<K> {
    fn info(&self) -> InfoResponse {
        InfoResponse {
            last_block_height: self.tree_state.last_block_height,
            last_block_hash: self.tree_state.last_block_hash.clone(),
        }
    }

    fn init_chain(&mut self, genesis: Genesis) {
        match self.try_init_chain(&genesis) {
            Ok(signing_key) => {
                if self.config.log_events {
                    logging::log_init_chain(&genesis.chain_id);
                }
                log::warn!(
                    "root user successfully created with key: {}",
                    Base64URL::encode(signing_key.to_keypair_bytes())
                );
                log::warn!("REMEMBER THIS KEY, it will not be recoverable again for this chain");
            }
            Err(err) => {
                log::error!("unexpected error trying to initialize the chain: {}", err)
            }
        }
    }

    fn begin_block(&mut self, _header: BlockHeader) {
        if self.block_txn.is_some() {
            log::warn!("calling BeginBlock with an open transaction (transaction discarded)");
        }
        if self.config.log_events {
            logging::log_begin_block();
        }
        self.block_txn = Some(BlockTxn::open(self.kv.clone()));
    }

    fn deliver_tx(&mut self, tx: &[u8]) -> TxResponse {
        let response = self.deliver_tx_inner(tx);
        if self.config.log_events {
            logging::log_deliver_tx(wire_origin(tx), response.code, &response.info);
        }
        response
    }

    fn check_tx(&self, tx: &[u8]) -> TxResponse {
        let tx = match unpack_transaction(tx) {
            Ok(tx) => tx,
            Err(err) => return err.into(),
        };
        let view = CommittedView::new(self.kv.clone());
        let login = match tx.pub_key {
            Some(key) => match authenticate(&view, &key) {
                Ok(login) => login,
                Err(err) => return err.into(),
            },
            None => None,
        };
        match validate(&view, &tx, login.as_ref()) {
            Ok(()) => TxResponse::ok(),
            Err(err) => err.into(),
        }
    }

    fn end_block(&mut self, height: BlockHeight) {
        self.tree_state.next_block_height = height;
    }

    fn commit(&mut self) -> CommitResponse {
        let mut txn = match self.block_txn.take() {
            Some(txn) => txn,
            None => {
                log::warn!("calling Commit with no open transaction");
                return CommitResponse { hash: Vec::new() };
            }
        };

        let block_state = TypedValue::Map(HashMap::from([(
            "lastBlockHeight".to_owned(),
            TypedValue::Int(self.tree_state.next_block_height.int()),
        )]));
        if let Err(err) = set_value(&mut txn, BLOCK_STATE_PATH, Some(&block_state)) {
            log::error!("unexpected error trying to update block state: {}", err);
        }
        self.kv.write(txn.into_write_batch());

        if self.tree_state.next_block_height != BlockHeight::new(0) {
            self.tree_state.last_block_height = self.tree_state.next_block_height;
            self.tree_state.next_block_height = BlockHeight::new(0);
        }
        if self.config.log_events {
            logging::log_commit_block(self.tree_state.last_block_height);
        }
        // if we're set to run a single cycle, signal that a Commit has just completed
        if let Some(signal) = self.config.first_commit_signal.take() {
            let _ = signal.send(());
        }
        CommitResponse { hash: Vec::new() }
    }

    fn query(&self, request: QueryRequest) -> QueryResponse {
        let response = self.query_inner(&request);
        if self.config.log_events {
            logging::log_query(wire_origin(&request.data), response.code, &request.path);
        }
        response
    }
}

impl<K: KVStore> AthenaStore<K> {
    fn deliver_tx_inner(&mut self, tx: &[u8]) -> TxResponse {
        let tx = match unpack_transaction(tx) {
            Ok(tx) => tx,
            Err(err) => return err.into(),
        };
        // authentication reads committed state only, never the open block transaction
        let login = match tx.pub_key {
            Some(key) => match authenticate(&CommittedView::new(self.kv.clone()), &key) {
                Ok(login) => login,
                Err(err) => return err.into(),
            },
            None => None,
        };
        let next_height = BlockHeight::new(self.tree_state.last_block_height.int() + 1);
        let txn = match self.block_txn.as_mut() {
            Some(txn) => txn,
            None => {
                return AppError::Unexpected(
                    "DeliverTx called with no open block transaction".to_owned(),
                )
                .into()
            }
        };
        if let Err(err) = validate(txn, &tx, login.as_ref()) {
            return err.into();
        }
        let mut stage = txn.stage();
        match execute(&mut stage, &tx, login.as_ref(), next_height) {
            Ok(()) => {
                stage.commit();
                TxResponse::ok()
            }
            Err(err) => err.into(),
        }
    }

    fn query_inner(&self, request: &QueryRequest) -> QueryResponse {
        let view = CommittedView::new(self.kv.clone());
        let login = match unpack_query_sig(&request.path, &request.data) {
            Ok(Some(key)) => match authenticate(&view, &key) {
                Ok(login) => login,
                Err(err) => return err.into(),
            },
            Ok(None) => None,
            Err(err) => return err.into(),
        };
        let value = match evaluate_query(&view, &request.path, login.as_ref()) {
            Ok(value) => value,
            Err(err) => return err.into(),
        };
        match serde_json::to_vec(&value) {
            Ok(bytes) => QueryResponse::ok(bytes),
            Err(err) => AppError::Unexpected(err.to_string()).into(),
        }
    }
}

fn load_tree_state<K: KVStore>(kv: &K) -> Result<TreeState, AppError> {
    let view = CommittedView::new(kv.clone());
    let mut state = TreeState::default();
    match get_value(&view, BLOCK_STATE_PATH)? {
        // brand new store, use defaults
        None => {}
        Some(TypedValue::Map(record)) => {
            if let Some(height) = record.get("lastBlockHeight") {
                state.last_block_height =
                    BlockHeight::new(height.as_int().ok_or_else(|| {
                        AppError::Unexpected(format!(
                            "unexpected lastBlockHeight querying the block state: {:?}",
                            height
                        ))
                    })?);
            }
            if let Some(hash) = record.get("lastBlockHash") {
                state.last_block_hash = hash
                    .as_bytes()
                    .ok_or_else(|| {
                        AppError::Unexpected(format!(
                            "unexpected lastBlockHash querying the block state: {:?}",
                            hash
                        ))
                    })?
                    .to_vec();
            }
        }
        Some(other) => {
            return Err(AppError::Unexpected(format!(
                "unexpected value querying the block state: {:?}",
                other
            )))
        }
    }
    Ok(state)
}

/// The inverse of the snapshot assembly in `try_init_chain`: rebuild a [Genesis] from the
/// subtree persisted under `mesh/genesis/`.
fn decode_genesis(tree: &HashMap<String, TypedValue>) -> Result<Genesis, AppError> {
    let time_bytes = tree
        .get("time")
        .and_then(TypedValue::as_bytes)
        .ok_or_else(|| malformed_genesis("time"))?;
    let (secs, nanos) = <(u64, u32)>::deserialize(&mut &*time_bytes)
        .map_err(|err| AppError::Unexpected(format!("genesis time bytes: {}", err)))?;

    let chain_id = tree
        .get("chain_id")
        .and_then(TypedValue::as_str)
        .ok_or_else(|| malformed_genesis("chain_id"))?
        .to_owned();

    let params = tree
        .get("consensus_params")
        .and_then(TypedValue::as_map)
        .ok_or_else(|| malformed_genesis("consensus_params"))?;
    let block = params
        .get("Block")
        .and_then(TypedValue::as_map)
        .ok_or_else(|| malformed_genesis("consensus_params/Block"))?;
    let evidence = params
        .get("Evidence")
        .and_then(TypedValue::as_map)
        .ok_or_else(|| malformed_genesis("consensus_params/Evidence"))?;
    let validator = params
        .get("Validator")
        .and_then(TypedValue::as_map)
        .ok_or_else(|| malformed_genesis("consensus_params/Validator"))?;
    let pub_key_types = match validator.get("PubKeyTypes") {
        Some(TypedValue::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| malformed_genesis("consensus_params/Validator/PubKeyTypes"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(malformed_genesis("consensus_params/Validator/PubKeyTypes")),
    };
    let consensus_params = ConsensusParams {
        block: BlockParams {
            max_bytes: block
                .get("MaxBytes")
                .and_then(TypedValue::as_int)
                .ok_or_else(|| malformed_genesis("consensus_params/Block/MaxBytes"))?,
            max_gas: block
                .get("MaxGas")
                .and_then(TypedValue::as_int)
                .ok_or_else(|| malformed_genesis("consensus_params/Block/MaxGas"))?,
        },
        evidence: EvidenceParams {
            max_age_num_blocks: evidence
                .get("MaxAgeNumBlocks")
                .and_then(TypedValue::as_int)
                .ok_or_else(|| malformed_genesis("consensus_params/Evidence/MaxAgeNumBlocks"))?,
            max_age_duration: evidence
                .get("MaxAgeDuration")
                .and_then(TypedValue::as_int)
                .ok_or_else(|| malformed_genesis("consensus_params/Evidence/MaxAgeDuration"))?,
        },
        validator: ValidatorParams { pub_key_types },
    };

    let validators = match tree.get("validators") {
        Some(TypedValue::Array(items)) => items
            .iter()
            .map(decode_genesis_validator)
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(malformed_genesis("validators")),
    };

    Ok(Genesis {
        time: UNIX_EPOCH + Duration::new(secs, nanos),
        chain_id,
        consensus_params,
        validators,
    })
}

fn decode_genesis_validator(value: &TypedValue) -> Result<GenesisValidator, AppError> {
    let entry = value
        .as_map()
        .ok_or_else(|| malformed_genesis("validators"))?;
    let pub_key = entry
        .get("PubKey")
        .and_then(TypedValue::as_map)
        .ok_or_else(|| malformed_genesis("validators/PubKey"))?;
    Ok(GenesisValidator {
        pub_key: ValidatorKey {
            key_type: pub_key
                .get("Type")
                .and_then(TypedValue::as_str)
                .ok_or_else(|| malformed_genesis("validators/PubKey/Type"))?
                .to_owned(),
            data: pub_key
                .get("Data")
                .and_then(TypedValue::as_bytes)
                .ok_or_else(|| malformed_genesis("validators/PubKey/Data"))?
                .to_vec(),
        },
        power: entry
            .get("Power")
            .and_then(TypedValue::as_int)
            .ok_or_else(|| malformed_genesis("validators/Power"))?,
    })
}

fn malformed_genesis(field: &str) -> AppError {
    AppError::Unexpected(format!(
        "genesis snapshot is missing or malformed at {}",
        field
    ))
}

fn create_root_account<K: KVStore>(
    txn: &mut BlockTxn<K>,
    pub_key: &[u8; 32],
) -> Result<(), AppError> {
    let mut root = Account::new(AccountKind::Root);
    root.pub_key = pub_key.to_vec();
    let path = root
        .path()
        .ok_or_else(|| AppError::Unexpected("attempt to create an invalid user".to_owned()))?;

    let auth_path = format!("{}/auth", path);
    if get_value(txn, &auth_path)?.is_some() {
        return Err(AppError::Unexpected("account already exists".to_owned()));
    }
    set_value(
        txn,
        &auth_path,
        Some(&TypedValue::Map(root.assemble_for_storage())),
    )?;
    Ok(())
}
