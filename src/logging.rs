/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out lifecycle events.
//!
//! The state machine logs using the [log](https://docs.rs/log/latest/log/) crate; to get these
//! messages printed onto a terminal or to a file, set up a logging implementation. Event log
//! messages are CSVs with at least two values: the name of the event in PascalCase, and the
//! time the event was emitted (as seconds since the Unix Epoch). Transaction and query lines
//! add the origin of the request, rendered as the first seven characters of the base64url
//! encoding of the submitter's public key (`anonymous` for unsigned payloads) so it can be
//! matched against the reverse index and query projections, which use the same alphabet.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{Base64URL, BlockHeight};

// Names of each event in PascalCase for printing:
pub const INIT_CHAIN: &str = "InitChain";
pub const BEGIN_BLOCK: &str = "BeginBlock";
pub const DELIVER_TX: &str = "DeliverTx";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const QUERY: &str = "Query";

pub(crate) fn log_init_chain(chain_id: &str) {
    log::info!("{}, {}, {}", INIT_CHAIN, secs_since_unix_epoch(), chain_id)
}

pub(crate) fn log_begin_block() {
    log::info!("{}, {}", BEGIN_BLOCK, secs_since_unix_epoch())
}

pub(crate) fn log_deliver_tx(origin: Option<&[u8]>, code: u32, info: &str) {
    if code == 0 {
        log::info!(
            "{}, {}, {}, {}",
            DELIVER_TX,
            secs_since_unix_epoch(),
            render_origin(origin),
            code
        )
    } else {
        log::info!(
            "{}, {}, {}, {}, {}",
            DELIVER_TX,
            secs_since_unix_epoch(),
            render_origin(origin),
            code,
            info
        )
    }
}

pub(crate) fn log_commit_block(height: BlockHeight) {
    log::info!("{}, {}, {}", COMMIT_BLOCK, secs_since_unix_epoch(), height)
}

pub(crate) fn log_query(origin: Option<&[u8]>, code: u32, path: &str) {
    log::info!(
        "{}, {}, {}, {}, {}",
        QUERY,
        secs_since_unix_epoch(),
        render_origin(origin),
        code,
        path
    )
}

fn render_origin(origin: Option<&[u8]>) -> String {
    match origin {
        Some(key) => first_seven_base64_chars(key),
        None => "anonymous".to_owned(),
    }
}

/// The first seven characters of the base64url encoding of a byte slice, for compact rendering
/// of keys in log lines.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = Base64URL::encode(bytes).to_string();
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time must be after the unix epoch")
        .as_secs()
}
