/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Resolving a transaction's public key to a fully hydrated account.
//!
//! Authentication reads only committed state: a key must have been indexed as of the end of the
//! previous block to authenticate anything in this one. An absent `keyMap` entry is not an
//! error; the caller proceeds in anonymous mode. Everything else that goes wrong here is an
//! internal failure: the index and the records it points at are engine-maintained, so a
//! dangling path or a mismatched key means a broken invariant.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::account::Account;
use crate::codec::TypedValue;
use crate::error::AppError;
use crate::store::paths::get_value;
use crate::store::symlink::key_map_path;
use crate::store::TxnRead;
use crate::types::{Base64URL, PublicKeyBytes, SignatureBytes};

/// Resolve `pub_key` to its account, hydrating the parent and verifying the signature chain.
/// `Ok(None)` means the key is unknown.
pub fn authenticate<R: TxnRead>(
    view: &R,
    pub_key: &PublicKeyBytes,
) -> Result<Option<Account>, AppError> {
    let key_query = key_map_path(&pub_key.bytes());
    let key_path = match get_value(view, &key_query)? {
        None => return Ok(None),
        Some(TypedValue::String(path)) => path,
        Some(_) => {
            return Err(AppError::Unexpected(format!(
                "unexpected key path value while fetching from {}",
                key_query
            )))
        }
    };

    let (mut account, parent_path) = Account::match_from_path(&key_path).ok_or_else(|| {
        AppError::Unexpected(format!(
            "unsupported key path {} while fetching from {}",
            key_path, key_query
        ))
    })?;
    load_account_record(view, &mut account, &key_path)?;

    if account.pub_key.is_empty() {
        return Err(AppError::Unexpected(format!(
            "account record {}/auth is missing its pubKey",
            key_path
        )));
    }
    if account.pub_key != pub_key.bytes() {
        return Err(AppError::Unexpected(format!(
            "pubkey mismatch: requested {} but resolved to {}",
            pub_key,
            Base64URL::encode(&account.pub_key)
        )));
    }

    if !parent_path.is_empty() {
        if account.parent_sign.is_empty() {
            return Err(AppError::Unexpected(
                "account is a child object but is missing a signature".to_owned(),
            ));
        }
        let (mut parent, _) = Account::match_from_path(&parent_path).ok_or_else(|| {
            AppError::Unexpected(format!("unsupported parent key path {}", parent_path))
        })?;
        load_account_record(view, &mut parent, &parent_path)?;
        if parent.pub_key.is_empty() {
            return Err(AppError::Unexpected(format!(
                "account record {}/auth is missing its pubKey",
                parent_path
            )));
        }
        let message = Account::parent_sign_message(account.kind, &account.pub_key);
        if !verify_signature(&parent.pub_key, &message, &account.parent_sign) {
            return Err(AppError::Unexpected(
                "account is a child object but its signature was failed by its parent".to_owned(),
            ));
        }
        account.parent = Some(Box::new(parent));
    }

    Ok(Some(account))
}

/// Load and decode the auth record at `<path>/auth` into `account`.
pub fn load_account_record<R: TxnRead>(
    view: &R,
    account: &mut Account,
    path: &str,
) -> Result<(), AppError> {
    let auth_path = format!("{}/auth", path);
    let record = get_value(view, &auth_path)?.ok_or_else(|| {
        AppError::Unexpected(format!("missing account record at {}", auth_path))
    })?;
    let record = record.as_map().ok_or_else(|| {
        AppError::Unexpected(format!("unexpected account record value at {}", auth_path))
    })?;
    account
        .decode_record(record, &auth_path, false)
        .map_err(|err| AppError::Unexpected(err.to_string()))
}

/// Verify an Ed25519 signature, tolerating byte strings of the wrong length (they simply fail).
pub fn verify_signature(pub_key: &[u8], message: &[u8], sig: &[u8]) -> bool {
    if pub_key.len() != PublicKeyBytes::LENGTH || sig.len() != SignatureBytes::LENGTH {
        return false;
    }
    let verifying_key = match VerifyingKey::from_bytes(pub_key.try_into().unwrap()) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = Signature::from_bytes(sig.try_into().unwrap());
    verifying_key.verify(message, &signature).is_ok()
}
