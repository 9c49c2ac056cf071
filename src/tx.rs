/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The transaction engine: unpacking the wire form, validating entries against the access
//! rules, executing them against the open block transaction, and evaluating queries.
//!
//! A transaction is `pubkey(32) || signature(64) || json_body`, the signature taken over the
//! body bytes. An all-zero prefix carries an unsigned body: acceptable for queries, but writes
//! always require a signature. The write-side "anonymous mode" is a *signed* transaction whose
//! key is simply not yet known to the store, which is how new users register themselves.
//!
//! The body is either a JSON object `{path: value, ...}` or an array of `[path, value]` pairs;
//! the array form preserves the client's ordering. A JSON `null` value deletes the key.

use serde_json::Value;

use crate::account::{Account, AccountKind};
use crate::acl;
use crate::auth::{load_account_record, verify_signature};
use crate::codec::TypedValue;
use crate::error::AppError;
use crate::store::paths::{get_value, resolve_symlink, set_value};
use crate::store::{TxnRead, TxnWrite};
use crate::types::{Base64URL, BlockHeight, PublicKeyBytes, SignatureBytes};

/// Combined length of the public key and signature that prefix every transaction.
pub const SIGNED_PREFIX_LEN: usize = PublicKeyBytes::LENGTH + SignatureBytes::LENGTH;

/// An unpacked transaction: the submitter's key (`None` for the unsigned form) and the writes
/// it requests, in application order.
pub struct Transaction {
    pub pub_key: Option<PublicKeyBytes>,
    pub entries: Vec<(String, Option<TypedValue>)>,
}

/// Unpack and signature-check a raw transaction.
pub fn unpack_transaction(bytes: &[u8]) -> Result<Transaction, AppError> {
    if bytes.len() < SIGNED_PREFIX_LEN {
        return Err(AppError::TxTooShort);
    }
    let (prefix, body) = bytes.split_at(SIGNED_PREFIX_LEN);
    let pub_key = if prefix.iter().all(|b| *b == 0) {
        None
    } else {
        let key = PublicKeyBytes::new(prefix[..PublicKeyBytes::LENGTH].try_into().unwrap());
        if !verify_signature(&key.bytes(), body, &prefix[PublicKeyBytes::LENGTH..]) {
            return Err(AppError::TxBadSign(
                "transaction signature invalid".to_owned(),
            ));
        }
        Some(key)
    };
    let entries = parse_entries(body)?;
    Ok(Transaction { pub_key, entries })
}

/// Unpack the optional signature of a query over its path. Empty (or all-zero) data is the
/// anonymous form.
pub fn unpack_query_sig(path: &str, data: &[u8]) -> Result<Option<PublicKeyBytes>, AppError> {
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < SIGNED_PREFIX_LEN {
        return Err(AppError::TxTooShort);
    }
    if data[..SIGNED_PREFIX_LEN].iter().all(|b| *b == 0) {
        return Ok(None);
    }
    let key = PublicKeyBytes::new(data[..PublicKeyBytes::LENGTH].try_into().unwrap());
    if !verify_signature(
        &key.bytes(),
        path.as_bytes(),
        &data[PublicKeyBytes::LENGTH..SIGNED_PREFIX_LEN],
    ) {
        return Err(AppError::TxBadSign("query signature invalid".to_owned()));
    }
    Ok(Some(key))
}

/// The submitter's public key as it sits on the wire, without verifying anything: `None` for
/// payloads that are too short to carry the prefix or that use the all-zero (unsigned) form.
/// Used to render the origin of a request in log lines.
pub(crate) fn wire_origin(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < SIGNED_PREFIX_LEN || bytes[..SIGNED_PREFIX_LEN].iter().all(|b| *b == 0) {
        return None;
    }
    Some(&bytes[..PublicKeyBytes::LENGTH])
}

/// Check every entry of `tx` without executing anything. `login` is the authenticated account,
/// or `None` when the submitter's key is unknown.
pub fn validate<R: TxnRead>(
    txn: &R,
    tx: &Transaction,
    login: Option<&Account>,
) -> Result<(), AppError> {
    for (path, value) in &tx.entries {
        let resolved = resolve_entry_path(txn, path)?;
        if login.is_some() {
            let (granted, _) = acl::can_access(login, true, &resolved);
            if !granted {
                return Err(AppError::Unauthorized(format!(
                    "not authorized to write to {}",
                    resolved
                )));
            }
        } else {
            let key = require_signature(tx)?;
            check_self_registration(txn, &key, &resolved, value.as_ref())?;
        }
    }
    Ok(())
}

/// Apply every entry of `tx` to `txn`. The caller stages `txn` so that an `Err` from here
/// leaves no partial writes behind. `next_height` is the height the current block will commit
/// as; it becomes `created` for records written for the first time.
pub fn execute<W: TxnWrite>(
    txn: &mut W,
    tx: &Transaction,
    login: Option<&Account>,
    next_height: BlockHeight,
) -> Result<(), AppError> {
    for (path, value) in &tx.entries {
        let resolved = resolve_entry_path(txn, path)?;
        let rewritten: Option<TypedValue>;
        let value = if login.is_some() {
            let (granted, is_auth_path) = acl::can_access(login, true, &resolved);
            if !granted {
                return Err(AppError::Unauthorized(format!(
                    "not authorized to write to {}",
                    resolved
                )));
            }
            if is_auth_path {
                rewritten = Some(rewrite_auth_record(txn, &resolved, value.as_ref(), next_height)?);
                rewritten.as_ref()
            } else {
                value.as_ref()
            }
        } else {
            let key = require_signature(tx)?;
            let mut account = check_self_registration(txn, &key, &resolved, value.as_ref())?;
            account.created = next_height.int();
            rewritten = Some(TypedValue::Map(account.assemble_for_storage()));
            rewritten.as_ref()
        };
        set_value(txn, &resolved, value)?;
    }
    Ok(())
}

/// Evaluate a single-path query against a committed view, returning the JSON response value.
pub fn evaluate_query<R: TxnRead>(
    view: &R,
    path: &str,
    login: Option<&Account>,
) -> Result<Value, AppError> {
    let resolved = resolve_entry_path(view, path)?;
    if login.is_some() {
        let (granted, is_auth_path) = acl::can_access(login, false, &resolved);
        if !granted {
            return Err(AppError::Unauthorized(format!(
                "not authorized to read from {}",
                resolved
            )));
        }
        if is_auth_path {
            return Ok(match query_account(view, &resolved)? {
                None => Value::Null,
                Some(account) => typed_map_to_json(account.assemble_for_query()),
            });
        }
        return Ok(match get_value(view, &resolved)? {
            None => Value::Null,
            Some(value) => typed_to_json(&value),
        });
    }

    // Unauthenticated: auth-pattern paths expose their public projection (this is how clients
    // fetch the salt and key parameters they need to log in); everything else follows the
    // anonymous rules of the ACL table.
    if acl::is_auth_pattern(&resolved) {
        return Ok(match query_account(view, &resolved)? {
            None => Value::Null,
            Some(account) => typed_map_to_json(account.anonymous_projection()),
        });
    }
    let (granted, _) = acl::can_access(None, false, &resolved);
    if !granted {
        return Err(AppError::Unauthorized(format!(
            "query of {} requires a valid user",
            resolved
        )));
    }
    Ok(match get_value(view, &resolved)? {
        None => Value::Null,
        Some(value) => typed_to_json(&value),
    })
}

/// Rebuild the canonical auth record for a write to `path`.
///
/// The engine trusts only what it reassembles: the current record's `created` (or `next_height`
/// for a first write), the client-supplied key material and extras, and a parent signature that
/// must verify against the parent's stored key.
fn rewrite_auth_record<R: TxnRead>(
    txn: &R,
    path: &str,
    value: Option<&TypedValue>,
    next_height: BlockHeight,
) -> Result<TypedValue, AppError> {
    let owner_path = path.strip_suffix("/auth").ok_or_else(|| {
        AppError::Unexpected(format!(
            "{} is flagged as an auth path but does not end in /auth",
            path
        ))
    })?;
    let (mut account, parent_path) = Account::match_from_path(owner_path).ok_or_else(|| {
        AppError::Unexpected(format!(
            "{} is flagged as an auth path but its account kind cannot be resolved",
            path
        ))
    })?;

    // start from the existing record, if there is one
    if let Some(existing) = get_value(txn, path)? {
        if let Some(record) = existing.as_map() {
            account
                .decode_record(record, path, false)
                .map_err(|err| AppError::Unexpected(err.to_string()))?;
        }
    }
    account.attrs.clear();
    if account.created == 0 {
        account.created = next_height.int();
    }

    let incoming = value.and_then(TypedValue::as_map).ok_or_else(|| {
        AppError::BadFormat(format!(
            "attempt to change {} which is an auth key but the value is not a map",
            path
        ))
    })?;
    account
        .decode_record(incoming, path, true)
        .map_err(|err| AppError::BadFormat(err.to_string()))?;

    if !parent_path.is_empty() {
        let (mut parent, _) = Account::match_from_path(&parent_path).ok_or_else(|| {
            AppError::Unexpected(format!("unsupported parent key path {}", parent_path))
        })?;
        load_account_record(txn, &mut parent, &parent_path)
            .map_err(|err| AppError::BadFormat(err.to_string()))?;
        if parent.pub_key.is_empty() {
            return Err(AppError::BadFormat(format!(
                "account record {}/auth is missing its pubKey",
                parent_path
            )));
        }
        let message = Account::parent_sign_message(account.kind, &account.pub_key);
        if !verify_signature(&parent.pub_key, &message, &account.parent_sign) {
            return Err(AppError::Unauthorized(
                "account is a child object but its signature was failed by its parent".to_owned(),
            ));
        }
    }

    Ok(TypedValue::Map(account.assemble_for_storage()))
}

/// The self-registration exemption: a signed transaction from an unknown key may create exactly
/// one thing, a new user record at `user/<name>/auth` embedding that same key.
fn check_self_registration<R: TxnRead>(
    txn: &R,
    tx_key: &PublicKeyBytes,
    path: &str,
    value: Option<&TypedValue>,
) -> Result<Account, AppError> {
    let unknown = || {
        AppError::UnknownUser(format!(
            "did not recognize key {}",
            Base64URL::encode(tx_key.bytes())
        ))
    };
    let record = value.and_then(TypedValue::as_map).ok_or_else(unknown)?;
    let (_, name) = acl::user_auth_match(path).ok_or_else(unknown)?;

    let mut account = Account::new(AccountKind::User);
    account.name = name.clone();
    account
        .decode_record(record, path, true)
        .map_err(|_| unknown())?;
    if account.pub_key != tx_key.bytes() {
        return Err(unknown());
    }
    if get_value(txn, path)?.is_some() {
        return Err(AppError::Unauthorized(format!(
            "user {} already exists",
            name
        )));
    }
    Ok(account)
}

fn query_account<R: TxnRead>(view: &R, auth_path: &str) -> Result<Option<Account>, AppError> {
    let owner_path = auth_path.strip_suffix("/auth").ok_or_else(|| {
        AppError::Unexpected(format!(
            "{} is flagged as an auth path but does not end in /auth",
            auth_path
        ))
    })?;
    let (mut account, _) = Account::match_from_path(owner_path).ok_or_else(|| {
        AppError::Unexpected(format!(
            "{} is flagged as an auth path but its account kind cannot be resolved",
            auth_path
        ))
    })?;
    match get_value(view, auth_path)? {
        None => Ok(None),
        Some(existing) => {
            let record = existing.as_map().ok_or_else(|| {
                AppError::Unexpected(format!(
                    "unexpected account record value at {}",
                    auth_path
                ))
            })?;
            account
                .decode_record(record, auth_path, false)
                .map_err(|err| AppError::Unexpected(err.to_string()))?;
            Ok(Some(account))
        }
    }
}

fn resolve_entry_path<R: TxnRead>(txn: &R, path: &str) -> Result<String, AppError> {
    match resolve_symlink(txn, path) {
        Ok(Some(resolved)) => Ok(resolved),
        Ok(None) => Err(AppError::NotFound(format!(
            "{} does not resolve to a path",
            path
        ))),
        Err(err) => Err(AppError::NotFound(err.to_string())),
    }
}

fn require_signature(tx: &Transaction) -> Result<PublicKeyBytes, AppError> {
    tx.pub_key.ok_or_else(|| {
        AppError::TxBadSign("transactions require a valid signature to be present".to_owned())
    })
}

fn parse_entries(body: &[u8]) -> Result<Vec<(String, Option<TypedValue>)>, AppError> {
    let json: Value =
        serde_json::from_slice(body).map_err(|err| AppError::BadFormat(err.to_string()))?;
    match json {
        Value::Object(map) => map
            .into_iter()
            .map(|(path, value)| Ok((path, json_to_typed(&value)?)))
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => match &pair[0] {
                    Value::String(path) => Ok((path.clone(), json_to_typed(&pair[1])?)),
                    _ => Err(bad_body_shape()),
                },
                _ => Err(bad_body_shape()),
            })
            .collect(),
        _ => Err(bad_body_shape()),
    }
}

fn bad_body_shape() -> AppError {
    AppError::BadFormat(
        "transactions must be a JSON object or an array of [path, value] pairs".to_owned(),
    )
}

/// Translate a JSON value into its typed-value form. A top-level `null` is the delete
/// tombstone; `null` anywhere deeper has no stored representation and is rejected.
pub fn json_to_typed(value: &Value) -> Result<Option<TypedValue>, AppError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(TypedValue::Bool(*b))),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Some(TypedValue::Int(v)))
            } else if let Some(v) = n.as_u64() {
                Ok(Some(TypedValue::uint(v)))
            } else {
                Ok(Some(TypedValue::Float(n.as_f64().unwrap())))
            }
        }
        Value::String(s) => Ok(Some(TypedValue::String(s.clone()))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_typed(item)?.ok_or_else(nested_null)?);
            }
            Ok(Some(TypedValue::Array(out)))
        }
        Value::Object(map) => {
            let mut out = std::collections::HashMap::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), json_to_typed(value)?.ok_or_else(nested_null)?);
            }
            Ok(Some(TypedValue::Map(out)))
        }
    }
}

fn nested_null() -> AppError {
    AppError::BadFormat("null may only appear as a whole value, to delete a key".to_owned())
}

/// Render a typed value as JSON. Byte strings become base64url; a non-finite float has no JSON
/// number form and becomes `null`.
pub fn typed_to_json(value: &TypedValue) -> Value {
    match value {
        TypedValue::Bool(b) => Value::Bool(*b),
        TypedValue::Int(v) => Value::from(*v),
        TypedValue::Uint(v) => Value::from(*v),
        TypedValue::Float32(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TypedValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TypedValue::String(s) => Value::String(s.clone()),
        TypedValue::Bytes(b) => Value::String(Base64URL::encode(b).to_string()),
        TypedValue::Array(items) => Value::Array(items.iter().map(typed_to_json).collect()),
        TypedValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), typed_to_json(value)))
                .collect(),
        ),
    }
}

fn typed_map_to_json(map: std::collections::HashMap<String, TypedValue>) -> Value {
    typed_to_json(&TypedValue::Map(map))
}
