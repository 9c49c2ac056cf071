/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The symlink index registries and their maintainers.
//!
//! Every write to the store passes through [maintain] before the primary key is mutated, so the
//! indexes stay consistent with the records they mirror: for each auth record carrying a public
//! key there is exactly one `keyMap/<base64url-pubkey>` entry naming the owning account path,
//! and likewise for attribute indexes such as the email-hash index. New index families are added
//! by appending to the tables below at compile time.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::codec::TypedValue;
use crate::types::Base64URL;

use super::block_txn::TxnWrite;
use super::paths::get_value;
use super::StoreError;

/// Destination prefix of the reverse public-key index.
pub const KEY_MAP_PREFIX: &str = "keyMap/";

/// Destination prefix of the email-hash index.
pub const EMAIL_INDEX_PREFIX: &str = "users/email/";

/// A source pattern whose `pubKey` attribute is mirrored into a reverse index. The `owner`
/// capture is the account path recorded at the destination.
struct PubkeySymlinkEntry {
    pattern: Regex,
    dest_prefix: &'static str,
}

/// A source pattern with an arbitrary named string attribute mirrored into a reverse index.
struct AttrSymlinkEntry {
    pattern: Regex,
    source_attr: &'static str,
    dest_prefix: &'static str,
}

static PUBKEY_SYMLINKS: Lazy<Vec<PubkeySymlinkEntry>> = Lazy::new(|| {
    vec![
        PubkeySymlinkEntry {
            pattern: Regex::new("^(?P<owner>config/rootUser)/auth$").unwrap(),
            dest_prefix: KEY_MAP_PREFIX,
        },
        PubkeySymlinkEntry {
            pattern: Regex::new("^(?P<owner>user/[^/]+)/auth$").unwrap(),
            dest_prefix: KEY_MAP_PREFIX,
        },
        PubkeySymlinkEntry {
            pattern: Regex::new("^(?P<owner>user/[^/]+/login/[^/]+)/auth$").unwrap(),
            dest_prefix: KEY_MAP_PREFIX,
        },
        PubkeySymlinkEntry {
            pattern: Regex::new("^(?P<owner>user/[^/]+/domain/[^/]+)/auth$").unwrap(),
            dest_prefix: KEY_MAP_PREFIX,
        },
    ]
});

static ATTR_SYMLINKS: Lazy<Vec<AttrSymlinkEntry>> = Lazy::new(|| {
    vec![AttrSymlinkEntry {
        pattern: Regex::new("^(?P<owner>user/[^/]+)/email$").unwrap(),
        source_attr: "hash",
        dest_prefix: EMAIL_INDEX_PREFIX,
    }]
});

/// The key of the reverse-index entry for a public key.
pub fn key_map_path(pub_key: &[u8]) -> String {
    format!("{}{}", KEY_MAP_PREFIX, Base64URL::encode(pub_key))
}

/// Whether `segment` may appear to the left of a `:` in a path: it must reach into one of the
/// registered index destinations.
pub(crate) fn is_indirect_prefix(segment: &str) -> bool {
    PUBKEY_SYMLINKS
        .iter()
        .map(|entry| entry.dest_prefix)
        .chain(ATTR_SYMLINKS.iter().map(|entry| entry.dest_prefix))
        .any(|prefix| segment.len() > prefix.len() && segment.starts_with(prefix))
}

/// Adjust any indexes registered for `path` before `value` replaces the stored value there.
/// `None` means the key is about to be deleted.
pub(crate) fn maintain<W: TxnWrite>(
    txn: &mut W,
    path: &str,
    value: Option<&TypedValue>,
) -> Result<(), StoreError> {
    for entry in PUBKEY_SYMLINKS.iter() {
        if let Some(caps) = entry.pattern.captures(path) {
            let owner = caps.name("owner").unwrap().as_str().to_owned();
            let old = bytes_attr(get_value(txn, path)?.as_ref(), "pubKey");
            let new = bytes_attr(value, "pubKey");
            relink(txn, &owner, entry.dest_prefix, old, new)?;
        }
    }
    for entry in ATTR_SYMLINKS.iter() {
        if let Some(caps) = entry.pattern.captures(path) {
            let owner = caps.name("owner").unwrap().as_str().to_owned();
            let old = string_attr(get_value(txn, path)?.as_ref(), entry.source_attr);
            let new = string_attr(value, entry.source_attr);
            relink(txn, &owner, entry.dest_prefix, old, new)?;
        }
    }
    Ok(())
}

/// Move an index entry from `old` to `new` under `dest_prefix`. The old entry is removed only if
/// it still points at `owner`; an existing entry at the new destination is a conflict (I1: no
/// two accounts may share an indexed value).
fn relink<W: TxnWrite>(
    txn: &mut W,
    owner: &str,
    dest_prefix: &str,
    old: Option<String>,
    new: Option<String>,
) -> Result<(), StoreError> {
    if old == new {
        return Ok(());
    }
    if let Some(old) = old {
        let dest = format!("{}{}", dest_prefix, old);
        if let Some(TypedValue::String(linked)) = get_value(txn, &dest)? {
            if linked == owner {
                txn.delete_raw(&dest);
            }
        }
    }
    if let Some(new) = new {
        let dest = format!("{}{}", dest_prefix, new);
        if txn.get_raw(&dest).is_some() {
            return Err(StoreError::SymlinkConflict { dest });
        }
        txn.set_raw(&dest, TypedValue::String(owner.to_owned()).encode());
    }
    Ok(())
}

/// The `attr` byte-string field of a map value, rendered in the index's key form. Absent, empty,
/// or non-byte values index nothing.
fn bytes_attr(value: Option<&TypedValue>, attr: &str) -> Option<String> {
    let bytes = value?.as_map()?.get(attr)?.as_bytes()?;
    if bytes.is_empty() {
        return None;
    }
    Some(Base64URL::encode(bytes).to_string())
}

/// The `attr` string field of a map value. Absent, empty, or non-string values index nothing.
fn string_attr(value: Option<&TypedValue>, attr: &str) -> Option<String> {
    let s = value?.as_map()?.get(attr)?.as_str()?;
    if s.is_empty() {
        return None;
    }
    Some(s.to_owned())
}
