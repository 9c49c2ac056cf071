/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The account model: the kinds of accounts the store recognizes, where their records live in
//! the namespace, and the encodings used to exchange those records with the store and with
//! clients.
//!
//! An account's record is persisted at `<account-path>/auth` as a typed-value map. The engine
//! trusts only the fields it reassembles itself: `pubKey`, `sign`, `created`, `expires`, and a
//! bag of extra attributes. `created` is engine-owned (the block height of the record's first
//! write) and is never accepted from clients.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::codec::TypedValue;
use crate::types::Base64URL;

/// The four kinds of account, in path-matching declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountKind {
    /// The hardcoded chain administrator at `config/rootUser`. No parent, no passphrase.
    Root,
    /// A person, at `user/<name>`. Key derived from a passphrase by the edge facade. No parent.
    User,
    /// A device or session key of a user, at `user/<owner>/login/<name>`. Parent-signed.
    Login,
    /// A service domain of a user, at `user/<owner>/domain/<name>`. Parent-signed.
    Domain,
}

impl AccountKind {
    /// The registered text name of this kind. Used as the left operand of the parent-signature
    /// message.
    pub fn type_name(&self) -> &'static str {
        match self {
            AccountKind::Root => "root",
            AccountKind::User => "user",
            AccountKind::Login => "login",
            AccountKind::Domain => "domain",
        }
    }

    /// Whether accounts of this kind identify themselves with a passphrase-derived key.
    pub fn uses_passphrase(&self) -> bool {
        matches!(self, AccountKind::User)
    }
}

struct KindConfig {
    kind: AccountKind,
    /// Identifies an account of this kind from its path. The `parent` capture is the path of
    /// the parent account; the `name` capture is the account's name.
    pattern: Regex,
}

static ACCOUNT_KINDS: Lazy<Vec<KindConfig>> = Lazy::new(|| {
    vec![
        KindConfig {
            kind: AccountKind::Root,
            pattern: Regex::new("^config/rootUser$").unwrap(),
        },
        KindConfig {
            kind: AccountKind::User,
            pattern: Regex::new("^user/(?P<name>[^/]+)$").unwrap(),
        },
        KindConfig {
            kind: AccountKind::Login,
            pattern: Regex::new("^(?P<parent>user/[^/]+)/login/(?P<name>[^/]+)$").unwrap(),
        },
        KindConfig {
            kind: AccountKind::Domain,
            pattern: Regex::new("^(?P<parent>user/[^/]+)/domain/(?P<name>[^/]+)$").unwrap(),
        },
    ]
});

/// An account hydrated from its path and its auth record.
#[derive(Clone, Debug)]
pub struct Account {
    /// From the path: the kind of this account.
    pub kind: AccountKind,
    /// From the path: the name of this account. Empty for root.
    pub name: String,
    /// The parent account, hydrated on demand during authentication.
    pub parent: Option<Box<Account>>,
    /// From the auth record: this account's Ed25519 public key.
    pub pub_key: Vec<u8>,
    /// From the auth record: the parent's signature anchoring this account's key.
    pub parent_sign: Vec<u8>,
    /// Block height at which the record was first persisted. Engine-owned.
    pub created: i64,
    /// Owner-mutable expiry height. Persisted but not enforced.
    pub expires: i64,
    /// Any other auth-record fields, passed through untouched.
    pub attrs: HashMap<String, TypedValue>,
}

impl Account {
    pub fn new(kind: AccountKind) -> Account {
        Account {
            kind,
            name: String::new(),
            parent: None,
            pub_key: Vec::new(),
            parent_sign: Vec::new(),
            created: 0,
            expires: 0,
            attrs: HashMap::new(),
        }
    }

    /// Try each registered kind's pattern in declaration order. The first match yields the
    /// account (name populated from the path) and the path of its parent, which is empty for
    /// root and user accounts.
    pub fn match_from_path(path: &str) -> Option<(Account, String)> {
        for config in ACCOUNT_KINDS.iter() {
            if let Some(caps) = config.pattern.captures(path) {
                let mut account = Account::new(config.kind);
                if let Some(name) = caps.name("name") {
                    account.name = name.as_str().to_owned();
                }
                let parent_path = caps
                    .name("parent")
                    .map(|m| m.as_str().to_owned())
                    .unwrap_or_default();
                return Some((account, parent_path));
            }
        }
        None
    }

    /// Reconstruct the account's home path. `None` when the account's shape is invalid: a user
    /// name containing `/`, or a login/domain without a user parent.
    pub fn path(&self) -> Option<String> {
        match self.kind {
            AccountKind::Root => Some("config/rootUser".to_owned()),
            AccountKind::User => {
                if self.name.contains('/') {
                    return None;
                }
                Some(format!("user/{}", self.name))
            }
            AccountKind::Login | AccountKind::Domain => {
                let parent = self.parent.as_ref()?;
                if parent.kind != AccountKind::User {
                    return None;
                }
                let segment = match self.kind {
                    AccountKind::Login => "login",
                    _ => "domain",
                };
                Some(format!("{}/{}/{}", parent.path()?, segment, self.name))
            }
        }
    }

    /// The message a parent signs to anchor a child account's key:
    /// `type_name || ":" || child.pubKey`.
    pub fn parent_sign_message(kind: AccountKind, child_pub_key: &[u8]) -> Vec<u8> {
        let mut message = kind.type_name().as_bytes().to_vec();
        message.push(b':');
        message.extend_from_slice(child_pub_key);
        message
    }

    /// Populate the auth-record fields from a decoded map. Binary fields accept raw bytes or
    /// base64url strings. When `from_user` is set, any `created` in the input is ignored: that
    /// field is engine-owned.
    ///
    /// `pub_key`, `parent_sign`, and `attrs` are reset first; `created` and `expires` keep
    /// their current values unless the map carries replacements.
    pub fn decode_record(
        &mut self,
        record: &HashMap<String, TypedValue>,
        path: &str,
        from_user: bool,
    ) -> Result<(), AccountError> {
        self.pub_key = Vec::new();
        self.parent_sign = Vec::new();
        self.attrs = HashMap::new();
        for (key, value) in record {
            match key.as_str() {
                "pubKey" => self.pub_key = decode_binary(value, path, "pubKey")?,
                "sign" => self.parent_sign = decode_binary(value, path, "sign")?,
                "created" => {
                    if !from_user {
                        self.created = value.as_int().ok_or_else(|| AccountError::BadAttr {
                            path: path.to_owned(),
                            attr: "created",
                        })?;
                    }
                }
                "expires" => {
                    self.expires = value.as_int().ok_or_else(|| AccountError::BadAttr {
                        path: path.to_owned(),
                        attr: "expires",
                    })?;
                }
                _ => {
                    self.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// The canonical map persisted at the auth path. Binary fields as bytes; empty and zero
    /// fields are omitted.
    pub fn assemble_for_storage(&self) -> HashMap<String, TypedValue> {
        let mut record = HashMap::new();
        if !self.pub_key.is_empty() {
            record.insert("pubKey".to_owned(), TypedValue::Bytes(self.pub_key.clone()));
        }
        if !self.parent_sign.is_empty() {
            record.insert("sign".to_owned(), TypedValue::Bytes(self.parent_sign.clone()));
        }
        if self.created > 0 {
            record.insert("created".to_owned(), TypedValue::Int(self.created));
        }
        if self.expires > 0 {
            record.insert("expires".to_owned(), TypedValue::Int(self.expires));
        }
        for (key, value) in &self.attrs {
            record.insert(key.clone(), value.clone());
        }
        record
    }

    /// The public projection returned to authenticated queries: JSON-safe, with binary fields
    /// as base64url strings.
    pub fn assemble_for_query(&self) -> HashMap<String, TypedValue> {
        let mut record = HashMap::new();
        if !self.pub_key.is_empty() {
            record.insert(
                "pubKey".to_owned(),
                TypedValue::String(Base64URL::encode(&self.pub_key).to_string()),
            );
        }
        if !self.parent_sign.is_empty() {
            record.insert(
                "sign".to_owned(),
                TypedValue::String(Base64URL::encode(&self.parent_sign).to_string()),
            );
        }
        if self.created > 0 {
            record.insert("created".to_owned(), TypedValue::Int(self.created));
        }
        if self.expires > 0 {
            record.insert("expires".to_owned(), TypedValue::Int(self.expires));
        }
        for (key, value) in &self.attrs {
            record.insert(key.clone(), value.clone());
        }
        record
    }

    /// The unauthenticated projection: the public key, the kind's type name, and the extra
    /// attributes. No signature, no lifecycle fields.
    pub fn anonymous_projection(&self) -> HashMap<String, TypedValue> {
        let mut record = HashMap::new();
        if !self.pub_key.is_empty() {
            record.insert(
                "pubKey".to_owned(),
                TypedValue::String(Base64URL::encode(&self.pub_key).to_string()),
            );
        }
        record.insert(
            "type".to_owned(),
            TypedValue::String(self.kind.type_name().to_owned()),
        );
        for (key, value) in &self.attrs {
            record.insert(key.clone(), value.clone());
        }
        record
    }
}

/// Base64url hash of an email address, as stored in the `hash` attribute of
/// `user/<name>/email` and mirrored into the `users/email/` index.
pub fn email_hash(email: &str) -> Base64URL {
    Base64URL::encode(Sha256::digest(email.as_bytes()))
}

fn decode_binary(
    value: &TypedValue,
    path: &str,
    attr: &'static str,
) -> Result<Vec<u8>, AccountError> {
    match value {
        TypedValue::Bytes(bytes) => Ok(bytes.clone()),
        TypedValue::String(s) => Base64URL::decode(s).map_err(|_| AccountError::BadAttr {
            path: path.to_owned(),
            attr,
        }),
        _ => Err(AccountError::BadAttr {
            path: path.to_owned(),
            attr,
        }),
    }
}

/// A malformed auth record.
#[derive(Debug, PartialEq, Eq)]
pub enum AccountError {
    BadAttr { path: String, attr: &'static str },
}

impl std::fmt::Display for AccountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountError::BadAttr { path, attr } => {
                write!(f, "found unexpected value reading {} attribute {}", path, attr)
            }
        }
    }
}
