/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The access-control engine: a fixed table of named path patterns and an ordered rule list
//! binding (pattern, account kind or anonymous, read/write).
//!
//! "Self" in a rule is the apex account of the authenticated login: the parent user for logins
//! and domains, the account itself otherwise. A rule with an anonymous subject permits
//! unauthenticated reads of the paths its pattern covers. Both tables are process-wide
//! immutable configuration; nothing mutates them at runtime.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::account::{Account, AccountKind};

struct PermissionPath {
    name: &'static str,
    pattern: Regex,
    /// Whether paths matching this pattern are auth records, which the transaction engine
    /// rewrites into canonical form on every write.
    is_auth: bool,
}

static PERM_PATHS: Lazy<Vec<PermissionPath>> = Lazy::new(|| {
    vec![
        PermissionPath {
            name: "all",
            pattern: Regex::new(".*").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "userPrefix",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "userAuth",
            pattern: Regex::new("^(?P<owner>user/(?P<name>[^/]+))/auth$").unwrap(),
            is_auth: true,
        },
        PermissionPath {
            name: "userPrivStore",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/privStore").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "userStore",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/store").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "loginAuth",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/login/[^/]+/auth$").unwrap(),
            is_auth: true,
        },
        PermissionPath {
            name: "domainAuth",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/domain/[^/]+/auth$").unwrap(),
            is_auth: true,
        },
        PermissionPath {
            name: "domainPrivStore",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/domain/[^/]+/privStore").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "domainStore",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/domain/[^/]+/store").unwrap(),
            is_auth: false,
        },
        PermissionPath {
            name: "domainLoc",
            pattern: Regex::new("^(?P<owner>user/[^/]+)/domain/[^/]+/loc").unwrap(),
            is_auth: false,
        },
    ]
});

struct PermissionRule {
    path: &'static str,
    /// `None` is the anonymous subject.
    kind: Option<AccountKind>,
    can_write: bool,
}

/// Evaluated in order; every matching rule contributes to the grant.
const PERMISSIONS: [PermissionRule; 18] = [
    PermissionRule { path: "all", kind: Some(AccountKind::Root), can_write: true },
    PermissionRule { path: "userPrefix", kind: Some(AccountKind::User), can_write: false },
    PermissionRule { path: "userAuth", kind: Some(AccountKind::User), can_write: true },
    PermissionRule { path: "userPrivStore", kind: Some(AccountKind::User), can_write: true },
    PermissionRule { path: "userPrivStore", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "userStore", kind: None, can_write: false },
    PermissionRule { path: "userStore", kind: Some(AccountKind::User), can_write: true },
    PermissionRule { path: "userStore", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "loginAuth", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "domainAuth", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "domainPrivStore", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "domainPrivStore", kind: Some(AccountKind::Domain), can_write: true },
    PermissionRule { path: "domainStore", kind: None, can_write: false },
    PermissionRule { path: "domainStore", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "domainStore", kind: Some(AccountKind::Domain), can_write: true },
    PermissionRule { path: "domainLoc", kind: None, can_write: false },
    PermissionRule { path: "domainLoc", kind: Some(AccountKind::Login), can_write: true },
    PermissionRule { path: "domainLoc", kind: Some(AccountKind::Domain), can_write: true },
];

/// Decide whether `login` (or the anonymous subject) may read or write `path`.
///
/// Returns `(granted, is_auth_path)`: `is_auth_path` is set when the grant came through one of
/// the auth-record patterns, which tells the transaction engine to canonicalize the value.
pub fn can_access(login: Option<&Account>, for_write: bool, path: &str) -> (bool, bool) {
    let subject_kind = login.map(|account| account.kind);
    let apex_path: Option<String> = login.map(apex).and_then(Account::path);

    let mut granted = false;
    let mut is_auth_path = false;
    for rule in PERMISSIONS.iter() {
        if rule.kind != subject_kind || (for_write && !rule.can_write) {
            continue;
        }
        let perm_path = PERM_PATHS
            .iter()
            .find(|p| p.name == rule.path)
            .expect("every rule names a registered permission path");
        let caps = match perm_path.pattern.captures(path) {
            Some(caps) => caps,
            None => continue,
        };
        let matched = match caps.name("owner") {
            // the pattern matches with no qualifier: accept outright
            None => true,
            // the pattern asks for a matching owner: compare against our apex, if we have one
            Some(owner) => match (&apex_path, subject_kind) {
                (Some(apex), _) => owner.as_str() == apex,
                (None, None) => true,
                _ => false,
            },
        };
        if matched {
            granted = true;
            if perm_path.is_auth {
                is_auth_path = true;
            }
        }
    }
    (granted, is_auth_path)
}

/// Whether `path` matches any of the auth-record patterns, independent of any grant.
pub fn is_auth_pattern(path: &str) -> bool {
    PERM_PATHS
        .iter()
        .filter(|p| p.is_auth)
        .any(|p| p.pattern.is_match(path))
}

/// Match `path` against the `userAuth` pattern, yielding the user's home path and name. Used by
/// the self-registration exemption.
pub fn user_auth_match(path: &str) -> Option<(String, String)> {
    let perm_path = PERM_PATHS.iter().find(|p| p.name == "userAuth").unwrap();
    let caps = perm_path.pattern.captures(path)?;
    Some((caps["owner"].to_owned(), caps["name"].to_owned()))
}

fn apex(login: &Account) -> &Account {
    match &login.parent {
        Some(parent) => parent,
        None => login,
    }
}
