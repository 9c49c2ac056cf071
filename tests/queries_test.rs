//! The query path: projections of auth records, symlink-indexed lookups, and the anonymous
//! read policy.

mod common;

use athena_store::account::email_hash;
use athena_store::driver::{Application, QueryRequest};
use athena_store::types::Base64URL;
use ed25519_dalek::SigningKey;
use serde_json::Value;

use common::keys::{pub_key_b64, query_sig, signed_tx, signing_key};
use common::mem_db::MemDB;
use common::{initialized_store, run_block};

fn register(app: &mut athena_store::app::AthenaStore<MemDB>, height: i64, name: &str, key: &SigningKey) {
    let body = format!(
        r#"{{"user/{}/auth": {{"pubKey": "{}"}}}}"#,
        name,
        pub_key_b64(key)
    );
    let responses = run_block(app, height, &[signed_tx(key, &body)]);
    assert_eq!(responses[0].code, 0, "{}", responses[0].info);
}

fn anonymous_query(app: &athena_store::app::AthenaStore<MemDB>, path: &str) -> (u32, Value) {
    let response = app.query(QueryRequest {
        path: path.to_owned(),
        data: Vec::new(),
    });
    let value = if response.value.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&response.value).unwrap()
    };
    (response.code, value)
}

fn signed_query(
    app: &athena_store::app::AthenaStore<MemDB>,
    key: &SigningKey,
    path: &str,
) -> (u32, Value) {
    let response = app.query(QueryRequest {
        path: path.to_owned(),
        data: query_sig(key, path),
    });
    let value = if response.value.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&response.value).unwrap()
    };
    (response.code, value)
}

#[test]
fn owners_see_the_full_projection_of_their_record() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    register(&mut app, 1, "alice", &alice);

    let (code, value) = signed_query(&app, &alice, "user/alice/auth");
    assert_eq!(code, 0);
    let record = value.as_object().unwrap();
    assert_eq!(
        record.get("pubKey").and_then(Value::as_str),
        Some(pub_key_b64(&alice).as_str())
    );
    assert_eq!(record.get("created").and_then(Value::as_i64), Some(1));
    // a user record has no parent signature to show
    assert!(!record.contains_key("sign"));
}

#[test]
fn email_symlink_resolves_to_the_anonymous_projection() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    register(&mut app, 1, "alice", &alice);

    let hash = email_hash("alice@example.com");
    let body = format!(
        r#"{{"user/alice/email": {{"hash": "{}"}}, "user/alice/auth": {{"pubKey": "{}", "salt": "c2FsdA"}}}}"#,
        hash,
        pub_key_b64(&alice)
    );
    let responses = run_block(&mut app, 2, &[signed_tx(&alice, &body)]);
    assert_eq!(responses[0].code, 0, "{}", responses[0].info);

    // this is the login flow: no credentials yet, find the account by email hash
    let (code, value) = anonymous_query(&app, &format!("users/email/{}:auth", hash));
    assert_eq!(code, 0);
    let record = value.as_object().unwrap();
    assert_eq!(
        record.get("pubKey").and_then(Value::as_str),
        Some(pub_key_b64(&alice).as_str())
    );
    assert_eq!(record.get("type").and_then(Value::as_str), Some("user"));
    assert_eq!(record.get("salt").and_then(Value::as_str), Some("c2FsdA"));
    assert!(!record.contains_key("sign"));
    assert!(!record.contains_key("created"));
}

#[test]
fn anonymous_queries_follow_the_acl() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    register(&mut app, 1, "alice", &alice);
    run_block(
        &mut app,
        2,
        &[signed_tx(
            &alice,
            r#"{"user/alice/store/x": 5, "user/alice/privStore/secret": 6}"#,
        )],
    );

    // the public store is world-readable
    let (code, value) = anonymous_query(&app, "user/alice/store/x");
    assert_eq!(code, 0);
    assert_eq!(value, Value::from(5));

    // the private store is not
    let (code, _) = anonymous_query(&app, "user/alice/privStore/secret");
    assert_eq!(code, 5);

    // nor is anything outside the granted patterns
    let (code, _) = anonymous_query(&app, "mesh/blockState");
    assert_eq!(code, 5);

    // auth-pattern paths answer with a projection even for absent records
    let (code, value) = anonymous_query(&app, "user/ghost/auth");
    assert_eq!(code, 0);
    assert_eq!(value, Value::Null);
}

#[test]
fn queries_of_other_accounts_private_data_are_denied() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    let bob = signing_key(3);
    register(&mut app, 1, "alice", &alice);
    register(&mut app, 2, "bob", &bob);
    run_block(&mut app, 3, &[signed_tx(&alice, r#"{"user/alice/store/x": 5}"#)]);

    let (code, _) = signed_query(&app, &bob, "user/alice/store/x");
    assert_eq!(code, 5);
    let (code, _) = signed_query(&app, &bob, "user/alice/privStore/secret");
    assert_eq!(code, 5);
}

#[test]
fn unresolvable_symlinks_are_not_found() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    register(&mut app, 1, "alice", &alice);

    let missing = Base64URL::encode([9u8; 32]);
    let (code, _) = signed_query(&app, &alice, &format!("keyMap/{}:auth", missing));
    assert_eq!(code, 7);

    // a colon segment outside every registered index is also a resolution failure
    let (code, _) = signed_query(&app, &alice, "user/alice/store:x");
    assert_eq!(code, 7);
}

#[test]
fn tampered_query_signatures_are_rejected() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    register(&mut app, 1, "alice", &alice);

    // signature taken over a different path
    let response = app.query(QueryRequest {
        path: "user/alice/auth".to_owned(),
        data: query_sig(&alice, "user/alice/store/x"),
    });
    assert_eq!(response.code, 2);

    // short data is rejected outright
    let response = app.query(QueryRequest {
        path: "user/alice/auth".to_owned(),
        data: vec![1, 2, 3],
    });
    assert_eq!(response.code, 1);
}

#[test]
fn unknown_query_keys_fall_back_to_anonymous() {
    let (mut app, _kv) = initialized_store();
    let alice = signing_key(1);
    let stranger = signing_key(9);
    register(&mut app, 1, "alice", &alice);
    run_block(&mut app, 2, &[signed_tx(&alice, r#"{"user/alice/store/x": 5}"#)]);

    // a valid signature from an unindexed key authenticates nothing, but anonymous grants
    // still apply
    let (code, value) = signed_query(&app, &stranger, "user/alice/store/x");
    assert_eq!(code, 0);
    assert_eq!(value, Value::from(5));
    let (code, _) = signed_query(&app, &stranger, "user/alice/privStore/secret");
    assert_eq!(code, 5);
}
