//! Deterministic keypairs and wire-form builders shared by the integration tests.

use athena_store::account::{Account, AccountKind};
use athena_store::types::Base64URL;
use ed25519_dalek::{Signer, SigningKey};

/// A keypair derived from a fixed seed, so test runs are reproducible.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// The base64url rendering of a key's public half, as it appears in transaction bodies.
pub fn pub_key_b64(key: &SigningKey) -> String {
    Base64URL::encode(key.verifying_key().to_bytes()).to_string()
}

/// `pubkey(32) || signature(64) || body`, the signature taken over the body bytes.
pub fn signed_tx(key: &SigningKey, body: &str) -> Vec<u8> {
    let mut bytes = key.verifying_key().to_bytes().to_vec();
    bytes.extend_from_slice(&key.sign(body.as_bytes()).to_bytes());
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// The unsigned wire form: an all-zero prefix followed by the body.
pub fn unsigned_tx(body: &str) -> Vec<u8> {
    let mut bytes = vec![0u8; 96];
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// The `data` field of a signed query: `pubkey(32) || signature(64)` over the path string.
pub fn query_sig(key: &SigningKey, path: &str) -> Vec<u8> {
    let mut bytes = key.verifying_key().to_bytes().to_vec();
    bytes.extend_from_slice(&key.sign(path.as_bytes()).to_bytes());
    bytes
}

/// A parent's signature anchoring a child account's key, in base64url.
pub fn parent_sign_b64(parent: &SigningKey, kind: AccountKind, child: &SigningKey) -> String {
    let message = Account::parent_sign_message(kind, &child.verifying_key().to_bytes());
    Base64URL::encode(parent.sign(&message).to_bytes()).to_string()
}
