/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The error taxonomy surfaced to the consensus driver.
//!
//! Every non-ok response carries one of these variants; [AppError::code] yields the stable
//! numeric code reported in the response, and the [Display] form is the user-visible info
//! string. The numeric ordering is a compatibility surface and must not change.

use std::fmt::{self, Display, Formatter};

use crate::codec::CodecError;
use crate::store::StoreError;

/// Code of a successful response.
pub const CODE_OK: u32 = 0;

/// Codespace reported with every response.
pub const CODESPACE: &str = "athena";

/// A failed transaction, check, or query.
#[derive(Debug, PartialEq, Eq)]
pub enum AppError {
    /// The transaction does not include the minimum public key + signature prefix.
    TxTooShort,
    /// The signature of this transaction does not match its public key, or a signature is
    /// required but missing.
    TxBadSign(String),
    /// An unexpected condition: backend failures, codec failures, broken invariants.
    Unexpected(String),
    /// The submitting public key is not recognized and the request is not covered by an
    /// anonymous exemption.
    UnknownUser(String),
    /// The authenticated account does not have permission for the requested action.
    Unauthorized(String),
    /// The request is not readable: bad JSON, an unrecognized body shape, or a malformed
    /// auth-record value.
    BadFormat(String),
    /// Symlink resolution produced no destination.
    NotFound(String),
}

impl AppError {
    /// The stable numeric code reported on the consensus-driver surface.
    pub fn code(&self) -> u32 {
        match self {
            AppError::TxTooShort => 1,
            AppError::TxBadSign(_) => 2,
            AppError::Unexpected(_) => 3,
            AppError::UnknownUser(_) => 4,
            AppError::Unauthorized(_) => 5,
            AppError::BadFormat(_) => 6,
            AppError::NotFound(_) => 7,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TxTooShort => write!(f, "tx too short"),
            AppError::TxBadSign(info) => write!(f, "{}", info),
            AppError::Unexpected(info) => write!(f, "{}", info),
            AppError::UnknownUser(info) => write!(f, "{}", info),
            AppError::Unauthorized(info) => write!(f, "{}", info),
            AppError::BadFormat(info) => write!(f, "{}", info),
            AppError::NotFound(info) => write!(f, "{}", info),
        }
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::Unexpected(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Unexpected(err.to_string())
    }
}
