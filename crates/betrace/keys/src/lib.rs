//! BeTrace Keys - per-tenant cryptographic key material.
//!
//! A narrow provider contract fronts the external key-management service;
//! the [`KeyCache`] keeps decrypted signing keys in memory for a short TTL
//! with at-most-one concurrent provider call per tenant. Plaintext private
//! material never leaves this crate: the ledger and stores only ever see
//! ciphertext and public metadata.

#![deny(unsafe_code)]

mod cache;
mod error;
mod provider;

pub use cache::{
    KeyCache, KeyHandle, KeyRecord, KeyState, DEFAULT_PRIVATE_TTL_SECS, DEFAULT_PUBLIC_TTL_SECS,
};
pub use error::KeyError;
pub use provider::{DataKey, KeyProvider, LocalKeyProvider};
