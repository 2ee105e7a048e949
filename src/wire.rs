//! Shared binary codec configuration.
//!
//! All fixed-width on-disk structures (slice headers, catalogue entry
//! scalar fields, dar_manager records, messaging frames) go through this
//! one `bincode` configuration so producers and consumers never drift.
//! Mirrors `fsfill::filesys::e2fs`'s own
//! `DefaultOptions::new().with_fixint_encoding().allow_trailing_bytes()`
//! call, repeated at every deserialize site in the teacher; centralized
//! here instead since this crate has many more call sites.

use bincode::{DefaultOptions, Options};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;

fn opts() -> impl Options
{
    DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError>
{
    opts()
        .serialize(value)
        .map_err(|e| CoreError::data(format!("wire serialize: {e}")))
}

pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError>
{
    opts()
        .deserialize(bytes)
        .map_err(|e| CoreError::data(format!("wire deserialize: {e}")))
}

pub fn serialized_size<T: Serialize>(value: &T) -> Result<u64, CoreError>
{
    opts()
        .serialized_size(value)
        .map_err(|e| CoreError::data(format!("wire size: {e}")))
}
