// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistent tag store
//!
//! The store maps an address to one datapoint row (tag, description, data type, value
//! and last update). Both the Modbus handler and the HTTP API read and write through
//! the [`TagStore`] trait so that the digital bit-packing semantics are identical on
//! both surfaces.
//!
//! ## Components
//!
//! - [`TagStore`]: the contract consumed by the register engine and the API
//! - [`sqlite::SqliteTagStore`]: the SQLite implementation used by the daemon

pub mod sqlite;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TagConfig;
use crate::registers::{ParseTagError, TagType};

pub use sqlite::SqliteTagStore;

/// Errors returned by tag store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No datapoint found for {0}")]
    NotFound(String),

    /// The row exists but has never received a value
    #[error("Datapoint {0} has no value")]
    NoValue(String),

    /// NaN and infinities cannot be stored, SQLite would turn them into NULL
    #[error("Refusing non-finite value for {0}")]
    NonFinite(String),

    #[error(transparent)]
    Parse(#[from] ParseTagError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Tag store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// One row of the datapoint table as exposed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub tag: String,
    pub description: String,
    pub address: String,
    pub datatype: String,
    pub value: f64,
    pub last_update: String,
}

/// Contract between the register engine, the HTTP API and the persistence layer
///
/// All calls are synchronous; the caller blocks until the store answers.
#[cfg_attr(test, mockall::automock)]
pub trait TagStore: Send + Sync {
    /// Create or refresh the configured tags, including generic rows for sub-bit tags
    fn upsert_tags(&self, tags: &[TagConfig]) -> Result<(), StoreError>;

    /// Data type of the row stored at `address`
    fn data_type_of(&self, address: &str) -> Result<TagType, StoreError>;

    /// Row stored at `address`; digital sub-bit rows are read through the bit overlay
    fn get_by_address(&self, address: &str) -> Result<DataPoint, StoreError>;

    /// Write `value` at `address`, updating the generic register for digital sub-bits
    fn set_value(&self, address: &str, value: f64) -> Result<(), StoreError>;

    fn get_by_tag(&self, tag: &str) -> Result<DataPoint, StoreError>;

    /// Write by tag name through the same path as [`TagStore::set_value`]
    fn set_by_tag(&self, tag: &str, value: f64) -> Result<(), StoreError>;

    /// Set (`value > 0`) or clear one bit of a generic register, returns the new bitfield
    fn set_bit(&self, address: &str, value: f64) -> Result<u64, StoreError>;

    /// Read one bit (0 or 1) of a generic register
    fn get_bit(&self, address: &str) -> Result<u8, StoreError>;

    /// Rewrite every `<base>_<n>` row from the bitfield at `base`, returns the rows touched
    fn propagate_digital(&self, base: u16) -> Result<usize, StoreError>;

    /// Check that the datapoint table is reachable
    fn healthcheck(&self) -> Result<(), StoreError>;
}
