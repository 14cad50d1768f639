// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Digital bit overlay
//!
//! Several one-bit `digital` tags can share a single 16-bit *generic* register. A tag
//! at `"10_1"` is bit 1 of the generic register stored at address `"10"`. The generic
//! row's value, read as an unsigned integer, is the only source of truth for the bits
//! it hosts; the sub-bit rows merely mirror it.
//!
//! ### Thread Safety
//!
//! Setting a bit is a read-modify-write of the generic row. Each base address gets
//! its own mutex in [`BitOverlay`], so two writers targeting bits of the same base are
//! serialized while writers on different bases proceed independently. Whole-field
//! writes to the generic row go through [`BitOverlay::store_field`] and take the same
//! mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::datatype::{ParseTagError, TagAddress};
use crate::store::StoreError;

/// Storage primitives the overlay needs from the backing store
pub trait BitfieldStore {
    /// Raw bitfield stored at `base`; `None` when the row or its value is missing
    fn load_bitfield(&self, base: u16) -> Result<Option<u64>, StoreError>;

    /// Persist the bitfield at `base`, creating the generic row if needed
    fn store_bitfield(&self, base: u16, field: u64) -> Result<(), StoreError>;

    /// Every registered sub-bit address hosted by `base`
    fn bit_addresses(&self, base: u16) -> Result<Vec<String>, StoreError>;

    /// Refresh the value visible on a sub-bit row
    fn store_bit_view(&self, address: &str, bit_value: u8) -> Result<(), StoreError>;
}

/// Per-base lock registry plus the bit packing operations
#[derive(Debug, Default)]
pub struct BitOverlay {
    cells: Mutex<HashMap<u16, Arc<Mutex<()>>>>,
}

impl BitOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, base: u16) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut cells = self.cells.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(cells.entry(base).or_default().clone())
    }

    /// Set (`value > 0`) or clear the bit addressed by `"<base>_<bit>"`
    ///
    /// A missing or unreadable generic row is treated as an empty bitfield.
    ///
    /// ### Returns
    ///
    /// The bitfield written back to the generic register.
    pub fn set_bit<S: BitfieldStore + ?Sized>(
        &self,
        store: &S,
        address: &str,
        value: f64,
    ) -> Result<u64, StoreError> {
        let (base, bit) = parse_bit_address(address)?;
        let cell = self.cell(base)?;
        let _guard = cell.lock().map_err(|_| StoreError::LockPoisoned)?;

        let current = match store.load_bitfield(base) {
            Ok(field) => field.unwrap_or(0),
            Err(err) => {
                warn!("Generic register {} unreadable, starting from 0: {}", base, err);
                0
            }
        };
        let updated = apply_bit(current, bit, value > 0.0);
        debug!(
            "Setting generic register {} bit {}: {:#06x} -> {:#06x}",
            base, bit, current, updated
        );

        store.store_bitfield(base, updated)?;
        store.store_bit_view(address, extract_bit(updated, bit))?;
        Ok(updated)
    }

    /// Read the bit addressed by `"<base>_<bit>"`
    ///
    /// A missing generic row reads as 0.
    ///
    /// ### Errors
    ///
    /// Fails with a malformed-address error when `address` carries no bit index.
    pub fn get_bit<S: BitfieldStore + ?Sized>(
        &self,
        store: &S,
        address: &str,
    ) -> Result<u8, StoreError> {
        let (base, bit) = parse_bit_address(address)?;
        match store.load_bitfield(base)? {
            Some(field) => Ok(extract_bit(field, bit)),
            None => {
                warn!("Could not find generic register {} for {}", base, address);
                Ok(0)
            }
        }
    }

    /// Overwrite the whole bitfield at `base`, then refresh its sub-bit rows
    ///
    /// Holds the base's mutex for the write and the refresh, so a concurrent
    /// [`BitOverlay::set_bit`] either sees the new field or lands after it.
    ///
    /// ### Returns
    ///
    /// The number of sub-bit rows refreshed.
    pub fn store_field<S: BitfieldStore + ?Sized>(
        &self,
        store: &S,
        base: u16,
        field: u64,
    ) -> Result<usize, StoreError> {
        let cell = self.cell(base)?;
        let _guard = cell.lock().map_err(|_| StoreError::LockPoisoned)?;

        debug!("Writing generic register {}: {:#06x}", base, field);
        store.store_bitfield(base, field)?;
        propagate_locked(store, base)
    }

    /// Re-derive every `<base>_<n>` row's visible value from the bitfield at `base`
    pub fn propagate<S: BitfieldStore + ?Sized>(
        &self,
        store: &S,
        base: u16,
    ) -> Result<usize, StoreError> {
        let cell = self.cell(base)?;
        let _guard = cell.lock().map_err(|_| StoreError::LockPoisoned)?;
        propagate_locked(store, base)
    }
}

/// Body of [`BitOverlay::propagate`]; the caller holds the base's mutex
fn propagate_locked<S: BitfieldStore + ?Sized>(
    store: &S,
    base: u16,
) -> Result<usize, StoreError> {
    let field = store.load_bitfield(base)?.unwrap_or(0);
    let mut touched = 0;
    for address in store.bit_addresses(base)? {
        match address.parse::<TagAddress>() {
            Ok(TagAddress::Bit { base: row_base, bit }) if row_base == base => {
                store.store_bit_view(&address, extract_bit(field, bit))?;
                touched += 1;
            }
            _ => warn!("Skipping {} while propagating generic register {}", address, base),
        }
    }
    debug!("Propagated generic register {} to {} sub-addresses", base, touched);
    Ok(touched)
}

/// Split a `"<base>_<bit>"` address
pub fn parse_bit_address(address: &str) -> Result<(u16, u8), ParseTagError> {
    match address.parse::<TagAddress>()? {
        TagAddress::Bit { base, bit } => Ok((base, bit)),
        TagAddress::Register(_) => Err(ParseTagError::MalformedAddress(address.to_string())),
    }
}

/// Set or clear one bit without disturbing the others
pub fn apply_bit(field: u64, bit: u8, on: bool) -> u64 {
    let mask = 1u64 << bit;
    if on {
        field | mask
    } else {
        field & !mask
    }
}

/// Bit `bit` of `field` as 0 or 1
pub fn extract_bit(field: u64, bit: u8) -> u8 {
    ((field >> bit) & 1) as u8
}
