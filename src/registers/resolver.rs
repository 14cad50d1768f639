// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Address/quantity resolver
//!
//! A Modbus request names a start register and a word count, but tags are 1, 2 or 4
//! words wide. The resolver walks the requested range one tag at a time: it asks the
//! store for the type found at the current register, lets the codec consume the right
//! number of words, then jumps past them.
//!
//! ### Null registers
//!
//! With `allow_null_registers` enabled, a register that has no row is treated as an
//! independent `uint16` reading 0, and writes to it are accepted and dropped. Without
//! it, such a register fails the whole request with an illegal data address.

use std::sync::Arc;

use log::{debug, warn};

use super::codec::{decode, encode, words_required};
use super::datatype::DataType;
use super::error::RegisterError;
use crate::store::{StoreError, TagStore};

/// Type resolved for one register of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Resolved {
    data_type: DataType,
    /// No row exists, the type was defaulted by the null policy
    defaulted: bool,
}

/// Maps holding-register requests onto typed tags of a [`TagStore`]
#[derive(Clone)]
pub struct RegisterResolver {
    store: Arc<dyn TagStore>,
    allow_null_registers: bool,
}

impl RegisterResolver {
    pub fn new(store: Arc<dyn TagStore>, allow_null_registers: bool) -> Self {
        Self {
            store,
            allow_null_registers,
        }
    }

    pub fn store(&self) -> &Arc<dyn TagStore> {
        &self.store
    }

    /// Read `quantity` words starting at `address`
    ///
    /// When the last tag of the range is wider than the words left, the result is
    /// truncated to `quantity` words keeping the leading ones.
    ///
    /// ### Errors
    ///
    /// * [`RegisterError::IllegalDataAddress`] for unknown or valueless registers when
    ///   null registers are disallowed, for unknown data types, and when the range
    ///   runs past register 65535
    /// * [`RegisterError::Store`] for any other store failure
    pub fn read(&self, address: u16, quantity: u16) -> Result<Vec<u16>, RegisterError> {
        let quantity = usize::from(quantity);
        let mut words = Vec::with_capacity(quantity);
        let mut offset = 0;

        while offset < quantity {
            let register = register_at(address, offset)?;
            let resolved = self.resolve(register)?;

            let value = if resolved.defaulted {
                0.0
            } else {
                self.read_value(register)?
            };
            let encoded = encode(resolved.data_type, value);
            debug!(
                "Read register {} as {}: {} -> {:?}",
                register, resolved.data_type, value, encoded
            );

            offset += encoded.len();
            words.extend(encoded);
        }

        if words.len() > quantity {
            warn!(
                "Truncating read at {} from {} to {} words",
                address,
                words.len(),
                quantity
            );
            words.truncate(quantity);
        }
        Ok(words)
    }

    /// Write `words` starting at `address`
    ///
    /// ### Errors
    ///
    /// Same as [`RegisterResolver::read`], plus [`RegisterError::WordsExhausted`] when
    /// a multi-word tag is cut short by the end of the request and
    /// [`RegisterError::NonFiniteValue`] when the words decode to NaN or an infinity.
    /// Tags before the failing one are already written.
    pub fn write(&self, address: u16, words: &[u16]) -> Result<(), RegisterError> {
        let mut offset = 0;

        while offset < words.len() {
            let register = register_at(address, offset)?;
            let resolved = self.resolve(register)?;
            let value = decode(resolved.data_type, &words[offset..])?;
            if !value.is_finite() {
                warn!("Rejecting non-finite write to register {}: {}", register, value);
                return Err(RegisterError::NonFiniteValue(register));
            }
            debug!(
                "Write register {} as {}: {}",
                register, resolved.data_type, value
            );

            match self.store.set_value(&register.to_string(), value) {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) if resolved.defaulted => {
                    debug!("Dropping write to null register {}", register);
                }
                Err(err) => return Err(err.into()),
            }

            offset += usize::from(words_required(resolved.data_type));
        }
        Ok(())
    }

    fn resolve(&self, register: u16) -> Result<Resolved, RegisterError> {
        match self.store.data_type_of(&register.to_string()) {
            Ok(tag_type) => Ok(Resolved {
                data_type: tag_type.data_type,
                defaulted: false,
            }),
            Err(StoreError::NotFound(_)) if self.allow_null_registers => Ok(Resolved {
                data_type: DataType::Uint16,
                defaulted: true,
            }),
            Err(StoreError::NotFound(_)) => {
                debug!("No tag registered at {}", register);
                Err(RegisterError::IllegalDataAddress(register))
            }
            Err(StoreError::Parse(err)) => {
                warn!("Register {} has an unusable type: {}", register, err);
                Err(RegisterError::IllegalDataAddress(register))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn read_value(&self, register: u16) -> Result<f64, RegisterError> {
        match self.store.get_by_address(&register.to_string()) {
            Ok(row) => Ok(row.value),
            Err(StoreError::NotFound(_) | StoreError::NoValue(_)) if self.allow_null_registers => {
                Ok(0.0)
            }
            Err(StoreError::NotFound(_) | StoreError::NoValue(_)) => {
                Err(RegisterError::IllegalDataAddress(register))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn register_at(address: u16, offset: usize) -> Result<u16, RegisterError> {
    u16::try_from(usize::from(address) + offset)
        .map_err(|_| RegisterError::IllegalDataAddress(address))
}
