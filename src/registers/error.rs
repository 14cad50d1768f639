// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use thiserror::Error;
use tokio_modbus::ExceptionCode;

use super::datatype::ParseTagError;
use crate::store::StoreError;

/// Errors raised while servicing a holding-register request
#[derive(Error, Debug)]
pub enum RegisterError {
    /// No known data type (or value) for the register and null registers are disallowed
    #[error("Illegal data address {0}")]
    IllegalDataAddress(u16),

    /// A multi-word value runs past the words supplied with the request
    #[error("Value needs {needed} words but only {available} remain in the request")]
    WordsExhausted { needed: u16, available: usize },

    /// The words decode to NaN or an infinity
    #[error("Register {0} decodes to a non-finite value")]
    NonFiniteValue(u16),

    #[error(transparent)]
    Parse(#[from] ParseTagError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegisterError {
    /// Modbus exception reported to the client for this error
    ///
    /// Only unresolvable addresses are reported as such; codec and store failures
    /// surface as a generic device failure.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            RegisterError::IllegalDataAddress(_) => ExceptionCode::IllegalDataAddress,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}
