// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tag definitions
//!
//! Each entry of the `registers` section declares one tag exposed over Modbus and
//! HTTP. Addresses and data types are kept as written in the file and parsed on
//! demand, so the database stores exactly what the operator configured.
//!
//! ```yaml
//! registers:
//!   - tag: ValidTagF32
//!     description: A float32 value
//!     address: "4"
//!     datatype: float32
//!   - tag: PumpRunning
//!     description: Bit 1 of generic register 10
//!     address: "10_1"
//!     datatype: digital_1
//! ```

use serde::{Deserialize, Serialize};

use crate::registers::{ParseTagError, TagAddress, TagType};

/// One configured tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Unique tag name
    pub tag: String,

    #[serde(default)]
    pub description: String,

    /// `"<register>"` or `"<base>_<bit>"`
    pub address: String,

    /// `float32`, `float64`, `int16`, `uint16`, `digital` or `digital_<bit>`
    pub datatype: String,
}

impl TagConfig {
    pub fn parsed_address(&self) -> Result<TagAddress, ParseTagError> {
        self.address.parse()
    }

    pub fn parsed_type(&self) -> Result<TagType, ParseTagError> {
        self.datatype.parse()
    }
}
