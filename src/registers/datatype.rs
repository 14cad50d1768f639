// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tag data types and logical addresses
//!
//! Tags are configured with textual types (`float32`, `digital_3`, ...) and textual
//! addresses (`"4"`, `"10_1"`). This module parses both once into closed types so the
//! rest of the engine never splits strings at the use site.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between a generic base register and a bit index (`"10_1"`, `"digital_1"`).
pub const BIT_SEPARATOR: char = '_';

/// Number of bits hosted by one generic register.
pub const BITS_PER_REGISTER: u8 = 16;

/// Errors raised while parsing textual tag metadata
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseTagError {
    #[error("Unknown data type '{0}'")]
    UnknownDataType(String),
    #[error("Malformed address '{0}'")]
    MalformedAddress(String),
}

/// Wire representation of a tag value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float32,
    Float64,
    Int16,
    Uint16,
    Digital,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Digital => "digital",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(DataType::Float32),
            "float64" => Ok(DataType::Float64),
            "int16" => Ok(DataType::Int16),
            "uint16" => Ok(DataType::Uint16),
            "digital" => Ok(DataType::Digital),
            other => Err(ParseTagError::UnknownDataType(other.to_string())),
        }
    }
}

/// A configured tag type: a [`DataType`] plus the optional `_N` discriminator.
///
/// The discriminator is metadata for the bit overlay only; the codec never sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagType {
    pub data_type: DataType,
    pub bit: Option<u8>,
}

impl TagType {
    pub const fn plain(data_type: DataType) -> Self {
        Self {
            data_type,
            bit: None,
        }
    }

    pub fn is_digital(&self) -> bool {
        self.data_type == DataType::Digital
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "{}{}{}", self.data_type, BIT_SEPARATOR, bit),
            None => write!(f, "{}", self.data_type),
        }
    }
}

impl FromStr for TagType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, suffix) = match s.split_once(BIT_SEPARATOR) {
            Some((head, suffix)) => (head, Some(suffix)),
            None => (s, None),
        };
        let data_type = head
            .parse::<DataType>()
            .map_err(|_| ParseTagError::UnknownDataType(s.to_string()))?;
        let bit = match suffix {
            Some(suffix) => Some(
                suffix
                    .parse::<u8>()
                    .map_err(|_| ParseTagError::UnknownDataType(s.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { data_type, bit })
    }
}

/// Logical address of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagAddress {
    /// A plain holding register, e.g. `"4"`
    Register(u16),
    /// One bit of a generic register, e.g. `"10_1"`
    Bit { base: u16, bit: u8 },
}

impl TagAddress {
    /// Register number on the Modbus side (the base for bit addresses)
    pub fn register(&self) -> u16 {
        match *self {
            TagAddress::Register(register) => register,
            TagAddress::Bit { base, .. } => base,
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, TagAddress::Bit { .. })
    }
}

impl fmt::Display for TagAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagAddress::Register(register) => write!(f, "{}", register),
            TagAddress::Bit { base, bit } => write!(f, "{}{}{}", base, BIT_SEPARATOR, bit),
        }
    }
}

impl FromStr for TagAddress {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseTagError::MalformedAddress(s.to_string());
        match s.split_once(BIT_SEPARATOR) {
            Some((base, bit)) => {
                let base = base.parse::<u16>().map_err(|_| malformed())?;
                let bit = bit.parse::<u8>().map_err(|_| malformed())?;
                if bit >= BITS_PER_REGISTER {
                    return Err(malformed());
                }
                Ok(TagAddress::Bit { base, bit })
            }
            None => s.parse::<u16>().map(TagAddress::Register).map_err(|_| malformed()),
        }
    }
}
