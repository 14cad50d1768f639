// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register virtualization engine
//!
//! This module turns a flat, word-addressed holding-register space into typed,
//! named tags of width 1, 2 or 4 words.
//!
//! ## Key Components
//!
//! - [`datatype`]: closed data types and logical addresses parsed from configuration
//! - [`codec`]: value to word conversion for each data type
//! - [`overlay`]: packing of one-bit digital tags into a shared generic register
//! - [`resolver`]: walks an address/quantity request over tags of mixed width

pub mod codec;
pub mod datatype;
pub mod error;
pub mod overlay;
pub mod resolver;

pub use datatype::{DataType, ParseTagError, TagAddress, TagType, BITS_PER_REGISTER};
pub use error::RegisterError;
pub use resolver::RegisterResolver;
