// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP slave library
//!
//! Exposes named, typed tags stored in SQLite as Modbus holding registers and
//! mirrors them through an HTTP API.
//!
//! - [`registers`]: the register virtualization engine (codec, bit overlay, resolver)
//! - [`store`]: the tag store contract and its SQLite implementation
//! - [`modbus`]: the `tokio-modbus` service and server loop
//! - [`api`]: the Rocket HTTP API
//! - [`config`]: YAML configuration with schema validation
//! - [`daemon`]: service startup and shutdown

pub mod api;
pub mod config;
pub mod daemon;
pub mod modbus;
pub mod registers;
pub mod store;
