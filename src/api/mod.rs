// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP API mirroring the tag database
//!
//! # Available Endpoints
//!
//! - `GET /all_registers` - Every configured tag with its current value
//! - `GET /register/<address>` - One datapoint by address
//! - `PUT /register/<address>?value=<f64>` - Write a datapoint by address (`val` is accepted too)
//! - `GET /tag/<name>` - One datapoint by tag name
//! - `PUT /tag/<name>?value=<f64>` - Write a datapoint by tag name
//! - `GET /healthcheck` - 200 when the database answers, 424 otherwise
//!
//! # Usage Examples
//!
//! ```bash
//! curl "http://localhost:8080/register/4"
//! curl -X PUT "http://localhost:8080/register/10_1?value=1"
//! curl "http://localhost:8080/tag/ValidTagF32"
//! ```
//!
//! Writes go through the same store path as Modbus writes, so a digital sub-bit
//! written here is immediately visible in the generic register read over Modbus.

pub mod routes;
pub mod server;

pub use server::{build_rocket, ApiState};
