// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP slave that exposes the configured tags as
//! holding registers. Framing and transport are handled by `tokio-modbus`; this module
//! only services the decoded requests through the register resolver.
//!
//! ## Key Components
//!
//! - `HoldingRegisterService`: the per-connection `tokio_modbus` service
//! - `run_server`: accept loop enforcing the connection cap
//!
//! ## Usage
//!
//! The Modbus server is normally started by the daemon:
//!
//! ```no_run
//! use mbslave_api::config::Config;
//! use mbslave_api::daemon::launch_daemon::Daemon;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!     Ok(())
//! }
//! ```

pub mod modbus_server;
pub use modbus_server::{run_server, HoldingRegisterService};
