// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server configuration

use serde::{Deserialize, Serialize};

/// Configuration for the Modbus TCP slave.
///
/// # Fields
///
/// * `enabled` - Flag to enable or disable the Modbus server
/// * `port` - TCP port number for the Modbus server (default: 5502)
/// * `address` - Network address for the Modbus server to bind to (default: 127.0.0.1)
/// * `max_clients` - Number of simultaneous client connections (default: 5)
///
/// # Example
///
/// ```
/// use mbslave_api::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     enabled: true,
///     port: 503,
///     address: "0.0.0.0".to_string(),
///     max_clients: 2,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// When disabled, no listener is opened.
    pub enabled: bool,

    /// The TCP port the Modbus server will listen on.
    ///
    /// Valid range is 1-65534.
    pub port: u16,

    /// The network address the Modbus server will bind to.
    ///
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    pub address: String,

    /// Connections beyond this count are closed right after being accepted.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_max_clients() -> usize {
    5
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5502,
            address: "127.0.0.1".to_string(),
            max_clients: default_max_clients(),
        }
    }
}
