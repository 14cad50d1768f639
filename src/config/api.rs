// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP API server configuration

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP mirror of the tag database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,

    /// Valid range is 1-65534.
    pub port: u16,

    pub address: String,

    /// Server identity sent in the `Server` header
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_name() -> String {
    "MbSlaveApi".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
            address: "127.0.0.1".to_string(),
            name: default_name(),
        }
    }
}
