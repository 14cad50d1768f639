// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the Modbus slave
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! - `modbus`: Settings for the Modbus TCP slave
//! - `api`: Settings for the HTTP API
//! - `database`: Location of the tag database
//! - `allow_null_registers`: Serve unknown registers as zero instead of rejecting them
//! - `registers`: The tags exposed over Modbus and HTTP
//!
//! ## Usage
//!
//! ```no_run
//! use mbslave_api::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     None,                           // Database path
//!     Some("0.0.0.0".to_string()),    // Modbus address
//!     Some(502),                      // Modbus port
//!     None,                           // API address
//!     Some(8081),                     // API port
//!     false,                          // Allow null registers
//! );
//!
//! println!("Modbus port: {}", config.modbus.port);
//! ```

pub mod api;
pub mod database;
pub mod modbus;
pub mod tags;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use api::ApiConfig;
pub use database::DatabaseConfig;
pub use modbus::ModbusConfig;
pub use tags::TagConfig;
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure
///
/// Every section has a default, so a file only needs to list what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modbus: ModbusConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Serve registers without a tag (or without a value) as 0 instead of
    /// answering `IllegalDataAddress`
    #[serde(default)]
    pub allow_null_registers: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub registers: Vec<TagConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus: ModbusConfig::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            allow_null_registers: false,
            description: "Modbus slave".to_string(),
            registers: Vec::new(),
        }
    }
}

impl Config {
    /// Write `<name>.sample.yaml` with default values next to `path`
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load and validate a configuration file
    ///
    /// A missing file is created with default values. The YAML is validated against
    /// the embedded JSON schema, then deserialized, then checked with
    /// [`utils::validate_specific_rules`]. On any validation failure a sample file is
    /// written next to `path` and an error is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value =
            serde_json::from_str(utils::CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Override file settings with command line arguments
    ///
    /// Only the provided values replace the loaded ones; `allow_null_registers`
    /// can only be switched on from the command line.
    pub fn apply_args(
        &mut self,
        database: Option<String>,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        api_address: Option<String>,
        api_port: Option<u16>,
        allow_null_registers: bool,
    ) {
        if let Some(path) = database {
            debug!("Overriding database path from command line: {}", path);
            self.database.path = path;
        }
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(address) = api_address {
            debug!("Overriding API address from command line: {}", address);
            self.api.address = address;
        }
        if let Some(port) = api_port {
            debug!("Overriding API port from command line: {}", port);
            self.api.port = port;
        }
        if allow_null_registers {
            debug!("Allowing null registers from command line");
            self.allow_null_registers = true;
        }
    }
}
