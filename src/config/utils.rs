// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::debug;

use super::Config;
use crate::registers::{DataType, TagAddress};

/// JSON schema the YAML configuration is validated against
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./mbslave_api --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Port Range**: Modbus and API ports must be within 1-65534
/// - **Connection cap**: `modbus.max_clients` must be at least 1
/// - **Tags**: names and addresses are unique, addresses and data types parse
/// - **Digital bits**: a `<base>_<bit>` tag must be `digital`, a `digital_<n>` suffix
///   must name the same bit, and `<base>` must not be declared as a non-digital register
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    for (name, port) in [("Modbus", config.modbus.port), ("API", config.api.port)] {
        if !(1..=65534).contains(&port) {
            anyhow::bail!("Invalid {} port number: {}", name, port);
        }
    }

    if config.modbus.max_clients == 0 {
        anyhow::bail!("modbus.max_clients must be at least 1");
    }

    for address in [&config.modbus.address, &config.api.address] {
        if !is_valid_ip_address(address) {
            // Hostnames are accepted, just noted
            debug!("Potentially invalid address format: {}", address);
        }
    }

    validate_registers(config)
}

fn validate_registers(config: &Config) -> Result<()> {
    let mut tags = HashSet::new();
    let mut addresses = HashSet::new();
    let mut plain_types: HashMap<u16, DataType> = HashMap::new();
    let mut bit_bases = Vec::new();

    for register in &config.registers {
        if !tags.insert(register.tag.as_str()) {
            anyhow::bail!("Duplicate tag name: {}", register.tag);
        }
        if !addresses.insert(register.address.as_str()) {
            anyhow::bail!("Duplicate tag address: {}", register.address);
        }

        let address = register
            .parsed_address()
            .with_context(|| format!("Invalid address for tag {}", register.tag))?;
        let tag_type = register
            .parsed_type()
            .with_context(|| format!("Invalid datatype for tag {}", register.tag))?;

        match address {
            TagAddress::Bit { base, bit } => {
                if !tag_type.is_digital() {
                    anyhow::bail!(
                        "Tag {} at bit address {} must be digital, not {}",
                        register.tag,
                        register.address,
                        register.datatype
                    );
                }
                if let Some(type_bit) = tag_type.bit {
                    if type_bit != bit {
                        anyhow::bail!(
                            "Tag {} datatype {} does not match bit {} of address {}",
                            register.tag,
                            register.datatype,
                            bit,
                            register.address
                        );
                    }
                }
                bit_bases.push((base, register.tag.as_str()));
            }
            TagAddress::Register(number) => {
                plain_types.insert(number, tag_type.data_type);
            }
        }
    }

    for (base, tag) in bit_bases {
        if let Some(data_type) = plain_types.get(&base) {
            if *data_type != DataType::Digital {
                anyhow::bail!(
                    "Tag {} needs register {} as a digital generic register, but it is declared {}",
                    tag,
                    base,
                    data_type
                );
            }
        }
    }

    Ok(())
}
