// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus slave
use anyhow::Result;
use clap::Parser;
use log::info;

use std::path::PathBuf;
use tokio::signal;

use mbslave_api::config::{self, Config};
use mbslave_api::daemon::launch_daemon::Daemon;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file, created with defaults when missing
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file, overrides `database.path`
    #[arg(long)]
    database: Option<String>,

    /// Validate a configuration file and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    #[arg(long)]
    modbus_address: Option<String>,

    #[arg(long)]
    modbus_port: Option<u16>,

    #[arg(long)]
    api_address: Option<String>,

    #[arg(long)]
    api_port: Option<u16>,

    /// Serve registers without a tag as 0 instead of IllegalDataAddress
    #[arg(long)]
    allow_null_registers: bool,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        let config = Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!(
            "Configuration file is valid: {} ({} registers)",
            validate_path.display(),
            config.registers.len()
        );
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    info!("Reading configuration file: {}", config_path.display());
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.database.clone(),
        args.modbus_address.clone(),
        args.modbus_port,
        args.api_address.clone(),
        args.api_port,
        args.allow_null_registers,
    );

    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }

    Ok(())
}
