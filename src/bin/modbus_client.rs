// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use tokio::time::{timeout, Duration};
use tokio_modbus::prelude::*;

use mbslave_api::registers::codec::{decode, encode, words_required};
use mbslave_api::registers::DataType;

/// Modbus client for probing holding registers of a running slave
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "5502")]
    port: u16,

    /// Starting holding register address
    #[clap(long, default_value = "0")]
    register: u16,

    /// Data type used to decode the registers (float32, float64, int16, uint16, digital)
    #[clap(long, default_value = "uint16")]
    datatype: DataType,

    /// Number of registers to read, defaults to the width of the data type
    #[clap(long)]
    quantity: Option<u16>,

    /// Value to write before reading, encoded with the data type
    #[clap(long)]
    write: Option<f64>,

    /// Request timeout in seconds
    #[clap(long, default_value = "10")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let request_timeout = Duration::from_secs(args.timeout);

    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    println!("Connecting to Modbus server at {}", socket_addr);
    let mut ctx = timeout(request_timeout, tcp::connect(socket_addr)).await??;

    if let Some(value) = args.write {
        let words = encode(args.datatype, value);
        println!(
            "Writing {} as {} to register {}: {:?}",
            value, args.datatype, args.register, words
        );
        timeout(
            request_timeout,
            ctx.write_multiple_registers(args.register, &words),
        )
        .await???;
    }

    let quantity = args
        .quantity
        .unwrap_or_else(|| words_required(args.datatype));
    println!(
        "Reading {} holding registers starting at address {}",
        quantity, args.register
    );
    let response = timeout(
        request_timeout,
        ctx.read_holding_registers(args.register, quantity),
    )
    .await???;

    println!("Raw register values: {:?}", response);

    match decode(args.datatype, &response) {
        Ok(value) => println!("Register {}: {} = {}", args.register, args.datatype, value),
        Err(e) => println!(
            "Register {}: cannot decode as {}: {}",
            args.register, args.datatype, e
        ),
    }

    Ok(())
}
