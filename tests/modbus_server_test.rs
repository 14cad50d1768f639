// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the holding-register Modbus server
//!
//! These tests start the server on an ephemeral port backed by an in-memory tag
//! store and talk to it with a `tokio-modbus` client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::prelude::*;

use mbslave_api::config::TagConfig;
use mbslave_api::modbus::run_server;
use mbslave_api::registers::codec::{decode, encode};
use mbslave_api::registers::{DataType, RegisterResolver};
use mbslave_api::store::{SqliteTagStore, TagStore};

fn tag(tag: &str, address: &str, datatype: &str) -> TagConfig {
    TagConfig {
        tag: tag.to_string(),
        description: format!("{} test tag", tag),
        address: address.to_string(),
        datatype: datatype.to_string(),
    }
}

fn test_store() -> Arc<SqliteTagStore> {
    let store = SqliteTagStore::open_in_memory().unwrap();
    store
        .upsert_tags(&[
            tag("ValidTagF32", "4", "float32"),
            tag("TestTagF32", "2", "float32"),
            tag("SampleTagF32", "16", "float32"),
            tag("WideTag", "20", "float64"),
            tag("DigitalTag0", "10_0", "digital_0"),
            tag("DigitalTag1", "10_1", "digital_1"),
            tag("DigitalTag2", "10_2", "digital_2"),
            tag("DigitalTag3", "10_3", "digital_3"),
        ])
        .unwrap();
    store.set_value("16", 1123.4).unwrap();
    store.set_value("10_0", 1.0).unwrap();
    store.set_value("4", 100.0).unwrap();
    Arc::new(store)
}

/// Start a server in the background and return its address
async fn start_test_server(
    store: Arc<SqliteTagStore>,
    allow_null_registers: bool,
    max_clients: usize,
) -> SocketAddr {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    let resolver = RegisterResolver::new(store, allow_null_registers);

    tokio::spawn(async move {
        if let Err(e) = run_server(listener, resolver, max_clients).await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(100)).await;
    socket_addr
}

#[tokio::test]
async fn test_read_float32_register() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = start_test_server(test_store(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    let data = ctx.read_holding_registers(4, 2).await??;
    assert_eq!(decode(DataType::Float32, &data)?, 100.0);

    let data = ctx.read_holding_registers(16, 2).await??;
    assert_relative_eq!(
        decode(DataType::Float32, &data)?,
        1123.4,
        max_relative = 1e-6
    );

    Ok(())
}

#[tokio::test]
async fn test_write_then_read_float32() -> Result<(), Box<dyn std::error::Error>> {
    let store = test_store();
    let socket_addr = start_test_server(store.clone(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    let words = encode(DataType::Float32, 200.5);
    ctx.write_multiple_registers(4, &words).await??;

    assert_eq!(ctx.read_holding_registers(4, 2).await??, words);
    assert_eq!(store.get_by_address("4")?.value, 200.5);

    Ok(())
}

#[tokio::test]
async fn test_truncated_float64_read() -> Result<(), Box<dyn std::error::Error>> {
    let store = test_store();
    store.set_value("20", 1.0)?;
    let socket_addr = start_test_server(store, false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    // 1.0f64 is 0x3FF0_0000_0000_0000, the top chunk is cut off
    let data = ctx.read_holding_registers(20, 3).await??;
    assert_eq!(data, vec![0, 0, 0]);

    Ok(())
}

#[tokio::test]
async fn test_null_registers_strict() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = start_test_server(test_store(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    let response = ctx.read_holding_registers(0, 1).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    // Registered but never written
    let response = ctx.read_holding_registers(2, 2).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    let response = ctx.write_single_register(0, 7).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    Ok(())
}

#[tokio::test]
async fn test_null_registers_permissive() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = start_test_server(test_store(), true, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    assert_eq!(ctx.read_holding_registers(0, 2).await??, vec![0, 0]);
    ctx.write_single_register(0, 7).await??;
    assert_eq!(ctx.read_holding_registers(0, 1).await??, vec![0]);
    assert_eq!(ctx.read_holding_registers(2, 2).await??, vec![0, 0]);

    Ok(())
}

#[tokio::test]
async fn test_generic_digital_register() -> Result<(), Box<dyn std::error::Error>> {
    let store = test_store();
    let socket_addr = start_test_server(store.clone(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    // 10_0 was set to 1 while seeding
    assert_eq!(ctx.read_holding_registers(10, 1).await??, vec![1]);

    store.set_value("10_2", 5.0)?;
    assert_eq!(ctx.read_holding_registers(10, 1).await??, vec![5]);

    ctx.write_single_register(10, 0b1010).await??;
    assert_eq!(store.get_by_address("10_0")?.value, 0.0);
    assert_eq!(store.get_by_address("10_1")?.value, 1.0);
    assert_eq!(store.get_by_address("10_2")?.value, 0.0);
    assert_eq!(store.get_by_address("10_3")?.value, 1.0);

    Ok(())
}

#[tokio::test]
async fn test_short_write_is_device_failure() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = start_test_server(test_store(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    let response = ctx.write_single_register(4, 1).await?;
    assert_eq!(response, Err(ExceptionCode::ServerDeviceFailure));

    Ok(())
}

#[tokio::test]
async fn test_nan_write_is_device_failure() -> Result<(), Box<dyn std::error::Error>> {
    let store = test_store();
    let socket_addr = start_test_server(store.clone(), false, 5).await;
    let mut ctx = tcp::connect(socket_addr).await?;

    let response = ctx.write_multiple_registers(4, &[0x0000, 0x7FC0]).await?;
    assert_eq!(response, Err(ExceptionCode::ServerDeviceFailure));

    let data = ctx.read_holding_registers(4, 2).await??;
    assert_eq!(decode(DataType::Float32, &data)?, 100.0);
    assert_eq!(store.get_by_address("4")?.value, 100.0);

    Ok(())
}

#[tokio::test]
async fn test_extra_clients_are_refused() -> Result<(), Box<dyn std::error::Error>> {
    let socket_addr = start_test_server(test_store(), false, 1).await;

    let mut first = tcp::connect(socket_addr).await?;
    assert_eq!(first.read_holding_registers(4, 2).await??.len(), 2);

    let mut second = tcp::connect(socket_addr).await?;
    let refused = time::timeout(Duration::from_secs(2), second.read_holding_registers(4, 2)).await;
    assert!(
        !matches!(refused, Ok(Ok(Ok(_)))),
        "second client should not be served"
    );

    // The first client keeps working
    assert_eq!(first.read_holding_registers(4, 2).await??.len(), 2);
    Ok(())
}
