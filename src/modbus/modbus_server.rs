// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server implementation for the tag database
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! The Modbus master is the device that requests data, while the Modbus slave is the device
//! that provides data. In other words, the Modbus master is here the client and the
//! Modbus slave is here the server.
//!
//! ## Supported Functions
//!
//! | Function | Code | Behavior |
//! |----------|------|----------|
//! | Read Holding Registers | 0x03 | resolver read |
//! | Write Single Register | 0x06 | resolver write, echo |
//! | Write Multiple Registers | 0x10 | resolver write, echo |
//! | Read/Write Multiple Registers | 0x17 | write first, then read |
//! | Coils, discrete inputs, input registers | 0x01, 0x02, 0x04, 0x05, 0x0F | logged, empty answer |
//!
//! Any other function code is answered with `IllegalFunction`.

use std::{future, io, net::SocketAddr, sync::Arc};

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use crate::registers::{RegisterError, RegisterResolver};

/// A Modbus TCP service answering holding-register requests from the tag store
///
/// One instance is created per client connection. When the server enforces a
/// connection cap, the instance owns a semaphore permit that is released when the
/// connection closes and the service is dropped.
pub struct HoldingRegisterService {
    resolver: RegisterResolver,
    peer: Option<SocketAddr>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl tokio_modbus::server::Service for HoldingRegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Process a Modbus request and provide a response
    ///
    /// One call yields exactly one response or one exception; store and codec
    /// failures never escape as panics.
    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request from {:?}: {:?}", self.peer, req);

        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(
                    "Reading {} holding registers starting from address {}",
                    cnt, addr
                );
                self.resolver
                    .read(addr, cnt)
                    .map(Response::ReadHoldingRegisters)
                    .map_err(|e| self.reject(addr, e))
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                self.resolver
                    .write(addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
                    .map_err(|e| self.reject(addr, e))
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                self.resolver
                    .write(addr, std::slice::from_ref(&value))
                    .map(|_| Response::WriteSingleRegister(addr, value))
                    .map_err(|e| self.reject(addr, e))
            }
            Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, values) => {
                debug!(
                    "Writing {} values at {} then reading {} registers at {}",
                    values.len(),
                    write_addr,
                    read_cnt,
                    read_addr
                );
                self.resolver
                    .write(write_addr, &values)
                    .map_err(|e| self.reject(write_addr, e))
                    .and_then(|_| {
                        self.resolver
                            .read(read_addr, read_cnt)
                            .map_err(|e| self.reject(read_addr, e))
                    })
                    .map(Response::ReadWriteMultipleRegisters)
            }
            Request::ReadCoils(addr, cnt) => {
                warn!("Read coils ({} at {}) is not implemented", cnt, addr);
                Ok(Response::ReadCoils(Vec::new()))
            }
            Request::ReadDiscreteInputs(addr, cnt) => {
                warn!("Read discrete inputs ({} at {}) is not implemented", cnt, addr);
                Ok(Response::ReadDiscreteInputs(Vec::new()))
            }
            Request::ReadInputRegisters(addr, cnt) => {
                warn!("Read input registers ({} at {}) is not implemented", cnt, addr);
                Ok(Response::ReadInputRegisters(Vec::new()))
            }
            Request::WriteSingleCoil(addr, coil) => {
                warn!("Write single coil at {} is not implemented", addr);
                Ok(Response::WriteSingleCoil(addr, coil))
            }
            Request::WriteMultipleCoils(addr, coils) => {
                warn!("Write multiple coils at {} is not implemented", addr);
                Ok(Response::WriteMultipleCoils(addr, coils.len() as u16))
            }
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        future::ready(res)
    }
}

impl HoldingRegisterService {
    /// Create a service without a connection permit
    pub fn new(resolver: RegisterResolver) -> Self {
        Self {
            resolver,
            peer: None,
            _permit: None,
        }
    }

    /// Create the service for one accepted connection, holding its slot until dropped
    pub fn for_connection(
        resolver: RegisterResolver,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            resolver,
            peer: Some(peer),
            _permit: Some(permit),
        }
    }

    fn reject(&self, addr: u16, err: RegisterError) -> ExceptionCode {
        let code = err.exception_code();
        match err {
            RegisterError::IllegalDataAddress(register) => warn!(
                "Exception::IllegalDataAddress - Register {} (request at {})",
                register, addr
            ),
            other => error!("Modbus request at {} failed: {}", addr, other),
        }
        code
    }
}

/// Serve Modbus TCP on `listener` until the future is dropped or the listener fails
///
/// At most `max_clients` connections are serviced at once; extra connections are
/// closed as soon as they are accepted.
pub async fn run_server(
    listener: TcpListener,
    resolver: RegisterResolver,
    max_clients: usize,
) -> io::Result<()> {
    let slots = Arc::new(Semaphore::new(max_clients));
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr| {
        let resolver = resolver.clone();
        let slots = slots.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |peer| {
                match slots.clone().try_acquire_owned() {
                    Ok(permit) => {
                        info!("Modbus client connected from {}", peer);
                        Ok(Some(HoldingRegisterService::for_connection(
                            resolver.clone(),
                            peer,
                            permit,
                        )))
                    }
                    Err(_) => {
                        warn!(
                            "Refusing Modbus client {}: {} clients already connected",
                            peer, max_clients
                        );
                        Ok(None)
                    }
                }
            })
        }
    };

    let on_process_error = |err| {
        error!("Modbus server error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagConfig;
    use crate::registers::codec::encode;
    use crate::registers::DataType;
    use crate::store::{SqliteTagStore, TagStore};
    use std::borrow::Cow;
    use tokio_modbus::server::Service;

    fn service(allow_null_registers: bool) -> HoldingRegisterService {
        let store = SqliteTagStore::open_in_memory().unwrap();
        store
            .upsert_tags(&[TagConfig {
                tag: "Valid".to_string(),
                description: String::new(),
                address: "4".to_string(),
                datatype: "float32".to_string(),
            }])
            .unwrap();
        HoldingRegisterService::new(RegisterResolver::new(Arc::new(store), allow_null_registers))
    }

    #[tokio::test]
    async fn test_write_then_read_holding_registers() {
        let service = service(false);
        let words = encode(DataType::Float32, 100.0);

        let response = service
            .call(Request::WriteMultipleRegisters(4, Cow::Owned(words.clone())))
            .await
            .unwrap();
        assert_eq!(response, Response::WriteMultipleRegisters(4, 2));

        let response = service
            .call(Request::ReadHoldingRegisters(4, 2))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(words));
    }

    #[tokio::test]
    async fn test_read_write_multiple_registers() {
        let service = service(false);
        let words = encode(DataType::Float32, 1123.4);

        let response = service
            .call(Request::ReadWriteMultipleRegisters(
                4,
                2,
                4,
                Cow::Owned(words.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadWriteMultipleRegisters(words));
    }

    #[tokio::test]
    async fn test_exceptions() {
        let service = service(false);
        assert_eq!(
            service.call(Request::ReadHoldingRegisters(0, 1)).await,
            Err(ExceptionCode::IllegalDataAddress)
        );
        // float32 cut in half
        assert_eq!(
            service.call(Request::WriteSingleRegister(4, 1)).await,
            Err(ExceptionCode::ServerDeviceFailure)
        );
        assert_eq!(
            service.call(Request::ReportServerId).await,
            Err(ExceptionCode::IllegalFunction)
        );
    }

    #[tokio::test]
    async fn test_unimplemented_tables_answer_empty() {
        let service = service(false);
        assert_eq!(
            service.call(Request::ReadCoils(0, 8)).await,
            Ok(Response::ReadCoils(Vec::new()))
        );
        assert_eq!(
            service.call(Request::ReadInputRegisters(0, 2)).await,
            Ok(Response::ReadInputRegisters(Vec::new()))
        );
        assert_eq!(
            service.call(Request::WriteSingleCoil(3, true)).await,
            Ok(Response::WriteSingleCoil(3, true))
        );
    }
}
