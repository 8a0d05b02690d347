//! # Modbus TCP Server
//!
//! Serves the [`RegisterStore`] as holding registers. Every connection gets
//! its own service value holding a handle to the same bank, so clients see
//! the registers the simulators write and vice versa.
//!
//! | Code | Function | Limit |
//! |------|----------|-------|
//! | 0x03 | Read Holding Registers | 125 |
//! | 0x06 | Write Single Register | 1 |
//! | 0x10 | Write Multiple Registers | 123 |
//! | 0x17 | Read/Write Multiple Registers | 125 read, 121 write |
//!
//! A quantity of zero or above the limit answers `IllegalDataValue`, a range
//! outside the bank answers `IllegalDataAddress` and every other function
//! code answers `IllegalFunction`. The unit identifier is not checked.

use std::future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{debug, error, info, warn};

use crate::constants::{
    display_address, MAX_READ_REGISTERS, MAX_READ_WRITE_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::PlantResult;
use crate::store::RegisterStore;

// ============================================================================
// Request validation
// ============================================================================

/// Check a quantity against its limit and the range against the bank.
fn check_range(bank: usize, address: u16, count: usize, limit: usize) -> Result<(), ExceptionCode> {
    if count == 0 || count > limit {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if usize::from(address) + count > bank {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

// ============================================================================
// Service
// ============================================================================

/// Holding-register service over the shared bank.
#[derive(Debug, Clone)]
pub struct RegisterService {
    store: RegisterStore,
}

impl RegisterService {
    pub fn new(store: RegisterStore) -> Self {
        Self { store }
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        check_range(self.store.len(), address, usize::from(count), MAX_READ_REGISTERS)?;
        debug!("FC03 {} x{}", display_address(address), count);
        self.store
            .get(address, usize::from(count))
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    fn write(&self, address: u16, values: &[u16], limit: usize) -> Result<(), ExceptionCode> {
        check_range(self.store.len(), address, values.len(), limit)?;
        debug!("Write {} x{}", display_address(address), values.len());
        self.store
            .set(address, values)
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }

    /// Answer one request.
    pub fn handle(&self, req: Request<'_>) -> Result<Response, ExceptionCode> {
        match req {
            Request::ReadHoldingRegisters(address, count) => {
                self.read(address, count).map(Response::ReadHoldingRegisters)
            }
            Request::WriteSingleRegister(address, value) => self
                .write(address, std::slice::from_ref(&value), 1)
                .map(|_| Response::WriteSingleRegister(address, value)),
            Request::WriteMultipleRegisters(address, values) => {
                let count = values.len() as u16;
                self.write(address, &values, MAX_WRITE_REGISTERS)
                    .map(|_| Response::WriteMultipleRegisters(address, count))
            }
            Request::ReadWriteMultipleRegisters(read_address, read_count, write_address, values) => {
                // both halves are validated before anything is written
                check_range(
                    self.store.len(),
                    read_address,
                    usize::from(read_count),
                    MAX_READ_REGISTERS,
                )?;
                self.write(write_address, &values, MAX_READ_WRITE_REGISTERS)?;
                self.read(read_address, read_count)
                    .map(Response::ReadWriteMultipleRegisters)
            }
            other => {
                warn!("Unsupported Modbus request: {:?}", other);
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = self.handle(req);
        if let Err(e) = &res {
            debug!("Modbus exception: {:?}", e);
        }
        future::ready(res)
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Bind `address` and serve until `shutdown` turns true.
pub async fn serve(
    address: SocketAddr,
    store: RegisterStore,
    shutdown: watch::Receiver<bool>,
) -> PlantResult<()> {
    let listener = TcpListener::bind(address).await?;
    serve_listener(listener, store, shutdown).await
}

/// Serve on an already bound listener until `shutdown` turns true.
pub async fn serve_listener(
    listener: TcpListener,
    store: RegisterStore,
    mut shutdown: watch::Receiver<bool>,
) -> PlantResult<()> {
    info!("Modbus TCP server listening on {}", listener.local_addr()?);
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr: SocketAddr| {
        let store = store.clone();
        async move {
            debug!("Modbus client connected: {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(RegisterService::new(store.clone())))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus connection error: {}", err);
    };

    tokio::select! {
        result = server.serve(&on_connected, on_process_error) => {
            result?;
        }
        _ = async {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        } => {}
    }
    info!("Modbus TCP server stopped");
    Ok(())
}
