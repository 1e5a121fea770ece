//! Async serial transport boundary for the Modbus RTU master.
//!
//! The master only ever talks to the traits in this module. `serial`
//! implements them over `tokio-serial`; `sim` provides an in-memory slave
//! for tests and demos.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

pub mod serial;
pub mod sim;

pub use serial::{SerialPortProvider, SerialTransport};
pub use sim::{SimProvider, SimSlave, SimTransport, SlaveFault};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Open(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("transport not open")]
    NotOpen,
    #[error("transport already open")]
    AlreadyOpen,
    #[error("no serial port available")]
    NoPortAvailable,
}

/// Serial line parameters, applied when a transport is opened.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// Exclusive handle over the inbound byte stream of an open transport.
#[async_trait]
pub trait ReadHandle: Send {
    /// Next chunk of bytes, `None` once the stream has ended (device gone).
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Abort a pending read and drop any partially buffered input.
    /// Best-effort, must not fail past the caller.
    async fn cancel(&mut self);

    /// Best-effort teardown of the handle.
    async fn release(self: Box<Self>);
}

impl std::fmt::Debug for dyn ReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadHandle")
    }
}

/// Exclusive handle over the outbound byte stream of an open transport.
#[async_trait]
pub trait WriteHandle: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Best-effort teardown of the handle.
    async fn release(self: Box<Self>);
}

impl std::fmt::Debug for dyn WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WriteHandle")
    }
}

/// One serial device. Handles are acquired from an open transport and can
/// be re-acquired after a failed exchange to clear partial-read state.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, config: &SerialConfig) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    async fn acquire_reader(&self) -> Result<Box<dyn ReadHandle>, TransportError>;

    async fn acquire_writer(&self) -> Result<Box<dyn WriteHandle>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Device presence notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Attached(String),
    Detached(String),
}

/// Source of transports and of attach/detach notifications.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Transport the master should connect to.
    async fn request_transport(&self) -> Result<Arc<dyn Transport>, TransportError>;

    /// Previously requested transports that are currently present.
    async fn known_transports(&self) -> Vec<Arc<dyn Transport>>;

    fn subscribe(&self) -> broadcast::Receiver<PortEvent>;
}
