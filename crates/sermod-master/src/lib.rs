//! Modbus RTU master.
//!
//! [`RtuMaster`] owns the connection lifecycle for a single serial device:
//! it opens the port through a [`TransportProvider`], serializes requests so
//! only one is on the wire at a time, bounds every response wait with a
//! timeout, and polls for the device to come back after it disappears.
//!
//! ```no_run
//! use sermod_master::{MasterConfig, RtuMaster};
//! use sermod_transport::SerialPortProvider;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), sermod_master::MasterError> {
//! let provider = Arc::new(SerialPortProvider::new(Some("/dev/ttyUSB0".into())));
//! let master = RtuMaster::new(provider, MasterConfig::default());
//! master.connect().await?;
//! let values = master.read_holding_registers(1, 0, 2).await?;
//! println!("{values:?}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use sermod_core::{decode, FunctionCode, ReadRequest, ResponseAssembler};
use sermod_transport::{
    PortEvent, ReadHandle, Transport, TransportProvider, WriteHandle,
};

pub use config::{MasterConfig, ReconnectPolicy};
pub use error::MasterError;
pub use sermod_core::ExceptionCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connected,
    /// The device vanished and recovery is (or was) in progress.
    Lost,
}

/// An open port plus the read and write handles acquired on it.
struct Link {
    transport: Arc<dyn Transport>,
    reader: Box<dyn ReadHandle>,
    writer: Box<dyn WriteHandle>,
}

struct MasterInner {
    provider: Arc<dyn TransportProvider>,
    config: MasterConfig,
    /// Holding this lock across the full write-then-read exchange is what
    /// keeps requests serialized on the half-duplex line.
    link: Mutex<Option<Link>>,
    state: StdMutex<ConnectionState>,
    /// Name of the currently linked port, readable without the link lock so
    /// detach events can be matched while a request is in flight.
    current_port: StdMutex<Option<String>>,
}

/// Master side of a Modbus RTU connection over async serial.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Must be created
/// inside a tokio runtime because it spawns a port-event listener.
pub struct RtuMaster {
    inner: Arc<MasterInner>,
    events_task: JoinHandle<()>,
}

impl RtuMaster {
    pub fn new(provider: Arc<dyn TransportProvider>, config: MasterConfig) -> Self {
        let inner = Arc::new(MasterInner {
            provider,
            config,
            link: Mutex::new(None),
            state: StdMutex::new(ConnectionState::Disconnected),
            current_port: StdMutex::new(None),
        });
        let events_task = tokio::spawn(Arc::clone(&inner).run_event_loop());
        Self { inner, events_task }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    /// Request a port from the provider, open it, and acquire handles.
    ///
    /// Errors are surfaced to the caller and leave the master disconnected;
    /// no retry is attempted here. Calling this while already connected is a
    /// no-op.
    pub async fn connect(&self) -> Result<(), MasterError> {
        self.inner.connect().await
    }

    /// Tear the connection down: cancel and release both handles, then close
    /// the port. Each step is best-effort so a failure in one cannot leave
    /// the rest undone. Also stops any reconnect polling.
    pub async fn disconnect(&self) {
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.teardown_link().await;
        debug!("disconnected");
    }

    /// Read `quantity` holding registers (function 0x03) starting at
    /// `start_address`.
    pub async fn read_holding_registers(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, MasterError> {
        self.read_registers(slave_id, FunctionCode::ReadHoldingRegisters, start_address, quantity)
            .await
    }

    /// Read `quantity` input registers (function 0x04).
    pub async fn read_input_registers(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, MasterError> {
        self.read_registers(slave_id, FunctionCode::ReadInputRegisters, start_address, quantity)
            .await
    }

    /// Read `quantity` coils (function 0x01).
    pub async fn read_coils(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, MasterError> {
        self.read_bits(slave_id, FunctionCode::ReadCoils, start_address, quantity)
            .await
    }

    /// Read `quantity` discrete inputs (function 0x02).
    pub async fn read_discrete_inputs(
        &self,
        slave_id: u8,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, MasterError> {
        self.read_bits(slave_id, FunctionCode::ReadDiscreteInputs, start_address, quantity)
            .await
    }

    async fn read_registers(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, MasterError> {
        let request = ReadRequest::new(slave_id, function, start_address, quantity)?;
        let payload = Arc::clone(&self.inner).execute(request).await?;
        Ok(decode::decode_registers(&payload, quantity))
    }

    async fn read_bits(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, MasterError> {
        let request = ReadRequest::new(slave_id, function, start_address, quantity)?;
        let payload = Arc::clone(&self.inner).execute(request).await?;
        Ok(decode::decode_coils(&payload, quantity))
    }
}

impl Drop for RtuMaster {
    fn drop(&mut self) {
        self.events_task.abort();
    }
}

impl MasterInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Connected -> Lost, exactly once. Returns false when recovery is
    /// already running or the master was deliberately disconnected.
    fn begin_loss(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Lost;
            true
        } else {
            false
        }
    }

    fn current_port(&self) -> Option<String> {
        self.current_port
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_current_port(&self, name: Option<String>) {
        *self.current_port.lock().unwrap_or_else(|e| e.into_inner()) = name;
    }

    async fn connect(&self) -> Result<(), MasterError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            debug!("already connected, skipping open");
            return Ok(());
        }
        let transport = self.provider.request_transport().await?;
        if transport.is_open() {
            debug!(port = %transport.name(), "port already open, skipping open");
        } else {
            transport.open(&self.config.serial).await?;
        }
        let reader = transport.acquire_reader().await?;
        let writer = transport.acquire_writer().await?;
        info!(
            port = %transport.name(),
            baud_rate = self.config.serial.baud_rate,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "connected"
        );
        self.set_current_port(Some(transport.name().to_string()));
        *link = Some(Link {
            transport,
            reader,
            writer,
        });
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Send one request frame and wait for the matching response, holding the
    /// link lock for the whole exchange.
    async fn execute(self: Arc<Self>, request: ReadRequest) -> Result<Vec<u8>, MasterError> {
        let frame = request.encode()?;
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(MasterError::NotConnected)?;

        trace!(
            slave_id = request.slave_id,
            function = request.function.as_u8(),
            start_address = request.start_address,
            quantity = request.quantity,
            "sending request"
        );
        match Self::exchange(link, &frame, &request, self.config.timeout).await {
            Ok(payload) => Ok(payload),
            Err(err) => {
                warn!(error = %err, "request failed");
                // A stale handle may still hold partial bytes from this
                // exchange; swap in a fresh one before the next request.
                Self::recover_reader(link).await;
                if err.indicates_device_loss() {
                    tokio::spawn(Arc::clone(&self).handle_device_loss());
                }
                Err(err)
            }
        }
    }

    async fn exchange(
        link: &mut Link,
        frame: &[u8],
        request: &ReadRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, MasterError> {
        link.writer.write_frame(frame).await?;

        let mut assembler = ResponseAssembler::new(request);
        let receive = async {
            loop {
                match link.reader.read_chunk().await? {
                    Some(chunk) => {
                        assembler.push(&chunk)?;
                        if assembler.is_complete() {
                            return Ok(());
                        }
                    }
                    None => return Err(MasterError::DeviceLost),
                }
            }
        };
        match tokio::time::timeout(timeout, receive).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(MasterError::Timeout),
        }

        let payload = assembler.finish()?;
        trace!(len = payload.len(), "received response");
        Ok(payload.to_vec())
    }

    /// Cancel and release the current read handle and acquire a new one, so
    /// the next exchange starts from an empty stream.
    async fn recover_reader(link: &mut Link) {
        match link.transport.acquire_reader().await {
            Ok(fresh) => {
                let mut stale = std::mem::replace(&mut link.reader, fresh);
                stale.cancel().await;
                stale.release().await;
            }
            Err(err) => {
                // Port is likely gone; loss handling rebuilds the link.
                warn!(error = %err, "failed to reacquire read handle");
                link.reader.cancel().await;
            }
        }
    }

    async fn handle_device_loss(self: Arc<Self>) {
        if !self.begin_loss() {
            return;
        }
        warn!("device lost, starting recovery");
        self.teardown_link().await;
        self.reconnect().await;
    }

    /// Take the link down handle by handle. Every step is best-effort.
    async fn teardown_link(&self) {
        self.set_current_port(None);
        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            link.reader.cancel().await;
            link.reader.release().await;
            link.writer.release().await;
            if let Err(err) = link.transport.close().await {
                debug!(error = %err, "close failed during teardown");
            }
        }
    }

    /// Poll the provider until the device shows up again or the policy gives
    /// up. Stops immediately if the state leaves `Lost`, which is how
    /// [`RtuMaster::disconnect`] cancels recovery.
    async fn reconnect(self: Arc<Self>) {
        let policy = self.config.reconnect;
        let mut delay = policy.interval;
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(delay).await;
            if self.state() != ConnectionState::Lost {
                debug!("reconnect polling stopped");
                return;
            }
            attempt += 1;
            match self.try_reopen().await {
                Ok(true) => {
                    info!(attempt, "reconnected");
                    return;
                }
                Ok(false) => trace!(attempt, "device not present, retrying"),
                Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
            }
            if let Some(max) = policy.max_attempts {
                if attempt >= max {
                    warn!(attempts = attempt, "giving up on reconnecting");
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
            delay = delay.mul_f64(policy.backoff);
        }
    }

    /// One reopen attempt against whatever the provider currently knows.
    /// Returns `Ok(false)` when no device is present.
    async fn try_reopen(&self) -> Result<bool, MasterError> {
        let Some(transport) = self.provider.known_transports().await.into_iter().next() else {
            return Ok(false);
        };
        if !transport.is_open() {
            transport.open(&self.config.serial).await?;
        }
        let reader = transport.acquire_reader().await?;
        let writer = transport.acquire_writer().await?;

        let mut link = self.link.lock().await;
        if self.state() != ConnectionState::Lost {
            // An explicit disconnect raced this reopen; back out.
            drop(link);
            if let Err(err) = transport.close().await {
                debug!(error = %err, "close failed while backing out of reopen");
            }
            return Ok(false);
        }
        self.set_current_port(Some(transport.name().to_string()));
        *link = Some(Link {
            transport,
            reader,
            writer,
        });
        self.set_state(ConnectionState::Connected);
        Ok(true)
    }

    /// Listens for attach/detach notifications from the provider. Detach of
    /// the linked port starts loss handling even with no request in flight;
    /// attach while lost short-circuits the polling delay.
    async fn run_event_loop(self: Arc<Self>) {
        let mut events = self.provider.subscribe();
        loop {
            match events.recv().await {
                Ok(PortEvent::Detached(name)) => {
                    if self.current_port().as_deref() == Some(name.as_str()) {
                        warn!(port = %name, "port detached");
                        Arc::clone(&self).handle_device_loss().await;
                    }
                }
                Ok(PortEvent::Attached(name)) => {
                    if self.state() == ConnectionState::Lost {
                        debug!(port = %name, "port attached while lost");
                        match self.try_reopen().await {
                            Ok(true) => info!(port = %name, "reconnected"),
                            Ok(false) => {}
                            Err(err) => warn!(error = %err, "reopen after attach failed"),
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "port event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
