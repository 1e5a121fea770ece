//! In-memory simulated slave and transport.
//!
//! Backs the master's integration tests: a `SimSlave` answers well-formed
//! request frames from its register and coil banks, with optional fault
//! injection, and a `SimTransport`/`SimProvider` pair stands in for the
//! serial layer including detach/attach events.

use crate::{
    PortEvent, ReadHandle, SerialConfig, Transport, TransportError, TransportProvider, WriteHandle,
};
use async_trait::async_trait;
use sermod_core::crc16;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Fault injected into the responses of a [`SimSlave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlaveFault {
    #[default]
    None,
    /// Swallow requests without answering.
    Silent,
    /// Answer with a data byte flipped after the CRC was computed.
    CorruptCrc,
    /// Answer every request with the given exception code.
    Exception(u8),
}

/// A scripted slave with four point banks.
#[derive(Debug, Clone)]
pub struct SimSlave {
    slave_id: u8,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    fault: SlaveFault,
}

impl SimSlave {
    pub fn new(slave_id: u8) -> Self {
        Self {
            slave_id,
            holding_registers: Vec::new(),
            input_registers: Vec::new(),
            coils: Vec::new(),
            discrete_inputs: Vec::new(),
            fault: SlaveFault::None,
        }
    }

    pub fn with_holding_registers(mut self, values: Vec<u16>) -> Self {
        self.holding_registers = values;
        self
    }

    pub fn with_input_registers(mut self, values: Vec<u16>) -> Self {
        self.input_registers = values;
        self
    }

    pub fn with_coils(mut self, values: Vec<bool>) -> Self {
        self.coils = values;
        self
    }

    pub fn with_discrete_inputs(mut self, values: Vec<bool>) -> Self {
        self.discrete_inputs = values;
        self
    }

    pub fn set_fault(&mut self, fault: SlaveFault) {
        self.fault = fault;
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) {
        if let Some(slot) = self.holding_registers.get_mut(usize::from(address)) {
            *slot = value;
        }
    }

    fn exception_frame(&self, function: u8, code: u8) -> Vec<u8> {
        let body = [self.slave_id, function | 0x80, code];
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16(&body).to_le_bytes());
        frame
    }

    fn register_frame(&self, function: u8, bank: &[u16], start: u16, quantity: u16) -> Vec<u8> {
        let start = usize::from(start);
        let end = start + usize::from(quantity);
        if quantity == 0 || end > bank.len() {
            return self.exception_frame(function, 0x02);
        }

        let mut body = vec![self.slave_id, function, (quantity * 2) as u8];
        for value in &bank[start..end] {
            body.extend_from_slice(&value.to_be_bytes());
        }
        let crc = crc16(&body);
        let mut frame = body;
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    fn bit_frame(&self, function: u8, bank: &[bool], start: u16, quantity: u16) -> Vec<u8> {
        let start = usize::from(start);
        let end = start + usize::from(quantity);
        if quantity == 0 || end > bank.len() {
            return self.exception_frame(function, 0x02);
        }

        let byte_count = usize::from(quantity).div_ceil(8);
        let mut body = vec![self.slave_id, function, byte_count as u8];
        body.resize(3 + byte_count, 0);
        for (i, value) in bank[start..end].iter().enumerate() {
            if *value {
                body[3 + i / 8] |= 1u8 << (i % 8);
            }
        }
        let crc = crc16(&body);
        let mut frame = body;
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Response frame for one request frame, `None` if the slave stays
    /// silent (wrong address, corrupt request, or injected silence).
    pub fn respond(&self, request: &[u8]) -> Option<Vec<u8>> {
        if self.fault == SlaveFault::Silent {
            return None;
        }
        if request.len() != 8 {
            return None;
        }
        let body = &request[..6];
        let received = u16::from_le_bytes([request[6], request[7]]);
        if crc16(body) != received || request[0] != self.slave_id {
            return None;
        }

        let function = request[1];
        let start = u16::from_be_bytes([request[2], request[3]]);
        let quantity = u16::from_be_bytes([request[4], request[5]]);

        if let SlaveFault::Exception(code) = self.fault {
            return Some(self.exception_frame(function, code));
        }

        let mut frame = match function {
            0x01 => self.bit_frame(function, &self.coils, start, quantity),
            0x02 => self.bit_frame(function, &self.discrete_inputs, start, quantity),
            0x03 => self.register_frame(function, &self.holding_registers, start, quantity),
            0x04 => self.register_frame(function, &self.input_registers, start, quantity),
            _ => self.exception_frame(function, 0x01),
        };

        if self.fault == SlaveFault::CorruptCrc && frame.len() > 5 {
            frame[3] ^= 0xFF;
        }
        Some(frame)
    }
}

#[derive(Debug, Default)]
struct SimCounters {
    readers_acquired: AtomicUsize,
    readers_cancelled: AtomicUsize,
    readers_released: AtomicUsize,
    writers_released: AtomicUsize,
}

struct SimShared {
    name: String,
    slave: StdMutex<SimSlave>,
    open: AtomicBool,
    attached: AtomicBool,
    /// 0 delivers each response as a single chunk.
    chunk_size: AtomicUsize,
    reader_tx: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    counters: SimCounters,
}

impl SimShared {
    fn drop_reader_sink(&self) {
        self.reader_tx
            .lock()
            .expect("sim reader lock poisoned")
            .take();
    }

    fn deliver(&self, frame: Vec<u8>) {
        let sink = self
            .reader_tx
            .lock()
            .expect("sim reader lock poisoned")
            .clone();
        let Some(tx) = sink else {
            return;
        };

        let chunk_size = self.chunk_size.load(Ordering::Relaxed);
        if chunk_size == 0 {
            let _ = tx.send(frame);
            return;
        }
        for chunk in frame.chunks(chunk_size) {
            let _ = tx.send(chunk.to_vec());
        }
    }
}

/// Simulated serial device wired to a [`SimSlave`].
pub struct SimTransport {
    shared: Arc<SimShared>,
}

impl SimTransport {
    pub fn new(name: impl Into<String>, slave: SimSlave) -> Self {
        Self {
            shared: Arc::new(SimShared {
                name: name.into(),
                slave: StdMutex::new(slave),
                open: AtomicBool::new(false),
                attached: AtomicBool::new(true),
                chunk_size: AtomicUsize::new(0),
                reader_tx: StdMutex::new(None),
                counters: SimCounters::default(),
            }),
        }
    }

    /// Mutate the slave behind the transport (set points, inject faults).
    pub fn with_slave<R>(&self, f: impl FnOnce(&mut SimSlave) -> R) -> R {
        let mut slave = self.shared.slave.lock().expect("sim slave lock poisoned");
        f(&mut slave)
    }

    /// Deliver responses in chunks of at most `size` bytes.
    pub fn set_chunk_size(&self, size: usize) {
        self.shared.chunk_size.store(size, Ordering::Relaxed);
    }

    pub fn reader_acquire_count(&self) -> usize {
        self.shared.counters.readers_acquired.load(Ordering::Relaxed)
    }

    pub fn reader_cancel_count(&self) -> usize {
        self.shared.counters.readers_cancelled.load(Ordering::Relaxed)
    }

    pub fn reader_release_count(&self) -> usize {
        self.shared.counters.readers_released.load(Ordering::Relaxed)
    }

    pub fn writer_release_count(&self) -> usize {
        self.shared.counters.writers_released.load(Ordering::Relaxed)
    }

    fn force_detach(&self) {
        self.shared.attached.store(false, Ordering::Relaxed);
        self.shared.open.store(false, Ordering::Relaxed);
        // Dropping the sender ends the stream seen by any pending read.
        self.shared.drop_reader_sink();
    }

    fn reattach(&self) {
        self.shared.attached.store(true, Ordering::Relaxed);
    }

    fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn open(&self, _config: &SerialConfig) -> Result<(), TransportError> {
        if !self.is_attached() {
            return Err(TransportError::Open(std::io::Error::other(
                "device detached",
            )));
        }
        if self.shared.open.swap(true, Ordering::Relaxed) {
            return Err(TransportError::AlreadyOpen);
        }
        trace!(port = %self.shared.name, "sim transport opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Relaxed)
    }

    async fn acquire_reader(&self) -> Result<Box<dyn ReadHandle>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .shared
            .reader_tx
            .lock()
            .expect("sim reader lock poisoned") = Some(tx);
        self.shared
            .counters
            .readers_acquired
            .fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SimReadHandle {
            rx,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn acquire_writer(&self) -> Result<Box<dyn WriteHandle>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        Ok(Box::new(SimWriteHandle {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.open.store(false, Ordering::Relaxed);
        self.shared.drop_reader_sink();
        trace!(port = %self.shared.name, "sim transport closed");
        Ok(())
    }
}

struct SimReadHandle {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<SimShared>,
}

#[async_trait]
impl ReadHandle for SimReadHandle {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn cancel(&mut self) {
        self.shared
            .counters
            .readers_cancelled
            .fetch_add(1, Ordering::Relaxed);
        while self.rx.try_recv().is_ok() {}
    }

    async fn release(self: Box<Self>) {
        self.shared
            .counters
            .readers_released
            .fetch_add(1, Ordering::Relaxed);
    }
}

struct SimWriteHandle {
    shared: Arc<SimShared>,
}

#[async_trait]
impl WriteHandle for SimWriteHandle {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.shared.attached.load(Ordering::Relaxed) {
            return Err(TransportError::Write(std::io::Error::other(
                "device detached",
            )));
        }

        let response = {
            let slave = self.shared.slave.lock().expect("sim slave lock poisoned");
            slave.respond(frame)
        };
        if let Some(response) = response {
            self.shared.deliver(response);
        }
        Ok(())
    }

    async fn release(self: Box<Self>) {
        self.shared
            .counters
            .writers_released
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Provider over a single simulated device that can be detached and
/// re-attached from tests.
pub struct SimProvider {
    transport: Arc<SimTransport>,
    events: broadcast::Sender<PortEvent>,
}

impl SimProvider {
    pub fn new(slave: SimSlave) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport: Arc::new(SimTransport::new("sim0", slave)),
            events,
        }
    }

    pub fn transport(&self) -> Arc<SimTransport> {
        Arc::clone(&self.transport)
    }

    /// Simulate the device being unplugged.
    pub fn detach(&self) {
        self.transport.force_detach();
        let _ = self
            .events
            .send(PortEvent::Detached(self.transport.name().to_owned()));
    }

    /// Simulate the device being plugged back in.
    pub fn attach(&self) {
        self.transport.reattach();
        let _ = self
            .events
            .send(PortEvent::Attached(self.transport.name().to_owned()));
    }
}

#[async_trait]
impl TransportProvider for SimProvider {
    async fn request_transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        if !self.transport.is_attached() {
            return Err(TransportError::NoPortAvailable);
        }
        Ok(self.transport() as Arc<dyn Transport>)
    }

    async fn known_transports(&self) -> Vec<Arc<dyn Transport>> {
        if self.transport.is_attached() {
            vec![self.transport() as Arc<dyn Transport>]
        } else {
            Vec::new()
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }
}
