//! Transport implementation over `tokio-serial`.

use crate::{
    PortEvent, ReadHandle, SerialConfig, Transport, TransportError, TransportProvider, WriteHandle,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};

const READ_CHUNK_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 16;

type SharedStream = Arc<Mutex<SerialStream>>;

/// A named serial device. The underlying stream is shared between the read
/// and write handles; handle re-acquisition hands out a fresh view over the
/// same open stream.
#[derive(Debug)]
pub struct SerialTransport {
    name: String,
    stream: StdMutex<Option<SharedStream>>,
}

impl SerialTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: StdMutex::new(None),
        }
    }

    fn shared_stream(&self) -> Result<SharedStream, TransportError> {
        self.stream
            .lock()
            .expect("serial transport lock poisoned")
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, config: &SerialConfig) -> Result<(), TransportError> {
        let mut slot = self.stream.lock().expect("serial transport lock poisoned");
        if slot.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let builder = tokio_serial::new(&self.name, config.baud_rate)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .parity(config.parity)
            .flow_control(config.flow_control);
        let stream = builder
            .open_native_async()
            .map_err(|err| TransportError::Open(std::io::Error::other(err)))?;

        debug!(
            port = %self.name,
            baud_rate = config.baud_rate,
            "serial port opened"
        );
        *slot = Some(Arc::new(Mutex::new(stream)));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream
            .lock()
            .expect("serial transport lock poisoned")
            .is_some()
    }

    async fn acquire_reader(&self) -> Result<Box<dyn ReadHandle>, TransportError> {
        Ok(Box::new(SerialReadHandle {
            stream: self.shared_stream()?,
        }))
    }

    async fn acquire_writer(&self) -> Result<Box<dyn WriteHandle>, TransportError> {
        Ok(Box::new(SerialWriteHandle {
            stream: self.shared_stream()?,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let taken = self
            .stream
            .lock()
            .expect("serial transport lock poisoned")
            .take();
        if taken.is_some() {
            debug!(port = %self.name, "serial port closed");
        }
        Ok(())
    }
}

struct SerialReadHandle {
    stream: SharedStream,
}

#[async_trait]
impl ReadHandle for SerialReadHandle {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = [0u8; READ_CHUNK_CAPACITY];
        let n = {
            let mut stream = self.stream.lock().await;
            stream.read(&mut buf).await.map_err(TransportError::Read)?
        };
        if n == 0 {
            return Ok(None);
        }
        trace!(len = n, "serial chunk received");
        Ok(Some(buf[..n].to_vec()))
    }

    async fn cancel(&mut self) {
        // Discard whatever the OS has buffered so a stale partial frame
        // cannot leak into the next exchange.
        let stream = self.stream.lock().await;
        if let Err(err) = stream.clear(ClearBuffer::Input) {
            warn!(error = %err, "failed to clear serial input buffer");
        }
    }

    async fn release(self: Box<Self>) {}
}

struct SerialWriteHandle {
    stream: SharedStream,
}

#[async_trait]
impl WriteHandle for SerialWriteHandle {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.stream.lock().await;
        stream
            .write_all(frame)
            .await
            .map_err(TransportError::Write)?;
        stream.flush().await.map_err(TransportError::Write)?;
        trace!(len = frame.len(), "serial frame written");
        Ok(())
    }

    async fn release(self: Box<Self>) {}
}

/// Names of the serial ports currently present on the host.
pub fn available_port_names() -> Result<Vec<String>, TransportError> {
    let ports = tokio_serial::available_ports()
        .map_err(|err| TransportError::Open(std::io::Error::other(err)))?;
    Ok(ports.into_iter().map(|info| info.port_name).collect())
}

/// Provider over the host's physical serial ports.
///
/// With a configured port name it always hands out that port; otherwise the
/// first enumerated port is used. `start_watcher` polls the port list and
/// broadcasts attach/detach events.
pub struct SerialPortProvider {
    port_name: Option<String>,
    known: StdMutex<HashMap<String, Arc<SerialTransport>>>,
    events: broadcast::Sender<PortEvent>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
}

impl SerialPortProvider {
    pub fn new(port_name: Option<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            port_name,
            known: StdMutex::new(HashMap::new()),
            events,
            watcher: StdMutex::new(None),
        }
    }

    /// Spawn the background port watcher. Native serial has no push
    /// notifications, so presence is derived by polling the port list.
    pub fn start_watcher(&self, interval: Duration) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut previous: HashSet<String> = HashSet::new();
            let mut first_pass = true;
            loop {
                tokio::time::sleep(interval).await;
                let Ok(names) = available_port_names() else {
                    continue;
                };
                let current: HashSet<String> = names.into_iter().collect();
                if !first_pass {
                    for name in current.difference(&previous) {
                        let _ = events.send(PortEvent::Attached(name.clone()));
                    }
                    for name in previous.difference(&current) {
                        let _ = events.send(PortEvent::Detached(name.clone()));
                    }
                }
                previous = current;
                first_pass = false;
            }
        });

        let mut slot = self.watcher.lock().expect("watcher lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    fn transport_for(&self, name: &str) -> Arc<SerialTransport> {
        let mut known = self.known.lock().expect("provider lock poisoned");
        Arc::clone(
            known
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(SerialTransport::new(name))),
        )
    }
}

impl Drop for SerialPortProvider {
    fn drop(&mut self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .expect("watcher lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl TransportProvider for SerialPortProvider {
    async fn request_transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let name = match &self.port_name {
            Some(name) => name.clone(),
            None => available_port_names()?
                .into_iter()
                .next()
                .ok_or(TransportError::NoPortAvailable)?,
        };
        Ok(self.transport_for(&name))
    }

    async fn known_transports(&self) -> Vec<Arc<dyn Transport>> {
        let Ok(present) = available_port_names() else {
            return Vec::new();
        };
        let present: HashSet<String> = present.into_iter().collect();
        let known = self.known.lock().expect("provider lock poisoned");
        known
            .iter()
            .filter(|(name, _)| present.contains(*name))
            .map(|(_, transport)| Arc::clone(transport) as Arc<dyn Transport>)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }
}
