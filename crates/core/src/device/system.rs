//! Native serial ports backed by the `serialport` crate
//!
//! `serialport` I/O is blocking, so reads run on a `spawn_blocking` thread
//! that forwards chunks over a bounded channel, and writes hop onto the
//! blocking pool one call at a time.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use super::traits::{ByteReader, ByteWriter, SerialDevice};
use crate::error::{CoreError, Result};
use crate::types::{DataBits, FlowControl, OpenOptions, Parity, PortInfo, StopBits};

/// How long a blocking read waits before re-checking for shutdown
const READ_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Chunks buffered between the reader thread and the session pump
const CHUNK_CHANNEL_CAPACITY: usize = 64;

type PortBox = Box<dyn serialport::SerialPort>;
type SharedPort = Arc<std::sync::Mutex<Option<PortBox>>>;

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Readable side of an open port
struct Inbound {
    rx: Option<mpsc::Receiver<io::Result<Bytes>>>,
    ended: bool,
}

struct ReaderTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial port on this machine
pub struct SystemPort {
    info: PortInfo,
    port: SharedPort,
    inbound: Arc<Mutex<Inbound>>,
    reader_task: Mutex<Option<ReaderTask>>,
    write_lock: Arc<Mutex<()>>,
    /// Set by `close` so a writer stuck retrying gives up the port
    write_stop: Arc<AtomicBool>,
}

impl SystemPort {
    pub fn new(info: PortInfo) -> Self {
        Self {
            info,
            port: Arc::new(std::sync::Mutex::new(None)),
            inbound: Arc::new(Mutex::new(Inbound {
                rx: None,
                ended: true,
            })),
            reader_task: Mutex::new(None),
            write_lock: Arc::new(Mutex::new(())),
            write_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_open(&self) -> Result<bool> {
        let guard = self
            .port
            .lock()
            .map_err(|e| CoreError::InvalidState(format!("port mutex poisoned: {}", e)))?;
        Ok(guard.is_some())
    }

    fn open_error(&self, reason: impl ToString) -> CoreError {
        CoreError::Open {
            port: self.info.path.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Pump bytes from the blocking port into the chunk channel until told to
/// stop, the receiver goes away, or the port fails.
fn spawn_reader(
    path: String,
    mut port: PortBox,
    buffer_size: usize,
    tx: mpsc::Sender<io::Result<Bytes>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; buffer_size];

        while !stop.load(Ordering::Relaxed) {
            match port.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!("Serial reader EOF on {}", path);
                    break;
                }
                Ok(n) => {
                    if tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                    tracing::trace!("Read {} bytes from {}", n, path);
                }
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    tracing::error!("Serial read error on {}: {}", path, e);
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }

        tracing::debug!("Serial reader for {} exited", path);
    })
}

#[async_trait]
impl SerialDevice for SystemPort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&self, options: &OpenOptions) -> Result<()> {
        options.validate()?;
        if self.is_open().map_err(|e| self.open_error(e))? {
            return Err(self.open_error("port is already open"));
        }

        let builder = serialport::new(self.info.path.as_str(), options.baud_rate)
            .data_bits(options.data_bits.into())
            .parity(options.parity.into())
            .stop_bits(options.stop_bits.into())
            .flow_control(options.flow_control.into())
            .timeout(READ_POLL_INTERVAL);

        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| self.open_error(e))?
            .map_err(|e| self.open_error(e))?;
        let reader_port = port.try_clone().map_err(|e| self.open_error(e))?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_reader(
            self.info.path.clone(),
            reader_port,
            options.buffer_size,
            tx,
            stop.clone(),
        );

        {
            let mut guard = self.port.lock().map_err(|e| self.open_error(e))?;
            *guard = Some(port);
        }
        self.write_stop.store(false, Ordering::Relaxed);
        *self.inbound.lock().await = Inbound {
            rx: Some(rx),
            ended: false,
        };
        *self.reader_task.lock().await = Some(ReaderTask { stop, handle });

        tracing::info!("Opened {} at {}", self.info.path, options);
        Ok(())
    }

    async fn acquire_reader(&self) -> Result<Box<dyn ByteReader>> {
        let inbound = self
            .inbound
            .clone()
            .try_lock_owned()
            .map_err(|_| CoreError::ReaderLocked)?;
        if inbound.ended || inbound.rx.is_none() {
            return Err(CoreError::StreamEnded);
        }
        Ok(Box::new(SystemReader { inbound }))
    }

    async fn acquire_writer(&self) -> Result<Box<dyn ByteWriter>> {
        if !self.is_open().map_err(|e| CoreError::Write(e.to_string()))? {
            return Err(CoreError::Write("port is not writable".into()));
        }
        let lock = self
            .write_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| CoreError::WriterLocked)?;
        Ok(Box::new(SystemWriter {
            _lock: lock,
            port: self.port.clone(),
            stop: self.write_stop.clone(),
        }))
    }

    /// Stop the reader thread and release the port.
    ///
    /// Any reader handed out by `acquire_reader` must be dropped first.
    async fn close(&self) -> Result<()> {
        self.write_stop.store(true, Ordering::Relaxed);
        let port = self
            .port
            .lock()
            .map_err(|e| CoreError::Close(format!("port mutex poisoned: {}", e)))?
            .take();
        let Some(port) = port else {
            return Err(CoreError::Close("port is not open".into()));
        };

        let task = self.reader_task.lock().await.take();
        if let Some(task) = &task {
            task.stop.store(true, Ordering::Relaxed);
        }
        {
            let mut inbound = self.inbound.lock().await;
            inbound.rx = None;
            inbound.ended = true;
        }
        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                tracing::warn!("Serial reader for {} panicked: {}", self.info.path, e);
            }
        }

        drop(port);
        tracing::info!("Closed {}", self.info.path);
        Ok(())
    }
}

impl Drop for SystemPort {
    fn drop(&mut self) {
        self.write_stop.store(true, Ordering::Relaxed);
        if let Ok(guard) = self.reader_task.try_lock() {
            if let Some(task) = guard.as_ref() {
                task.stop.store(true, Ordering::Relaxed);
            }
        }
    }
}

struct SystemReader {
    inbound: OwnedMutexGuard<Inbound>,
}

#[async_trait]
impl ByteReader for SystemReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        let Some(rx) = self.inbound.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(CoreError::Read(e.to_string())),
            None => {
                self.inbound.ended = true;
                Ok(None)
            }
        }
    }
}

struct SystemWriter {
    _lock: OwnedMutexGuard<()>,
    port: SharedPort,
    stop: Arc<AtomicBool>,
}

#[async_trait]
impl ByteWriter for SystemWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.clone();
        let stop = self.stop.clone();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|e| CoreError::Write(format!("port mutex poisoned: {}", e)))?;
            let port = guard
                .as_mut()
                .ok_or_else(|| CoreError::Write("port is closed".into()))?;

            // The port timeout only bounds each attempt; keep going until the
            // device has taken everything or the port is being closed.
            let mut remaining = &data[..];
            while !remaining.is_empty() {
                if stop.load(Ordering::Relaxed) {
                    return Err(CoreError::Write(format!(
                        "port closed with {} bytes unsent",
                        remaining.len()
                    )));
                }
                match port.write(remaining) {
                    Ok(0) => return Err(CoreError::Write("device accepted no bytes".into())),
                    Ok(n) => remaining = &remaining[n..],
                    Err(e) if is_transient(&e) => continue,
                    Err(e) => return Err(CoreError::Write(e.to_string())),
                }
            }
            port.flush().map_err(|e| CoreError::Write(e.to_string()))
        })
        .await
        .map_err(|e| CoreError::Write(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_conversions() {
        assert_eq!(
            serialport::DataBits::from(DataBits::Seven),
            serialport::DataBits::Seven
        );
        assert_eq!(
            serialport::StopBits::from(StopBits::Two),
            serialport::StopBits::Two
        );
        assert_eq!(serialport::Parity::from(Parity::Odd), serialport::Parity::Odd);
        assert_eq!(
            serialport::FlowControl::from(FlowControl::Hardware),
            serialport::FlowControl::Hardware
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[tokio::test]
    async fn test_closed_port_refuses_io() {
        let port = SystemPort::new(PortInfo::new("/dev/does-not-exist", crate::types::PortKind::Unknown));
        assert!(matches!(
            port.acquire_reader().await,
            Err(CoreError::StreamEnded)
        ));
        assert!(matches!(
            port.acquire_writer().await,
            Err(CoreError::Write(_))
        ));
        assert!(matches!(port.close().await, Err(CoreError::Close(_))));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let port = SystemPort::new(PortInfo::new("/dev/does-not-exist", crate::types::PortKind::Unknown));
        let err = port.open(&OpenOptions::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Open { .. }));
    }
}
