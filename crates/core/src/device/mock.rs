//! In-memory serial device
//!
//! Scriptable stand-in for real hardware: inject inbound chunks, read
//! errors and end-of-stream, make open/close/write fail, and inspect what
//! was written. In loopback mode every write is fed back as inbound data.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::traits::{ByteReader, ByteWriter, ReadMode, SerialDevice};
use crate::error::{CoreError, Result};
use crate::types::{OpenOptions, PortInfo};

enum Inbound {
    Data(Bytes),
    Error(String),
    End,
}

struct InboundStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
    /// Tail of a chunk that did not fit the caller's buffer
    leftover: Option<Bytes>,
    ended: bool,
}

#[derive(Default)]
struct MockState {
    open: bool,
    options: Option<OpenOptions>,
    open_failure: Option<String>,
    close_failure: Option<String>,
    write_failure: Option<String>,
    stall_writes: bool,
    stalled_writes: usize,
    writes: Vec<Bytes>,
    open_count: usize,
    close_count: usize,
}

/// Mock serial device for tests and loopback sessions
pub struct MockDevice {
    info: PortInfo,
    mode: ReadMode,
    loopback: bool,
    state: Arc<Mutex<MockState>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    stream: Arc<Mutex<InboundStream>>,
    write_lock: Arc<Mutex<()>>,
}

impl MockDevice {
    /// Create new mock device. Reads default to buffered mode.
    pub fn new(name: impl Into<String>) -> Self {
        let (inbound_tx, rx) = mpsc::unbounded_channel();
        Self {
            info: PortInfo::virtual_port(name),
            mode: ReadMode::Buffered,
            loopback: false,
            state: Arc::new(Mutex::new(MockState::default())),
            inbound_tx,
            stream: Arc::new(Mutex::new(InboundStream {
                rx,
                leftover: None,
                ended: false,
            })),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Select the read mode readers report
    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Echo every write back as inbound data
    pub fn with_loopback(mut self, enabled: bool) -> Self {
        self.loopback = enabled;
        self
    }

    /// Queue inbound bytes (simulate data from the device)
    pub fn inject_rx(&self, data: &[u8]) {
        let _ = self
            .inbound_tx
            .send(Inbound::Data(Bytes::copy_from_slice(data)));
    }

    /// Queue a transient read failure
    pub fn inject_read_error(&self, message: impl Into<String>) {
        let _ = self.inbound_tx.send(Inbound::Error(message.into()));
    }

    /// Queue a permanent end of the readable stream
    pub fn end_stream(&self) {
        let _ = self.inbound_tx.send(Inbound::End);
    }

    /// Make the next `open` fail
    pub async fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.lock().await.open_failure = Some(reason.into());
    }

    /// Make the next `close` fail (the device still ends up closed)
    pub async fn fail_next_close(&self, reason: impl Into<String>) {
        self.state.lock().await.close_failure = Some(reason.into());
    }

    /// Make every write fail until cleared with `None`
    pub async fn set_write_failure(&self, reason: Option<String>) {
        self.state.lock().await.write_failure = reason;
    }

    /// Writes seen so far, one entry per write call
    pub async fn writes(&self) -> Vec<Bytes> {
        self.state.lock().await.writes.clone()
    }

    /// Make writes hang forever, like a port held off by flow control
    pub async fn set_write_stall(&self, enabled: bool) {
        self.state.lock().await.stall_writes = enabled;
    }

    /// Writes that have hung because of `set_write_stall`
    pub async fn stalled_writes(&self) -> usize {
        self.state.lock().await.stalled_writes
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Options of the most recent successful open
    pub async fn last_options(&self) -> Option<OpenOptions> {
        self.state.lock().await.options.clone()
    }

    pub async fn open_count(&self) -> usize {
        self.state.lock().await.open_count
    }

    pub async fn close_count(&self) -> usize {
        self.state.lock().await.close_count
    }
}

#[async_trait]
impl SerialDevice for MockDevice {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&self, options: &OpenOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.open {
            return Err(CoreError::Open {
                port: self.info.path.clone(),
                reason: "port is already open".into(),
            });
        }
        if let Some(reason) = state.open_failure.take() {
            return Err(CoreError::Open {
                port: self.info.path.clone(),
                reason,
            });
        }
        options.validate()?;

        state.open = true;
        state.options = Some(options.clone());
        state.open_count += 1;
        drop(state);

        self.stream.lock().await.ended = false;
        Ok(())
    }

    async fn acquire_reader(&self) -> Result<Box<dyn ByteReader>> {
        if !self.state.lock().await.open {
            return Err(CoreError::StreamEnded);
        }
        let stream = self
            .stream
            .clone()
            .try_lock_owned()
            .map_err(|_| CoreError::ReaderLocked)?;
        if stream.ended {
            return Err(CoreError::StreamEnded);
        }
        Ok(Box::new(MockReader {
            stream,
            mode: self.mode,
        }))
    }

    async fn acquire_writer(&self) -> Result<Box<dyn ByteWriter>> {
        if !self.state.lock().await.open {
            return Err(CoreError::Write("port is not writable".into()));
        }
        let lock = self
            .write_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| CoreError::WriterLocked)?;
        Ok(Box::new(MockWriter {
            _lock: lock,
            state: self.state.clone(),
            inbound_tx: self.inbound_tx.clone(),
            loopback: self.loopback,
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.open {
            return Err(CoreError::Close("port is not open".into()));
        }
        state.open = false;
        state.close_count += 1;
        match state.close_failure.take() {
            Some(reason) => Err(CoreError::Close(reason)),
            None => Ok(()),
        }
    }
}

struct MockReader {
    stream: OwnedMutexGuard<InboundStream>,
    mode: ReadMode,
}

#[async_trait]
impl ByteReader for MockReader {
    fn mode(&self) -> ReadMode {
        self.mode
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.stream.leftover.take() {
            return Ok(Some(chunk));
        }
        match self.stream.rx.recv().await {
            Some(Inbound::Data(chunk)) => Ok(Some(chunk)),
            Some(Inbound::Error(message)) => Err(CoreError::Read(message)),
            Some(Inbound::End) | None => {
                self.stream.ended = true;
                Ok(None)
            }
        }
    }

    async fn read_into(&mut self, buf: &mut BytesMut, max: usize) -> Result<Option<usize>> {
        let Some(mut chunk) = self.read().await? else {
            return Ok(None);
        };
        if chunk.len() > max {
            self.stream.leftover = Some(chunk.split_off(max));
        }
        buf.extend_from_slice(&chunk);
        Ok(Some(chunk.len()))
    }
}

struct MockWriter {
    _lock: OwnedMutexGuard<()>,
    state: Arc<Mutex<MockState>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    loopback: bool,
}

#[async_trait]
impl ByteWriter for MockWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.open {
            return Err(CoreError::Write("port is closed".into()));
        }
        if let Some(reason) = &state.write_failure {
            return Err(CoreError::Write(reason.clone()));
        }
        if state.stall_writes {
            state.stalled_writes += 1;
            drop(state);
            return std::future::pending().await;
        }
        let chunk = Bytes::copy_from_slice(data);
        state.writes.push(chunk.clone());
        if self.loopback {
            let _ = self.inbound_tx.send(Inbound::Data(chunk));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let device = MockDevice::new("mock0");
        assert!(!device.is_open().await);

        device.open(&OpenOptions::default()).await.unwrap();
        assert!(device.is_open().await);
        assert!(device.open(&OpenOptions::default()).await.is_err());

        device.close().await.unwrap();
        assert!(!device.is_open().await);
        assert!(device.close().await.is_err());
        assert_eq!(device.close_count().await, 1);
    }

    #[tokio::test]
    async fn test_open_failure_is_one_shot() {
        let device = MockDevice::new("mock0");
        device.fail_next_open("Access denied").await;

        let err = device.open(&OpenOptions::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::Open { .. }));
        assert!(!device.is_open().await);

        device.open(&OpenOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_reader_at_a_time() {
        let device = MockDevice::new("mock0");
        device.open(&OpenOptions::default()).await.unwrap();

        let reader = device.acquire_reader().await.unwrap();
        assert!(matches!(
            device.acquire_reader().await,
            Err(CoreError::ReaderLocked)
        ));

        drop(reader);
        assert!(device.acquire_reader().await.is_ok());
    }

    #[tokio::test]
    async fn test_reader_requires_open_device() {
        let device = MockDevice::new("mock0");
        assert!(matches!(
            device.acquire_reader().await,
            Err(CoreError::StreamEnded)
        ));
    }

    #[tokio::test]
    async fn test_buffered_read_respects_limit() {
        let device = MockDevice::new("mock0");
        device.open(&OpenOptions::default()).await.unwrap();
        device.inject_rx(b"abcdef");

        let mut reader = device.acquire_reader().await.unwrap();
        assert_eq!(reader.mode(), ReadMode::Buffered);

        // Capacity beyond the limit must not be used
        let mut buf = BytesMut::with_capacity(64);
        assert_eq!(reader.read_into(&mut buf, 4).await.unwrap(), Some(4));
        assert_eq!(&buf[..], b"abcd");
        assert_eq!(reader.read_into(&mut buf, 4).await.unwrap(), Some(2));
        assert_eq!(&buf[..], b"abcdef");
    }

    #[tokio::test]
    async fn test_end_stream_is_permanent() {
        let device = MockDevice::new("mock0");
        device.open(&OpenOptions::default()).await.unwrap();
        device.end_stream();

        let mut reader = device.acquire_reader().await.unwrap();
        assert_eq!(reader.read().await.unwrap(), None);
        drop(reader);

        assert!(matches!(
            device.acquire_reader().await,
            Err(CoreError::StreamEnded)
        ));
    }

    #[tokio::test]
    async fn test_read_error_then_data() {
        let device = MockDevice::new("mock0");
        device.open(&OpenOptions::default()).await.unwrap();
        device.inject_read_error("parity error");
        device.inject_rx(b"ok");

        let mut reader = device.acquire_reader().await.unwrap();
        assert!(matches!(reader.read().await, Err(CoreError::Read(_))));
        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_loopback_echoes_writes() {
        let device = MockDevice::new("mock0").with_loopback(true);
        device.open(&OpenOptions::default()).await.unwrap();

        let mut writer = device.acquire_writer().await.unwrap();
        writer.write(b"ping").await.unwrap();
        drop(writer);

        let mut reader = device.acquire_reader().await.unwrap();
        assert_eq!(reader.read().await.unwrap().unwrap(), Bytes::from_static(b"ping"));
        assert_eq!(device.writes().await, vec![Bytes::from_static(b"ping")]);
    }

    #[tokio::test]
    async fn test_writer_fails_when_closed() {
        let device = MockDevice::new("mock0");
        assert!(matches!(
            device.acquire_writer().await,
            Err(CoreError::Write(_))
        ));
    }
}
