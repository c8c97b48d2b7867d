//! Serial device abstraction
//!
//! A device hands out at most one reader and one writer at a time. Dropping
//! a reader or writer releases its lock.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{OpenOptions, PortInfo};

/// How a reader hands out inbound bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Fills a caller-owned buffer, which is reused between reads
    Buffered,
    /// Allocates a fresh chunk per read
    Default,
}

/// Exclusive reader over a device's readable stream
#[async_trait]
pub trait ByteReader: Send {
    /// Read mode this reader supports natively
    fn mode(&self) -> ReadMode {
        ReadMode::Default
    }

    /// Read the next chunk. `Ok(None)` means this reader is done.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Append at most `max` bytes of the next chunk to `buf`.
    /// Returns the number of bytes appended, or `Ok(None)` when done.
    ///
    /// The fallback for `ReadMode::Default` readers has nowhere to keep a
    /// tail, so it appends whole chunks and ignores `max`.
    async fn read_into(&mut self, buf: &mut BytesMut, _max: usize) -> Result<Option<usize>> {
        match self.read().await? {
            Some(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(Some(chunk.len()))
            }
            None => Ok(None),
        }
    }
}

/// Exclusive writer over a device's writable stream
#[async_trait]
pub trait ByteWriter: Send {
    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<()>;
}

/// A physical or virtual serial endpoint
#[async_trait]
pub trait SerialDevice: Send + Sync + 'static {
    /// Display metadata
    fn info(&self) -> PortInfo;

    /// Open with the given line parameters
    async fn open(&self, options: &OpenOptions) -> Result<()>;

    /// Lock the readable stream.
    ///
    /// Fails with `StreamEnded` when the device is not open or its readable
    /// side has ended for good, and with `ReaderLocked` while another reader
    /// is alive.
    async fn acquire_reader(&self) -> Result<Box<dyn ByteReader>>;

    /// Lock the writable stream for a single write
    async fn acquire_writer(&self) -> Result<Box<dyn ByteWriter>>;

    /// Close the device
    async fn close(&self) -> Result<()>;
}

/// Shared reference to a serial device
///
/// Equality and hashing use pointer identity: two handles are the same
/// device only if they were cloned from the same handle.
#[derive(Clone)]
pub struct DeviceHandle(Arc<dyn SerialDevice>);

impl DeviceHandle {
    pub fn new<D: SerialDevice>(device: D) -> Self {
        Self(Arc::new(device))
    }

    pub fn from_arc(device: Arc<dyn SerialDevice>) -> Self {
        Self(device)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl Deref for DeviceHandle {
    type Target = dyn SerialDevice;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for DeviceHandle {}

impl Hash for DeviceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.0.info().path)
            .field("addr", &self.addr())
            .finish()
    }
}
