//! Serialterm Core - Serial port connection management
//!
//! This crate provides:
//! - Domain types (open options, port info, session events)
//! - Device abstraction with native and mock backends
//! - Port discovery, hot-plug polling and the port registry
//! - The connection adapter bridging a device to a display sink
//! - Error types

pub const APP_VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

pub mod adapter;
pub mod device;
pub mod discovery;
pub mod display;
pub mod error;
pub mod line_buffer;
pub mod registry;
pub mod session;
pub mod streaming;
pub mod types;

// Re-export common types
pub use adapter::ConnectionAdapter;
pub use device::{ByteReader, ByteWriter, DeviceHandle, MockDevice, ReadMode, SerialDevice, SystemPort};
pub use discovery::{HotplugEvent, PortDiscovery, PortEnumerator, SystemEnumerator};
pub use display::{DisplaySink, RecordingSink};
pub use error::{CoreError, ErrorKind, Result};
pub use line_buffer::{PendingLine, LINE_TERMINATOR};
pub use registry::{PortEntry, PortRegistry};
pub use session::{EventSender, Session, SessionState};
pub use streaming::OutputStream;
pub use types::{
    CloseReason, DataBits, FlowControl, OpenOptions, Parity, PortInfo, PortKind, SessionEvent, StopBits,
    DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
};
