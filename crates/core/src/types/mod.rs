//! Domain types for serial sessions

mod event;
mod options;
mod port;

pub use event::{CloseReason, SessionEvent};
pub use options::{
    DataBits, FlowControl, OpenOptions, Parity, StopBits, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE,
};
pub use port::{PortInfo, PortKind};
