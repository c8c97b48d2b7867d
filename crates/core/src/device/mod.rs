//! Serial device backends

mod mock;
mod system;
mod traits;

pub use mock::MockDevice;
pub use system::SystemPort;
pub use traits::{ByteReader, ByteWriter, DeviceHandle, ReadMode, SerialDevice};
