//! Display side of a session

mod traits;

pub use traits::{DisplaySink, RecordingSink};
