//! Display sink abstraction

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};

/// Where inbound bytes are rendered
///
/// The session pump awaits every `write` before reading the next chunk, so
/// a slow sink slows the device reads. Never call `disconnect()` on the
/// owning session from inside `write`: teardown waits for the pump, which
/// is waiting for you.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Render one non-empty chunk
    async fn write(&self, chunk: Bytes) -> Result<()>;
}

/// Sink that keeps every chunk, for tests and capture
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Bytes>>,
    failure: Mutex<Option<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks in arrival order
    pub async fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().await.clone()
    }

    /// Everything received, concatenated
    pub async fn contents(&self) -> Bytes {
        let chunks = self.chunks.lock().await;
        let mut all = BytesMut::new();
        for chunk in chunks.iter() {
            all.extend_from_slice(chunk);
        }
        all.freeze()
    }

    /// Make every write fail until cleared with `None`
    pub async fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock().await = reason;
    }
}

#[async_trait]
impl DisplaySink for RecordingSink {
    async fn write(&self, chunk: Bytes) -> Result<()> {
        if let Some(reason) = self.failure.lock().await.as_ref() {
            return Err(CoreError::Sink(reason.clone()));
        }
        self.chunks.lock().await.push(chunk);
        Ok(())
    }
}
