//! Channel-based display output with zero-copy bytes
//!
//! `OutputStream` is a `DisplaySink` backed by a bounded channel. When the
//! consumer falls behind, `write` waits for room, which in turn holds off
//! the next device read.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::display::DisplaySink;
use crate::error::{CoreError, Result};

/// Bounded channel sink for inbound chunks
pub struct OutputStream {
    tx: mpsc::Sender<Bytes>,
}

impl OutputStream {
    /// Create new stream with `capacity` chunks of buffering
    ///
    /// # Returns
    /// * `(OutputStream, mpsc::Receiver<Bytes>)` - Sink and receiver halves
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Free slots in the buffer
    #[inline]
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

#[async_trait]
impl DisplaySink for OutputStream {
    async fn write(&self, chunk: Bytes) -> Result<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| CoreError::Sink("display receiver dropped".into()))
    }
}
