//! A live connection to one serial device
//!
//! The session owns the inbound pump task and serializes outbound writes.
//! Lifecycle events go out on the event channel; inbound bytes go to the
//! display sink.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::device::{ByteReader, DeviceHandle, ReadMode};
use crate::display::DisplaySink;
use crate::error::{CoreError, ErrorKind, Result};
use crate::line_buffer::PendingLine;
use crate::types::{CloseReason, OpenOptions, SessionEvent};

/// Sending half of the session event channel
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

struct Shared {
    device: DeviceHandle,
    options: OpenOptions,
    sink: Arc<dyn DisplaySink>,
    events: EventSender,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    /// Held by the pump for as long as it holds a device reader
    read_lock: Mutex<()>,
    /// Held around every device write; guards the pending line too
    write_lock: Mutex<PendingLine>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn report(&self, err: &CoreError, disconnect: bool) {
        match err.kind() {
            ErrorKind::Write => tracing::warn!("{}: {}", self.device.info().path, err),
            _ => tracing::error!("{}: {}", self.device.info().path, err),
        }
        self.emit(SessionEvent::error(err, disconnect));
    }

    /// Move Open to Closing. Only the caller that wins this transition may
    /// run the teardown.
    fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Open {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        })
    }

    async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Stop the pump and any write in flight, close the device
    /// and announce `Closed`. Caller must have won `begin_closing`.
    async fn teardown(&self, reason: CloseReason) {
        self.cancel.cancel();

        let _read = self.read_lock.lock().await;
        let mut pending = self.write_lock.lock().await;
        pending.clear();

        if let Err(e) = self.device.close().await {
            self.report(&e, false);
        }

        self.state.send_replace(SessionState::Closed);
        tracing::info!("Closed {} ({:?})", self.device.info().path, reason);
        self.emit(SessionEvent::closed(reason));
    }
}

/// Handle to a live session. Clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Shared>,
}

impl Session {
    /// Open `device` and start pumping inbound bytes into `sink`.
    ///
    /// Emits `Connected` on success. On failure emits
    /// `Error { disconnect: true }` and returns the error; no `Closed`
    /// follows.
    pub(crate) async fn open(
        device: DeviceHandle,
        options: OpenOptions,
        sink: Arc<dyn DisplaySink>,
        events: EventSender,
    ) -> Result<Self> {
        let (state, _) = watch::channel(SessionState::Opening);
        let inner = Arc::new(Shared {
            device,
            options,
            sink,
            events,
            state,
            cancel: CancellationToken::new(),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(PendingLine::new()),
        });

        let path = inner.device.info().path;
        tracing::info!("Opening {} at {}", path, inner.options);

        if let Err(e) = inner.device.open(&inner.options).await {
            inner.state.send_replace(SessionState::Closed);
            inner.report(&e, true);
            return Err(e);
        }

        inner.state.send_replace(SessionState::Open);
        inner.emit(SessionEvent::connected(path));
        tokio::spawn(run_pump(inner.clone()));

        Ok(Self { inner })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.inner.device
    }

    pub fn options(&self) -> &OpenOptions {
        &self.inner.options
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Resolve once the session is Closed
    pub async fn closed(&self) {
        self.inner.wait_closed().await
    }

    /// Send bytes to the device.
    ///
    /// Without `flush_on_enter` the bytes are written right away. With it,
    /// they are held until `data` is exactly `\r`, then the whole line goes
    /// out in one write. Failures, including sending on a session that is
    /// not open, are reported as `Error { kind: Write }` and the bytes are
    /// dropped. A write still in flight when the session starts closing is
    /// abandoned.
    pub async fn send(&self, data: &[u8], flush_on_enter: bool) {
        let mut pending = self.inner.write_lock.lock().await;

        if self.inner.state() != SessionState::Open {
            self.inner
                .report(&CoreError::Write("port is not writable".into()), false);
            return;
        }

        let payload = if flush_on_enter {
            match pending.push(data) {
                Some(line) => line,
                None => return,
            }
        } else {
            Bytes::copy_from_slice(data)
        };
        if payload.is_empty() {
            return;
        }

        let write = async {
            let mut writer = self.inner.device.acquire_writer().await?;
            writer.write(&payload).await
        };
        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => {
                tracing::debug!("Dropped {} unsent bytes, session closing", payload.len());
                return;
            }
            result = write => result,
        };

        match result {
            Ok(()) => tracing::trace!("Wrote {} bytes", payload.len()),
            Err(e) => self.inner.report(&e, false),
        }
    }

    /// Tear the session down.
    ///
    /// Idempotent: `Closed` is emitted once no matter how many callers race
    /// here, and every caller returns only after the session is Closed.
    /// Must not be awaited from inside the display sink.
    pub async fn disconnect(&self) {
        if self.inner.begin_closing() {
            self.inner.teardown(CloseReason::Requested).await;
        } else {
            self.inner.wait_closed().await;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.inner.device)
            .field("state", &self.state())
            .finish()
    }
}

/// How one reader's read loop ended
enum ReaderExit {
    Cancelled,
    /// The reader finished or failed; try a fresh one
    Released,
    StreamEnded,
}

/// Inbound pump: one reader at a time, each chunk awaited through the sink
/// before the next read.
async fn run_pump(inner: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(inner.options.buffer_size);

    loop {
        let guard = inner.read_lock.lock().await;
        if inner.cancel.is_cancelled() {
            return;
        }

        let exit = match inner.device.acquire_reader().await {
            Ok(mut reader) => read_chunks(&inner, reader.as_mut(), &mut buf).await,
            Err(e) if e.is_stream_end() => ReaderExit::StreamEnded,
            Err(e) => {
                // Without a reader there is nothing left to pump
                inner.report(&e, false);
                ReaderExit::StreamEnded
            }
        };
        drop(guard);

        match exit {
            ReaderExit::Cancelled => return,
            ReaderExit::Released => tokio::task::yield_now().await,
            ReaderExit::StreamEnded => {
                if inner.begin_closing() {
                    tracing::info!("Stream ended on {}", inner.device.info().path);
                    inner.teardown(CloseReason::StreamEnded).await;
                }
                return;
            }
        }
    }
}

async fn read_chunks(inner: &Shared, reader: &mut dyn ByteReader, buf: &mut BytesMut) -> ReaderExit {
    let mode = reader.mode();
    tracing::debug!("Acquired {:?} reader on {}", mode, inner.device.info().path);

    loop {
        let read = async {
            match mode {
                ReadMode::Buffered => {
                    let max = inner.options.buffer_size;
                    buf.reserve(max);
                    match reader.read_into(buf, max).await? {
                        Some(_) => Ok(Some(buf.split().freeze())),
                        None => Ok(None),
                    }
                }
                ReadMode::Default => reader.read().await,
            }
        };

        let result = tokio::select! {
            _ = inner.cancel.cancelled() => return ReaderExit::Cancelled,
            result = read => result,
        };

        match result {
            Ok(Some(chunk)) if chunk.is_empty() => continue,
            Ok(Some(chunk)) => {
                tracing::trace!("Read {} bytes", chunk.len());
                let delivered = tokio::select! {
                    _ = inner.cancel.cancelled() => return ReaderExit::Cancelled,
                    delivered = inner.sink.write(chunk) => delivered,
                };
                if let Err(e) = delivered {
                    inner.report(&e, false);
                }
            }
            Ok(None) => return ReaderExit::Released,
            Err(e) if e.is_stream_end() => return ReaderExit::StreamEnded,
            Err(e) => {
                inner.report(&e, false);
                return ReaderExit::Released;
            }
        }
    }
}
