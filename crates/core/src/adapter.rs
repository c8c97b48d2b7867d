//! Connection adapter: owns at most one session at a time

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::device::DeviceHandle;
use crate::display::DisplaySink;
use crate::error::{CoreError, Result};
use crate::session::{EventSender, Session, SessionState};
use crate::types::{OpenOptions, SessionEvent};

/// Bridges one serial device to a display sink and back
pub struct ConnectionAdapter {
    sink: Arc<dyn DisplaySink>,
    events: EventSender,
    current: Mutex<Option<Session>>,
}

impl ConnectionAdapter {
    pub fn new(sink: Arc<dyn DisplaySink>, events: EventSender) -> Self {
        Self {
            sink,
            events,
            current: Mutex::new(None),
        }
    }

    /// Create an adapter together with its event receiver
    pub fn with_channel(sink: Arc<dyn DisplaySink>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(sink, tx), rx)
    }

    /// Open `device` and make it the active session.
    ///
    /// Fails with `AlreadyConnected` while another session is open. A
    /// session that is still closing is waited for first. With `wake`, a
    /// single `\n` is sent right after `Connected`.
    pub async fn open(&self, device: DeviceHandle, options: OpenOptions, wake: bool) -> Result<Session> {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.as_ref() {
            match existing.state() {
                SessionState::Closed => {}
                SessionState::Closing => existing.closed().await,
                SessionState::Open | SessionState::Opening => {
                    return Err(CoreError::AlreadyConnected);
                }
            }
        }

        let session = match Session::open(device, options, self.sink.clone(), self.events.clone()).await {
            Ok(session) => session,
            Err(e) => {
                *current = None;
                return Err(e);
            }
        };
        *current = Some(session.clone());
        drop(current);

        if wake {
            session.send(b"\n", false).await;
        }
        Ok(session)
    }

    /// Send to the active session. Dropped with a debug log when there is
    /// no session at all.
    pub async fn send(&self, data: &[u8], flush_on_enter: bool) {
        match self.session().await {
            Some(session) => session.send(data, flush_on_enter).await,
            None => tracing::debug!("No session, dropping {} bytes", data.len()),
        }
    }

    /// Tear down the active session, if any. Safe to call repeatedly and
    /// concurrently.
    pub async fn disconnect(&self) {
        let Some(session) = self.session().await else {
            return;
        };
        session.disconnect().await;

        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.device() == session.device() && existing.state() == SessionState::Closed {
                *current = None;
            }
        }
    }

    /// The active session, open or not yet cleared
    pub async fn session(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub async fn state(&self) -> SessionState {
        match self.session().await {
            Some(session) => session.state(),
            None => SessionState::Closed,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Open
    }

    /// Device of the active session
    pub async fn current_device(&self) -> Option<DeviceHandle> {
        self.session().await.map(|s| s.device().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;
    use crate::display::RecordingSink;
    use crate::error::ErrorKind;
    use crate::types::{CloseReason, DataBits, FlowControl, Parity, StopBits};
    use bytes::Bytes;
    use std::time::Duration;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    async fn wait_for_contents(sink: &RecordingSink, expected: &[u8]) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while sink.contents().await.len() < expected.len() {
            assert!(tokio::time::Instant::now() < deadline, "sink never filled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(&sink.contents().await[..], expected);
    }

    #[tokio::test]
    async fn test_ping_pong_over_echoing_device() {
        let sink = Arc::new(RecordingSink::new());
        let (adapter, mut events) = ConnectionAdapter::with_channel(sink.clone());
        let mock = Arc::new(MockDevice::new("ttyECHO").with_loopback(true));

        let options = OpenOptions {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            ..OpenOptions::default()
        };
        adapter
            .open(DeviceHandle::from_arc(mock.clone()), options, false)
            .await
            .unwrap();
        assert!(adapter.is_connected().await);

        for key in [b"p", b"i", b"n", b"g", b"\r"] {
            adapter.send(key, true).await;
        }
        assert_eq!(mock.writes().await, vec![Bytes::from_static(b"ping\r")]);
        wait_for_contents(&sink, b"ping\r").await;

        mock.inject_rx(b"pong\r\n");
        wait_for_contents(&sink, b"ping\rpong\r\n").await;

        adapter.disconnect().await;
        let events = drain(&mut events);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::Connected { .. }))
                .count(),
            1
        );
        assert_eq!(events.last(), Some(&SessionEvent::closed(CloseReason::Requested)));
    }

    #[tokio::test]
    async fn test_wake_sends_newline() {
        let sink = Arc::new(RecordingSink::new());
        let (adapter, _events) = ConnectionAdapter::with_channel(sink);
        let mock = Arc::new(MockDevice::new("ttyMOCK"));

        adapter
            .open(DeviceHandle::from_arc(mock.clone()), OpenOptions::default(), true)
            .await
            .unwrap();
        assert_eq!(mock.writes().await, vec![Bytes::from_static(b"\n")]);

        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn test_second_open_rejected_while_connected() {
        let (adapter, _events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        let first = DeviceHandle::new(MockDevice::new("ttyA"));
        let second = DeviceHandle::new(MockDevice::new("ttyB"));

        adapter.open(first.clone(), OpenOptions::default(), false).await.unwrap();
        let err = adapter
            .open(second.clone(), OpenOptions::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyConnected));
        assert_eq!(adapter.current_device().await, Some(first));

        adapter.disconnect().await;
        assert_eq!(adapter.current_device().await, None);
        adapter.open(second.clone(), OpenOptions::default(), false).await.unwrap();
        assert_eq!(adapter.current_device().await, Some(second));
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn test_failed_open_leaves_adapter_closed() {
        let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        let mock = Arc::new(MockDevice::new("ttyMOCK"));
        mock.fail_next_open("Permission denied").await;
        let handle = DeviceHandle::from_arc(mock.clone());

        assert!(adapter.open(handle.clone(), OpenOptions::default(), true).await.is_err());
        assert_eq!(mock.open_count().await, 0);
        assert_eq!(adapter.state().await, SessionState::Closed);
        assert!(adapter.session().await.is_none());
        assert!(matches!(
            &drain(&mut events)[..],
            [SessionEvent::Error { kind: ErrorKind::Open, disconnect: true, .. }]
        ));

        adapter.open(handle, OpenOptions::default(), false).await.unwrap();
        assert!(adapter.is_connected().await);
        assert_eq!(mock.open_count().await, 1);
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn test_invalid_options_fail_open() {
        let (adapter, _events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        let handle = DeviceHandle::new(MockDevice::new("ttyMOCK"));

        let err = adapter
            .open(handle, OpenOptions::default().buffer_size(0), false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOptions(_)));
        assert!(!adapter.is_connected().await);
    }

    #[tokio::test]
    async fn test_reopen_after_stream_end() {
        let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        let first = Arc::new(MockDevice::new("ttyA"));
        let session = adapter
            .open(DeviceHandle::from_arc(first.clone()), OpenOptions::default(), false)
            .await
            .unwrap();

        first.end_stream();
        session.closed().await;
        assert!(!adapter.is_connected().await);
        assert!(drain(&mut events).contains(&SessionEvent::closed(CloseReason::StreamEnded)));

        // Same device comes back after a replug
        adapter
            .open(DeviceHandle::from_arc(first.clone()), OpenOptions::default(), false)
            .await
            .unwrap();
        assert_eq!(first.open_count().await, 2);
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_while_send_is_stuck() {
        let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        let adapter = Arc::new(adapter);
        let mock = Arc::new(MockDevice::new("ttyMOCK"));
        adapter
            .open(DeviceHandle::from_arc(mock.clone()), OpenOptions::default(), false)
            .await
            .unwrap();
        mock.set_write_stall(true).await;

        let sender = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.send(b"raw\n", false).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while mock.stalled_writes().await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("write never started");

        tokio::time::timeout(Duration::from_secs(1), adapter.disconnect())
            .await
            .expect("disconnect hung behind a pending write");
        sender.await.unwrap();

        assert_eq!(adapter.state().await, SessionState::Closed);
        assert!(adapter.session().await.is_none());
        assert_eq!(events_closed(&mut events), 1);
    }

    fn events_closed(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> usize {
        drain(rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Closed { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        adapter.disconnect().await;
        adapter.send(b"x", false).await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adapter_disconnects() {
        let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(RecordingSink::new()));
        adapter
            .open(DeviceHandle::new(MockDevice::new("ttyMOCK")), OpenOptions::default(), false)
            .await
            .unwrap();

        tokio::join!(adapter.disconnect(), adapter.disconnect());

        let closed = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Closed { .. }))
            .count();
        assert_eq!(closed, 1);
        assert_eq!(adapter.state().await, SessionState::Closed);
    }
}
