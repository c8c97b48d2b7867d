//! Port discovery and hot-plug detection
//!
//! Handles are cached by path, so enumerating twice hands back the same
//! handle for a port that stayed plugged in. A port that disappears and
//! comes back gets a fresh handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceHandle, SystemPort};
use crate::error::{CoreError, Result};
use crate::types::{PortInfo, PortKind};

/// Source of port listings and the devices behind them
pub trait PortEnumerator: Send + Sync + 'static {
    /// Ports currently present. May block.
    fn available_ports(&self) -> Result<Vec<PortInfo>>;

    /// Look up a path that may not show up in the listing
    fn probe(&self, path: &str) -> Result<Option<PortInfo>> {
        Ok(self.available_ports()?.into_iter().find(|p| p.path == path))
    }

    /// Build a device for a discovered port
    fn device(&self, info: PortInfo) -> DeviceHandle;
}

/// Ports reported by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnumerator;

impl From<serialport::SerialPortType> for PortKind {
    fn from(port_type: serialport::SerialPortType) -> Self {
        match port_type {
            serialport::SerialPortType::UsbPort(info) => PortKind::Usb {
                vid: info.vid,
                pid: info.pid,
                manufacturer: info.manufacturer,
                product: info.product,
                serial_number: info.serial_number,
            },
            serialport::SerialPortType::BluetoothPort => PortKind::Bluetooth,
            serialport::SerialPortType::PciPort => PortKind::Pci,
            serialport::SerialPortType::Unknown => PortKind::Unknown,
        }
    }
}

impl PortEnumerator for SystemEnumerator {
    /// On macOS only `/dev/cu.*` is listed. The matching `/dev/tty.*` node
    /// blocks on open until carrier detect.
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| CoreError::Discovery(format!("Failed to enumerate ports: {}", e)))?;

        Ok(ports
            .into_iter()
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| PortInfo::new(p.port_name, p.port_type.into()))
            .collect())
    }

    fn probe(&self, path: &str) -> Result<Option<PortInfo>> {
        if let Some(info) = self.available_ports()?.into_iter().find(|p| p.path == path) {
            return Ok(Some(info));
        }
        // Pseudo terminals and similar nodes are never listed
        if Path::new(path).exists() {
            return Ok(Some(PortInfo::new(path, PortKind::Unknown)));
        }
        Ok(None)
    }

    fn device(&self, info: PortInfo) -> DeviceHandle {
        DeviceHandle::new(SystemPort::new(info))
    }
}

/// Device arrival or departure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Connected(DeviceHandle),
    Disconnected(DeviceHandle),
}

struct KnownPort {
    path: String,
    handle: DeviceHandle,
    /// Seen in the OS listing. Unlisted ports were requested by path and
    /// are never reported as disconnected.
    listed: bool,
}

/// Tracks the ports the user can pick from
pub struct PortDiscovery {
    enumerator: Arc<dyn PortEnumerator>,
    known: Mutex<Vec<KnownPort>>,
}

impl PortDiscovery {
    pub fn new<E: PortEnumerator>(enumerator: E) -> Self {
        Self {
            enumerator: Arc::new(enumerator),
            known: Mutex::new(Vec::new()),
        }
    }

    /// Discovery over the operating system's ports
    pub fn system() -> Self {
        Self::new(SystemEnumerator)
    }

    async fn enumerate(&self) -> Result<Vec<PortInfo>> {
        let enumerator = self.enumerator.clone();
        tokio::task::spawn_blocking(move || enumerator.available_ports())
            .await
            .map_err(|e| CoreError::Discovery(e.to_string()))?
    }

    /// Every known port, listed ones refreshed from the OS first.
    ///
    /// Arrivals and departures found on the way are absorbed silently.
    pub async fn get_ports(&self) -> Result<Vec<DeviceHandle>> {
        self.refresh().await?;
        let known = self.known.lock().await;
        Ok(known.iter().map(|k| k.handle.clone()).collect())
    }

    /// Resolve a port by path, even one the OS listing omits
    pub async fn request_port(&self, path: &str) -> Result<DeviceHandle> {
        if let Some(existing) = self.known.lock().await.iter().find(|k| k.path == path) {
            return Ok(existing.handle.clone());
        }

        let enumerator = self.enumerator.clone();
        let owned = path.to_string();
        let info = tokio::task::spawn_blocking(move || enumerator.probe(&owned))
            .await
            .map_err(|e| CoreError::Discovery(e.to_string()))??
            .ok_or_else(|| CoreError::PortNotFound(path.to_string()))?;

        let mut known = self.known.lock().await;
        // Lost a race with refresh()
        if let Some(existing) = known.iter().find(|k| k.path == path) {
            return Ok(existing.handle.clone());
        }
        let handle = self.enumerator.device(info);
        known.push(KnownPort {
            path: path.to_string(),
            handle: handle.clone(),
            listed: false,
        });
        tracing::info!("Port {} authorized by request", path);
        Ok(handle)
    }

    /// Re-enumerate and report what changed since the last look
    pub async fn refresh(&self) -> Result<Vec<HotplugEvent>> {
        let current = self.enumerate().await?;
        let mut known = self.known.lock().await;
        let mut events = Vec::new();

        known.retain(|k| {
            let present = current.iter().any(|p| p.path == k.path);
            if k.listed && !present {
                tracing::info!("Port {} disconnected", k.path);
                events.push(HotplugEvent::Disconnected(k.handle.clone()));
                return false;
            }
            true
        });

        for info in current {
            match known.iter_mut().find(|k| k.path == info.path) {
                Some(existing) => existing.listed = true,
                None => {
                    tracing::info!("Port {} connected", info.path);
                    let path = info.path.clone();
                    let handle = self.enumerator.device(info);
                    events.push(HotplugEvent::Connected(handle.clone()));
                    known.push(KnownPort {
                        path,
                        handle,
                        listed: true,
                    });
                }
            }
        }

        Ok(events)
    }

    /// Poll for hot-plug changes every `every` until `cancel` fires or the
    /// receiver is dropped.
    pub fn watch(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<HotplugEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let discovery = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match discovery.refresh().await {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Hot-plug poll failed: {}", e),
                }
            }
            tracing::debug!("Hot-plug watcher stopped");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;
    use std::sync::Mutex as StdMutex;

    /// Enumerator whose listing the test controls
    #[derive(Clone, Default)]
    struct FakeEnumerator {
        ports: Arc<StdMutex<Vec<String>>>,
    }

    impl FakeEnumerator {
        fn set(&self, paths: &[&str]) {
            *self.ports.lock().unwrap() = paths.iter().map(|p| p.to_string()).collect();
        }
    }

    impl PortEnumerator for FakeEnumerator {
        fn available_ports(&self) -> Result<Vec<PortInfo>> {
            Ok(self
                .ports
                .lock()
                .unwrap()
                .iter()
                .map(|p| PortInfo::new(p.clone(), PortKind::Unknown))
                .collect())
        }

        fn device(&self, info: PortInfo) -> DeviceHandle {
            DeviceHandle::new(MockDevice::new(info.path))
        }
    }

    #[tokio::test]
    async fn test_get_ports_reuses_handles() {
        let fake = FakeEnumerator::default();
        fake.set(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let discovery = PortDiscovery::new(fake);

        let first = discovery.get_ports().await.unwrap();
        let second = discovery.get_ports().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refresh_reports_hotplug() {
        let fake = FakeEnumerator::default();
        fake.set(&["/dev/ttyUSB0"]);
        let discovery = PortDiscovery::new(fake.clone());
        let initial = discovery.refresh().await.unwrap();
        assert_eq!(initial.len(), 1);
        let HotplugEvent::Connected(usb0) = &initial[0] else {
            panic!("expected arrival, got {:?}", initial[0]);
        };

        fake.set(&["/dev/ttyUSB1"]);
        let events = discovery.refresh().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], HotplugEvent::Disconnected(usb0.clone()));
        assert!(matches!(&events[1], HotplugEvent::Connected(h) if h.info().path == "/dev/ttyUSB1"));

        assert!(discovery.refresh().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replugged_port_gets_new_handle() {
        let fake = FakeEnumerator::default();
        fake.set(&["/dev/ttyACM0"]);
        let discovery = PortDiscovery::new(fake.clone());
        let before = discovery.get_ports().await.unwrap();

        fake.set(&[]);
        discovery.refresh().await.unwrap();
        fake.set(&["/dev/ttyACM0"]);
        let after = discovery.get_ports().await.unwrap();

        assert_ne!(before[0], after[0]);
    }

    #[tokio::test]
    async fn test_request_port() {
        let fake = FakeEnumerator::default();
        fake.set(&["/dev/ttyUSB0"]);
        let discovery = PortDiscovery::new(fake.clone());

        let listed = discovery.request_port("/dev/ttyUSB0").await.unwrap();
        assert_eq!(discovery.get_ports().await.unwrap(), vec![listed.clone()]);
        assert_eq!(discovery.request_port("/dev/ttyUSB0").await.unwrap(), listed);

        let missing = discovery.request_port("/dev/ttyS9").await;
        assert!(matches!(missing, Err(CoreError::PortNotFound(_))));
    }

    #[tokio::test]
    async fn test_requested_port_survives_refresh() {
        struct Pinned;

        impl PortEnumerator for Pinned {
            fn available_ports(&self) -> Result<Vec<PortInfo>> {
                Ok(Vec::new())
            }

            fn probe(&self, path: &str) -> Result<Option<PortInfo>> {
                Ok(Some(PortInfo::new(path, PortKind::Unknown)))
            }

            fn device(&self, info: PortInfo) -> DeviceHandle {
                DeviceHandle::new(MockDevice::new(info.path))
            }
        }

        let discovery = PortDiscovery::new(Pinned);
        let pty = discovery.request_port("/dev/pts/7").await.unwrap();
        assert!(discovery.refresh().await.unwrap().is_empty());
        assert_eq!(discovery.get_ports().await.unwrap(), vec![pty]);
    }

    #[tokio::test]
    async fn test_watch_forwards_events() {
        let fake = FakeEnumerator::default();
        let discovery = Arc::new(PortDiscovery::new(fake.clone()));
        discovery.get_ports().await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = discovery.watch(Duration::from_millis(10), cancel.clone());

        fake.set(&["/dev/ttyUSB3"]);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, HotplugEvent::Connected(h) if h.info().path == "/dev/ttyUSB3"));

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }
}
