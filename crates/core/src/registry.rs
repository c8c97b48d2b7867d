//! Known ports and their display labels
//!
//! Labels are `Port 1`, `Port 2`, ... in order of first sight. A slot number
//! is never handed out twice, even after its port goes away.

use std::fmt;

use crate::device::DeviceHandle;

/// One registered port
#[derive(Debug, Clone)]
pub struct PortEntry {
    slot: u32,
    handle: DeviceHandle,
}

impl PortEntry {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn label(&self) -> String {
        format!("Port {}", self.slot)
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.handle.info())
    }
}

/// Naming and lookup table for known devices. Owns no connections.
#[derive(Debug)]
pub struct PortRegistry {
    entries: Vec<PortEntry>,
    next_slot: u32,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_slot: 1,
        }
    }

    /// Register every handle found at startup
    pub fn enumerate<I>(&mut self, handles: I)
    where
        I: IntoIterator<Item = DeviceHandle>,
    {
        for handle in handles {
            self.add(handle);
        }
    }

    /// Register a handle, or return its existing entry if already known
    pub fn add(&mut self, handle: DeviceHandle) -> &PortEntry {
        if let Some(idx) = self.position(&handle) {
            return &self.entries[idx];
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        tracing::debug!("Registered {} as Port {}", handle.info().path, slot);
        self.entries.push(PortEntry { slot, handle });
        &self.entries[self.entries.len() - 1]
    }

    /// Forget a handle. Its slot number is retired.
    pub fn remove(&mut self, handle: &DeviceHandle) -> Option<PortEntry> {
        let idx = self.position(handle)?;
        let entry = self.entries.remove(idx);
        tracing::debug!("Removed {}", entry.label());
        Some(entry)
    }

    pub fn find(&self, handle: &DeviceHandle) -> Option<&PortEntry> {
        self.position(handle).map(|idx| &self.entries[idx])
    }

    pub fn by_slot(&self, slot: u32) -> Option<&PortEntry> {
        self.entries.iter().find(|e| e.slot == slot)
    }

    /// Lookup by label, case-insensitive (`Port 2`, `port 2`)
    pub fn by_label(&self, label: &str) -> Option<&PortEntry> {
        let slot = label
            .trim()
            .to_ascii_lowercase()
            .strip_prefix("port")?
            .trim()
            .parse()
            .ok()?;
        self.by_slot(slot)
    }

    /// First entry whose device lives at `path`
    pub fn by_path(&self, path: &str) -> Option<&PortEntry> {
        self.entries.iter().find(|e| e.handle.info().path == path)
    }

    /// Resolve a user selector: slot number, label, or path
    pub fn resolve(&self, selector: &str) -> Option<&PortEntry> {
        if let Ok(slot) = selector.trim().parse::<u32>() {
            return self.by_slot(slot);
        }
        self.by_label(selector).or_else(|| self.by_path(selector))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, handle: &DeviceHandle) -> Option<usize> {
        self.entries.iter().position(|e| &e.handle == handle)
    }
}
