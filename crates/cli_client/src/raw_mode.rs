//! Raw mode terminal guard
//!
//! Keystrokes have to reach the serial device untouched: no line editing,
//! no local echo, Ctrl-C as a plain 0x03 byte. The previous mode comes back
//! when the guard drops, panics included.

use anyhow::{Context, Result};
use crossterm::terminal;

/// Enables raw mode and restores cooked mode on drop
pub struct RawModeGuard;

impl RawModeGuard {
    /// Switch stdin to raw mode. Fails when stdin is not a terminal.
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        tracing::debug!("Raw mode enabled");
        Ok(Self)
    }

    /// Raw mode when stdin is a terminal, `None` otherwise
    pub fn try_enable() -> Option<Self> {
        match Self::enable() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::info!("Continuing without raw mode: {:#}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
