//! Device commands bound to `Ctrl-T` key sequences
//!
//! | Keys         | Sends                |
//! |--------------|----------------------|
//! | `Ctrl-T r`   | `raw\n`              |
//! | `Ctrl-T +`   | `sense <block> +\n`  |
//! | `Ctrl-T -`   | `sense <block> -\n`  |
//! | `Ctrl-T 0-9` | selects the block    |
//! | `Ctrl-T Ctrl-T` | a literal `Ctrl-T` |

use std::fmt;

/// Ctrl-T
pub const COMMAND_KEY: u8 = 0x14;

/// One-shot request for a raw sample
pub const RAW_COMMAND: &[u8] = b"raw\n";

/// Shown when a command is issued with nothing connected
pub const NOT_CONNECTED: &str = "Please connect first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseStep {
    Up,
    Down,
}

impl fmt::Display for SenseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SenseStep::Up => "+",
            SenseStep::Down => "-",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Raw,
    Sense(SenseStep),
    /// Change the block later sense commands apply to
    SelectBlock(u32),
}

impl DeviceCommand {
    /// Command bound to the key pressed after `Ctrl-T`
    pub fn from_key(key: u8) -> Option<Self> {
        match key {
            b'r' | b'R' => Some(DeviceCommand::Raw),
            b'+' | b'=' => Some(DeviceCommand::Sense(SenseStep::Up)),
            b'-' | b'_' => Some(DeviceCommand::Sense(SenseStep::Down)),
            b'0'..=b'9' => Some(DeviceCommand::SelectBlock(u32::from(key - b'0'))),
            _ => None,
        }
    }

    /// Bytes to send, or `None` for commands that only change local state
    pub fn payload(&self, block: u32) -> Option<Vec<u8>> {
        match self {
            DeviceCommand::Raw => Some(RAW_COMMAND.to_vec()),
            DeviceCommand::Sense(step) => Some(sense_command(block, *step)),
            DeviceCommand::SelectBlock(_) => None,
        }
    }
}

/// `sense <block> <+|->` terminated by `\n`
pub fn sense_command(block: u32, step: SenseStep) -> Vec<u8> {
    format!("sense {} {}\n", block, step).into_bytes()
}
