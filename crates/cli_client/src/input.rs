//! Keyboard input
//!
//! In raw mode bytes are forwarded as they arrive, one read per chunk, so
//! a lone Enter shows up as exactly `\r`. Without a TTY, stdin is read line
//! by line and every line is followed by a separate `\r`.

use std::io::Read;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::{DeviceCommand, COMMAND_KEY};

/// Ctrl-]
pub const EXIT_KEY: u8 = 0x1d;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Data(Vec<u8>),
    Command(DeviceCommand),
    /// User asked to quit
    Exit,
}

/// Splits keystrokes into data, `Ctrl-T` commands and the exit key.
/// A `Ctrl-T` at the end of one chunk applies to the first byte of the next.
#[derive(Debug, Default)]
pub struct KeyParser {
    armed: bool,
}

impl KeyParser {
    pub fn feed(&mut self, data: &[u8]) -> Vec<InputEvent> {
        let mut events = Vec::new();
        let mut run = Vec::new();

        for &b in data {
            if self.armed {
                self.armed = false;
                if b == COMMAND_KEY {
                    run.push(b);
                    continue;
                }
                if let Some(command) = DeviceCommand::from_key(b) {
                    flush_run(&mut run, &mut events);
                    events.push(InputEvent::Command(command));
                    continue;
                }
                if b != EXIT_KEY {
                    tracing::debug!("No command bound to {:#04x}", b);
                    continue;
                }
            }

            match b {
                EXIT_KEY => {
                    flush_run(&mut run, &mut events);
                    events.push(InputEvent::Exit);
                    return events;
                }
                COMMAND_KEY => self.armed = true,
                _ => run.push(b),
            }
        }

        flush_run(&mut run, &mut events);
        events
    }
}

fn flush_run(run: &mut Vec<u8>, events: &mut Vec<InputEvent>) {
    if !run.is_empty() {
        events.push(InputEvent::Data(std::mem::take(run)));
    }
}

/// Forward parsed events. Returns false once the reader should stop.
fn forward(tx: &mpsc::Sender<InputEvent>, events: Vec<InputEvent>) -> bool {
    for event in events {
        let exit = event == InputEvent::Exit;
        if tx.blocking_send(event).is_err() || exit {
            return false;
        }
    }
    true
}

/// Expand `\n`, `\r`, `\t` and `\\` in a command given on the command line
pub fn expand_escapes(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('\\') => out.push(b'\\'),
            Some(other) => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => out.push(b'\\'),
        }
    }
    out
}

/// Start reading stdin on the blocking pool. The channel closes on EOF.
pub fn spawn_stdin_reader(raw_mode: bool) -> (mpsc::Receiver<InputEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<InputEvent>(32);

    let handle = if raw_mode {
        tokio::task::spawn_blocking(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 1024];
            let mut keys = KeyParser::default();

            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !forward(&tx, keys.feed(&buf[..n])) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        })
    } else {
        tokio::task::spawn_blocking(move || {
            use std::io::BufRead;

            let stdin = std::io::stdin();
            let mut keys = KeyParser::default();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("stdin read failed: {}", e);
                        break;
                    }
                };
                let events = keys.feed(line.as_bytes());
                // A line holding only commands is not a line for the device
                let enter =
                    events.is_empty() || events.iter().any(|e| matches!(e, InputEvent::Data(_)));
                if !forward(&tx, events) {
                    break;
                }
                if enter && tx.blocking_send(InputEvent::Data(b"\r".to_vec())).is_err() {
                    break;
                }
            }
        })
    };

    (rx, handle)
}
