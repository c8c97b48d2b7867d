//! Terminal display: inbound bytes, local echo and status lines

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serialterm_core::{CoreError, DisplaySink};
use std::io::Write;

/// Render `\n` as `\r\n` for terminals in raw mode
pub fn convert_eol(data: &[u8]) -> Bytes {
    let newlines = data.iter().filter(|&&b| b == b'\n').count();
    if newlines == 0 {
        return Bytes::copy_from_slice(data);
    }

    let mut out = BytesMut::with_capacity(data.len() + newlines);
    for &b in data {
        if b == b'\n' {
            out.extend_from_slice(b"\r\n");
        } else {
            out.extend_from_slice(&[b]);
        }
    }
    out.freeze()
}

/// Writes to stdout
pub struct StdoutSink {
    convert_eol: bool,
}

impl StdoutSink {
    pub fn new(convert_eol: bool) -> Self {
        Self { convert_eol }
    }

    fn render(&self, data: &[u8]) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        if self.convert_eol {
            stdout.write_all(&convert_eol(data))?;
        } else {
            stdout.write_all(data)?;
        }
        stdout.flush()
    }

    /// Show typed bytes locally
    pub fn echo(&self, data: &[u8]) {
        if let Err(e) = self.render(data) {
            tracing::warn!("Echo failed: {}", e);
        }
    }

    /// Print a `<STATUS>` line on its own row
    pub fn status(&self, text: &str) {
        let line = status_line(text);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(line.as_bytes());
        let _ = stdout.flush();
    }
}

/// `<TEXT>` framed by CRLF, as printed between device output
pub fn status_line(text: &str) -> String {
    format!("\r\n<{}>\r\n", text)
}

#[async_trait]
impl DisplaySink for StdoutSink {
    async fn write(&self, chunk: Bytes) -> serialterm_core::Result<()> {
        self.render(&chunk).map_err(|e| CoreError::Sink(e.to_string()))
    }
}
