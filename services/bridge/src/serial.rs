//! Serial Link: the async byte pipe to the touchscreen.
//!
//! Opens a UART at the configured path and baud rate and exposes
//! line-oriented read/write. Reads and writes are independently
//! mutex-guarded: one writer lock ensures a multi-line reply is never
//! interleaved with a concurrently emitted auto-report (§5's write-mutex
//! discipline), while reads proceed on their own half of the split port.

use std::io;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

#[derive(Debug)]
pub enum SerialError {
    Open(io::Error),
    Read(io::Error),
    Write(io::Error),
    EndOfStream,
}

impl std::fmt::Display for SerialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialError::Open(e) => write!(f, "failed to open serial port: {e}"),
            SerialError::Read(e) => write!(f, "serial read error: {e}"),
            SerialError::Write(e) => write!(f, "serial write error: {e}"),
            SerialError::EndOfStream => write!(f, "serial link reached end of stream"),
        }
    }
}

impl std::error::Error for SerialError {}

/// Appends a trailing newline unless the reply already ends with one.
/// Extracted so the framing rule is testable without a real port.
fn reply_bytes(text: &str) -> Vec<u8> {
    let mut buf = text.as_bytes().to_vec();
    if !text.ends_with('\n') {
        buf.push(b'\n');
    }
    buf
}

/// Line-oriented serial connection to the touchscreen.
pub struct SerialLink {
    reader: Mutex<BufReader<ReadHalf<SerialStream>>>,
    writer: Mutex<WriteHalf<SerialStream>>,
}

impl SerialLink {
    pub fn open(path: &Path, baud_rate: u32) -> Result<Self, SerialError> {
        let port = tokio_serial::new(path.to_string_lossy(), baud_rate)
            .open_native_async()
            .map_err(|e| SerialError::Open(io::Error::other(e)))?;
        let (read_half, write_half) = tokio::io::split(port);
        Ok(SerialLink {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
        })
    }

    /// Reads one line, stripped of its trailing `\r`/`\n`. Returns
    /// [`SerialError::EndOfStream`] when the port is closed.
    pub async fn read_line(&self) -> Result<String, SerialError> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(SerialError::Read)?;
        if n == 0 {
            return Err(SerialError::EndOfStream);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Writes a reply as a single atomic write; `text` may contain embedded
    /// newlines for a multi-line reply.
    pub async fn write_reply(&self, text: &str) -> Result<(), SerialError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&reply_bytes(text))
            .await
            .map_err(SerialError::Write)?;
        writer.flush().await.map_err(SerialError::Write)?;
        Ok(())
    }
}
