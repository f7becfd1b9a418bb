//! Line-oriented serial link to a peripheral.
//!
//! The link splits into a [`LineReader`] owned by the polling task and a
//! cloneable [`CommandWriter`]. Writers share one lock so commands issued
//! from different tasks never interleave on the wire; the lock is held for
//! a single command only.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use crate::error::SerialError;
use crate::model::DeviceCommand;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_LINE_BYTES: usize = 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct SerialLink {
    reader: LineReader,
    writer: CommandWriter,
}

impl SerialLink {
    /// Opens the named port. Failure here is fatal to the owning node.
    pub fn open(port: &str, baud: u32, io_timeout: Duration) -> Result<Self, SerialError> {
        let stream = tokio_serial::new(port, baud)
            .timeout(io_timeout)
            .open_native_async()
            .map_err(|source| SerialError::Open {
                port: port.to_string(),
                baud,
                source,
            })?;

        debug!(port, baud, "serial port opened");
        Ok(Self::from_stream(stream, io_timeout))
    }

    /// Wraps any byte stream, e.g. an in-memory duplex in tests.
    pub fn from_stream<S>(stream: S, io_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(Box::new(read_half), io_timeout),
            writer: CommandWriter::new(Box::new(write_half), io_timeout),
        }
    }

    pub fn split(self) -> (LineReader, CommandWriter) {
        (self.reader, self.writer)
    }
}

pub struct LineReader {
    inner: BufReader<BoxedReader>,
    buffer: Vec<u8>,
    timeout: Duration,
    discarding: bool,
}

impl LineReader {
    fn new(inner: BoxedReader, timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            buffer: Vec::with_capacity(128),
            timeout,
            discarding: false,
        }
    }

    /// Reads one line, without its terminator.
    ///
    /// Returns `Ok(None)` when nothing arrives within the read timeout. A
    /// partial line that timed out stays buffered and is completed by the
    /// next call. A line longer than [`MAX_LINE_BYTES`] is reported once as
    /// [`SerialError::LineTooLong`] and the rest of it up to the next
    /// terminator is dropped.
    pub async fn read_line(&mut self) -> Result<Option<String>, SerialError> {
        let limit = (MAX_LINE_BYTES + 1).saturating_sub(self.buffer.len()) as u64;
        let mut bounded = (&mut self.inner).take(limit);
        let read = time::timeout(self.timeout, bounded.read_until(b'\n', &mut self.buffer)).await;
        let count = match read {
            Err(_elapsed) => return Ok(None),
            Ok(result) => result?,
        };

        if count == 0 && self.buffer.is_empty() {
            return Err(SerialError::Closed);
        }

        let terminated = self.buffer.last() == Some(&b'\n');
        if !terminated && self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            if self.discarding {
                return Ok(None);
            }
            self.discarding = true;
            return Err(SerialError::LineTooLong(MAX_LINE_BYTES));
        }

        let bytes = std::mem::take(&mut self.buffer);
        if self.discarding {
            // Tail of an overlong line.
            self.discarding = false;
            return Ok(None);
        }

        let mut line = String::from_utf8(bytes)?;
        let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }
}

#[derive(Clone)]
pub struct CommandWriter {
    inner: Arc<Mutex<BoxedWriter>>,
    timeout: Duration,
}

impl CommandWriter {
    fn new(inner: BoxedWriter, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
            timeout,
        }
    }

    /// Writes `text` followed by a newline as one uninterrupted unit.
    pub async fn write_line(&self, text: &str) -> Result<(), SerialError> {
        let mut frame = Vec::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.push(b'\n');

        let mut port = self.inner.lock().await;
        let write = async {
            port.write_all(&frame).await?;
            port.flush().await
        };
        time::timeout(self.timeout, write)
            .await
            .map_err(|_| SerialError::Timeout(self.timeout))??;
        Ok(())
    }

    pub async fn write_command(&self, command: DeviceCommand) -> Result<(), SerialError> {
        let encoded = command.encode()?;
        self.write_line(&encoded).await
    }
}
