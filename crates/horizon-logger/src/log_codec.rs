use anyhow::{bail, Context, Result};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use crate::{LogMessage, TimestampedMessage};

const HEADER: &[u8; 11] = b"HORIZON_LOG";
pub const LOG_VERSION: u32 = 1;

/// Writes timestamped messages to a log file.
///
/// Layout: the ASCII header `HORIZON_LOG`, a big-endian `u32` version, then one frame per
/// message: `f64` timestamp, `u32` payload length and the MessagePack-encoded [`LogMessage`].
pub struct LogFileWriter {
    file: BufWriter<File>,
    buf: Vec<u8>,
}

impl LogFileWriter {
    /// Open a new log file for writing and write the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists or if an I/O error occurs.
    pub fn open(path: impl AsRef<Path>, version: u32) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("Log file already exists: {}", path.display());
        }

        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        let mut writer = LogFileWriter {
            file: BufWriter::new(file),
            buf: Vec::new(),
        };
        writer.file.write_all(HEADER)?;
        writer.file.write_all(&version.to_be_bytes())?;
        Ok(writer)
    }

    pub fn write_log_message(&mut self, message: &TimestampedMessage) -> Result<()> {
        self.buf.clear();
        rmp_serde::encode::write_named(&mut self.buf, &message.message)?;
        let size = u32::try_from(self.buf.len()).context("Log message too large")?;
        self.file.write_all(&message.timestamp.to_be_bytes())?;
        self.file.write_all(&size.to_be_bytes())?;
        self.file.write_all(&self.buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// A log file read back into memory.
pub struct LogFile {
    version: u32,
    messages: Vec<TimestampedMessage>,
}

impl LogFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::read(BufReader::new(file))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn messages(&self) -> &[TimestampedMessage] {
        &self.messages
    }

    pub fn take_messages(self) -> Vec<TimestampedMessage> {
        self.messages
    }

    fn read(mut source: impl Read) -> Result<Self> {
        // Read header + version
        let mut buf = [0u8; 11 + 4];
        source.read_exact(&mut buf)?;
        if &buf[0..11] != HEADER {
            bail!("Not a horizon log file");
        }
        let version = u32::from_be_bytes(buf[11..15].try_into()?);
        if version != LOG_VERSION {
            bail!("Unsupported log file version: {}", version);
        }

        let mut messages = Vec::new();
        loop {
            let mut frame_header = [0u8; 12];
            match source.read_exact(&mut frame_header) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let timestamp = f64::from_be_bytes(frame_header[0..8].try_into()?);
            let size = u32::from_be_bytes(frame_header[8..12].try_into()?);

            let mut payload = vec![0u8; size as usize];
            match source.read_exact(&mut payload) {
                Ok(_) => {}
                // Truncated tail, e.g. the process was killed mid-write
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            match rmp_serde::from_slice::<LogMessage>(&payload) {
                Ok(message) => messages.push(TimestampedMessage { timestamp, message }),
                Err(e) => log::warn!("Skipping undecodable log frame: {}", e),
            }
        }

        Ok(LogFile { version, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogLevel, LogLine, TickRecord};

    fn tick(tick: u64) -> TimestampedMessage {
        TimestampedMessage {
            timestamp: tick as f64 * 0.5,
            message: LogMessage::Tick(TickRecord {
                tick,
                time: tick as f64 * 0.02,
                state: vec![0.0, 0.0, 0.1, 0.0],
                target: vec![0.0; 4],
                control: vec![12.5],
                cost: 3.0,
                controller: "nonlinear".into(),
                fallback: false,
            }),
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        let mut writer = LogFileWriter::open(&path, LOG_VERSION).unwrap();
        writer.write_log_message(&tick(0)).unwrap();
        writer
            .write_log_message(&TimestampedMessage {
                timestamp: 0.7,
                message: LogMessage::Line(LogLine {
                    level: LogLevel::Info,
                    target: "horizon_executor".into(),
                    message: "hello".into(),
                    source: "driver.rs:1".into(),
                }),
            })
            .unwrap();
        writer.write_log_message(&tick(1)).unwrap();
        writer.flush().unwrap();

        let file = LogFile::open(&path).unwrap();
        assert_eq!(file.version(), LOG_VERSION);
        assert_eq!(file.messages().len(), 3);
        assert_eq!(file.messages()[0], tick(0));
        assert_eq!(file.messages()[2].timestamp, 0.5);
    }

    #[test]
    fn refuses_to_overwrite() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(LogFileWriter::open(file.path(), LOG_VERSION).is_err());
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");

        let mut writer = LogFileWriter::open(&path, LOG_VERSION).unwrap();
        writer.write_log_message(&tick(0)).unwrap();
        writer.write_log_message(&tick(1)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let file = LogFile::open(&path).unwrap();
        assert_eq!(file.messages().len(), 1);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.log");
        std::fs::write(&path, b"SSL_LOG_FILE\0\0\0\x01").unwrap();
        assert!(LogFile::open(&path).is_err());
    }
}
