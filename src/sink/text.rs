use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::path::Path;

use async_trait::async_trait;

use super::{Sink, SinkError};
use crate::types::record::BlockRecord;

/// JSON-lines sink on stdout, one record per line.
pub struct StdoutSink {
    written: u64,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { written: 0 }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&mut self, record: BlockRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(&record)?;
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(line.as_bytes())?;
        stdout.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        std::io::stdout().lock().flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        tracing::debug!("Stdout sink wrote {} blocks", self.written);
        self.flush().await
    }
}

/// JSON-lines sink appending to a file, flushed every `flush_every`
/// records.
pub struct FileSink {
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl FileSink {
    pub fn create(path: &str, flush_every: usize) -> Result<Self, SinkError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, record: BlockRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        self.pending = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.flush().await
    }
}

/// Discards records, keeping only a count. Useful for fetch/decode
/// throughput measurements.
pub struct NullSink {
    written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self { written: 0 }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for NullSink {
    async fn write(&mut self, _record: BlockRecord) -> Result<(), SinkError> {
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        tracing::info!("Null sink received {} blocks", self.written);
        Ok(())
    }
}
