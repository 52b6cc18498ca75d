pub mod partitions;
pub mod postgres;
pub mod progress;
pub mod text;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::DbError;
use crate::types::config::{SinkConfig, SinkKind};
use crate::types::record::BlockRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Sink kind '{0}' cannot be constructed")]
    Unsupported(String),
}

/// Destination for assembled block records. The runner hands records over
/// in strictly ascending height order; implementations decide transaction
/// granularity.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, record: BlockRecord) -> Result<(), SinkError>;

    /// Force any buffered rows out.
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Final flush and release of resources.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Construct the configured sink. Returns the persisted resume height as
/// well when `resume` is set and the sink has a progress store.
pub async fn build(
    config: &SinkConfig,
    resume: bool,
) -> Result<(Box<dyn Sink>, Option<u64>), SinkError> {
    match config.kind {
        SinkKind::Stdout => Ok((Box::new(text::StdoutSink::new()), None)),
        SinkKind::Null => Ok((Box::new(text::NullSink::new()), None)),
        SinkKind::File => {
            let path = config
                .out_path
                .as_deref()
                .ok_or_else(|| SinkError::Unsupported("file sink without out_path".to_string()))?;
            let sink = text::FileSink::create(path, config.flush_every)?;
            Ok((Box::new(sink), None))
        }
        SinkKind::Postgres => {
            let pg = config
                .pg
                .clone()
                .ok_or_else(|| SinkError::Unsupported("postgres sink without pg config".to_string()))?;
            let sink = postgres::PostgresSink::connect(pg).await?;
            let resume_height = if resume {
                sink.last_progress().await?
            } else {
                None
            };
            Ok((Box::new(sink), resume_height))
        }
        SinkKind::Clickhouse => Err(SinkError::Unsupported("clickhouse".to_string())),
    }
}
