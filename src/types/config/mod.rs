pub mod indexer;
pub mod sink;
pub mod source;

pub use indexer::{ConfigError, IndexerConfig};
pub use sink::{PgConfig, PgWriteMode, SinkConfig, SinkKind};
pub use source::{CaseMode, ConcurrencyConfig, RangeConfig, SourceConfig, ToHeight};
