use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Stdout,
    File,
    Postgres,
    Null,
    Clickhouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PgWriteMode {
    #[serde(rename = "batch-insert")]
    BatchInsert,
    #[serde(rename = "block-atomic")]
    BlockAtomic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PgConfigRaw {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub ssl: Option<bool>,
    pub mode: Option<PgWriteMode>,
    pub batch_blocks: Option<usize>,
    pub batch_txs: Option<usize>,
    pub batch_msgs: Option<usize>,
    pub batch_events: Option<usize>,
    pub batch_attrs: Option<usize>,
    pub pool_size: Option<usize>,
    pub progress_id: Option<String>,
    pub events_hash_modulus: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl: bool,
    pub mode: PgWriteMode,
    pub batch_blocks: usize,
    pub batch_txs: usize,
    pub batch_msgs: usize,
    pub batch_events: usize,
    pub batch_attrs: usize,
    pub pool_size: usize,
    pub progress_id: String,
    pub events_hash_modulus: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfigRaw {
    pub sink_kind: Option<SinkKind>,
    pub out_path: Option<String>,
    pub flush_every: Option<usize>,
    pub pg: Option<PgConfigRaw>,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub out_path: Option<String>,
    pub flush_every: usize,
    pub pg: Option<PgConfig>,
}
