use serde::Deserialize;

/// RPC source settings: endpoint, rate budget, retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfigRaw {
    pub rpc_url: String,
    pub timeout_ms: Option<u64>,
    pub rps: Option<u32>,
    pub retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub backoff_jitter: Option<f64>,
    /// Path to a compiled protobuf descriptor set for the dynamic decode
    /// registry. Absent means fast-path + opaque fallback only.
    pub proto_descriptor_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub rpc_url: url::Url,
    pub timeout_ms: u64,
    pub rps: u32,
    pub retries: u32,
    pub backoff_ms: u64,
    pub backoff_jitter: f64,
    pub proto_descriptor_path: Option<String>,
}

/// Upper bound of the ingest range: a concrete height or the chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToHeight {
    Height(u64),
    Latest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfigRaw {
    pub from: Option<u64>,
    /// Positive integer or the literal string "latest".
    pub to: Option<serde_json::Value>,
    pub resume: Option<bool>,
    pub first_block: Option<u64>,
    pub follow: Option<bool>,
    pub follow_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RangeConfig {
    pub from: Option<u64>,
    pub to: Option<ToHeight>,
    pub resume: bool,
    pub first_block: u64,
    pub follow: bool,
    pub follow_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMode {
    Snake,
    Camel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfigRaw {
    pub concurrency: Option<usize>,
    pub block_timeout_ms: Option<u64>,
    pub max_block_retries: Option<u32>,
    pub progress_every_blocks: Option<u64>,
    pub progress_interval_sec: Option<u64>,
    pub case_mode: Option<CaseMode>,
    pub decode_pool_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub concurrency: usize,
    pub block_timeout_ms: u64,
    pub max_block_retries: u32,
    pub progress_every_blocks: u64,
    pub progress_interval_sec: u64,
    pub case_mode: CaseMode,
    pub decode_pool_size: usize,
}
