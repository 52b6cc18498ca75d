use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::config::sink::{PgConfig, PgConfigRaw, SinkConfig, SinkConfigRaw, SinkKind};
use crate::types::config::source::{
    CaseMode, ConcurrencyConfig, ConcurrencyConfigRaw, RangeConfig, RangeConfigRaw, SourceConfig,
    SourceConfigRaw, ToHeight,
};
use crate::types::config::PgWriteMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid RPC URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Range is empty: to ({to}) < from ({from})")]
    EmptyRange { from: u64, to: u64 },

    #[error("Sink kind '{0}' is not implemented")]
    UnimplementedSink(String),

    #[error("Sink kind '{kind}' requires {field} to be set")]
    MissingSinkField { kind: String, field: String },
}

#[derive(Debug, Deserialize)]
pub struct IndexerConfigRaw {
    pub source: SourceConfigRaw,
    #[serde(default)]
    pub range: Option<RangeConfigRaw>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfigRaw>,
    #[serde(default)]
    pub sink: Option<SinkConfigRaw>,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub source: SourceConfig,
    pub range: RangeConfig,
    pub concurrency: ConcurrencyConfig,
    pub sink: SinkConfig,
}

impl IndexerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let raw: IndexerConfigRaw =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        resolve(raw)
    }
}

fn resolve(raw: IndexerConfigRaw) -> Result<IndexerConfig, ConfigError> {
    let source = resolve_source(raw.source)?;
    let range = resolve_range(raw.range.unwrap_or_else(default_range_raw))?;
    let concurrency = resolve_concurrency(raw.concurrency)?;
    let sink = resolve_sink(raw.sink)?;
    Ok(IndexerConfig {
        source,
        range,
        concurrency,
        sink,
    })
}

fn default_range_raw() -> RangeConfigRaw {
    RangeConfigRaw {
        from: None,
        to: None,
        resume: None,
        first_block: None,
        follow: None,
        follow_interval_ms: None,
    }
}

fn resolve_source(raw: SourceConfigRaw) -> Result<SourceConfig, ConfigError> {
    let rpc_url = env::var("RPC_URL").unwrap_or(raw.rpc_url);
    let rpc_url = url::Url::parse(&rpc_url).map_err(|e| ConfigError::InvalidUrl {
        url: rpc_url.clone(),
        reason: e.to_string(),
    })?;
    if rpc_url.scheme() != "http" && rpc_url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl {
            url: rpc_url.to_string(),
            reason: format!("unsupported scheme '{}'", rpc_url.scheme()),
        });
    }

    let rps = raw.rps.unwrap_or(150);
    if rps == 0 {
        return Err(ConfigError::InvalidValue {
            field: "source.rps".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let backoff_jitter = raw.backoff_jitter.unwrap_or(0.3);
    if !(0.0..=1.0).contains(&backoff_jitter) {
        return Err(ConfigError::InvalidValue {
            field: "source.backoff_jitter".to_string(),
            reason: format!("{} is outside [0, 1]", backoff_jitter),
        });
    }

    Ok(SourceConfig {
        rpc_url,
        timeout_ms: raw.timeout_ms.unwrap_or(5000),
        rps,
        retries: raw.retries.unwrap_or(3),
        backoff_ms: raw.backoff_ms.unwrap_or(250),
        backoff_jitter,
        proto_descriptor_path: raw.proto_descriptor_path,
    })
}

fn resolve_range(raw: RangeConfigRaw) -> Result<RangeConfig, ConfigError> {
    if let Some(from) = raw.from {
        if from == 0 {
            return Err(ConfigError::InvalidValue {
                field: "range.from".to_string(),
                reason: "heights start at 1".to_string(),
            });
        }
    }

    let to = match raw.to {
        None => None,
        Some(serde_json::Value::String(s)) if s == "latest" => Some(ToHeight::Latest),
        Some(serde_json::Value::Number(n)) => match n.as_u64() {
            Some(h) if h > 0 => Some(ToHeight::Height(h)),
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "range.to".to_string(),
                    reason: format!("{} is not a positive integer", n),
                })
            }
        },
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "range.to".to_string(),
                reason: format!("expected a positive integer or \"latest\", got {}", other),
            })
        }
    };

    if let (Some(from), Some(ToHeight::Height(to))) = (raw.from, to) {
        if to < from {
            return Err(ConfigError::EmptyRange { from, to });
        }
    }

    Ok(RangeConfig {
        from: raw.from,
        to,
        resume: raw.resume.unwrap_or(false),
        first_block: raw.first_block.unwrap_or(5_200_792),
        follow: raw.follow.unwrap_or(false),
        follow_interval_ms: raw.follow_interval_ms.unwrap_or(5000),
    })
}

fn resolve_concurrency(
    raw: Option<ConcurrencyConfigRaw>,
) -> Result<ConcurrencyConfig, ConfigError> {
    let raw = raw.unwrap_or(ConcurrencyConfigRaw {
        concurrency: None,
        block_timeout_ms: None,
        max_block_retries: None,
        progress_every_blocks: None,
        progress_interval_sec: None,
        case_mode: None,
        decode_pool_size: None,
    });

    let concurrency = raw.concurrency.unwrap_or(48);
    if concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "concurrency.concurrency".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let decode_pool_size = raw.decode_pool_size.unwrap_or(8);
    if decode_pool_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "concurrency.decode_pool_size".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(ConcurrencyConfig {
        concurrency,
        block_timeout_ms: raw.block_timeout_ms.unwrap_or(30_000),
        max_block_retries: raw.max_block_retries.unwrap_or(3),
        progress_every_blocks: raw.progress_every_blocks.unwrap_or(1000),
        progress_interval_sec: raw.progress_interval_sec.unwrap_or(15),
        case_mode: raw.case_mode.unwrap_or(CaseMode::Snake),
        decode_pool_size,
    })
}

fn resolve_sink(raw: Option<SinkConfigRaw>) -> Result<SinkConfig, ConfigError> {
    let raw = raw.unwrap_or(SinkConfigRaw {
        sink_kind: None,
        out_path: None,
        flush_every: None,
        pg: None,
    });

    let kind = raw.sink_kind.unwrap_or(SinkKind::Stdout);

    match kind {
        SinkKind::Clickhouse => {
            return Err(ConfigError::UnimplementedSink("clickhouse".to_string()));
        }
        SinkKind::File if raw.out_path.is_none() => {
            return Err(ConfigError::MissingSinkField {
                kind: "file".to_string(),
                field: "out_path".to_string(),
            });
        }
        SinkKind::Postgres if raw.pg.is_none() => {
            return Err(ConfigError::MissingSinkField {
                kind: "postgres".to_string(),
                field: "pg".to_string(),
            });
        }
        _ => {}
    }

    let pg = raw.pg.map(resolve_pg).transpose()?;

    Ok(SinkConfig {
        kind,
        out_path: raw.out_path,
        flush_every: raw.flush_every.unwrap_or(1),
        pg,
    })
}

fn resolve_pg(raw: PgConfigRaw) -> Result<PgConfig, ConfigError> {
    let password = env::var("PG_PASSWORD")
        .ok()
        .or(raw.password)
        .unwrap_or_default();

    let events_hash_modulus = raw.events_hash_modulus.unwrap_or(16);
    if events_hash_modulus == 0 {
        return Err(ConfigError::InvalidValue {
            field: "pg.events_hash_modulus".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(PgConfig {
        host: raw.host,
        port: raw.port.unwrap_or(5432),
        user: raw.user,
        password,
        database: raw.database,
        ssl: raw.ssl.unwrap_or(false),
        mode: raw.mode.unwrap_or(PgWriteMode::BatchInsert),
        batch_blocks: raw.batch_blocks.unwrap_or(1000),
        batch_txs: raw.batch_txs.unwrap_or(2000),
        batch_msgs: raw.batch_msgs.unwrap_or(5000),
        batch_events: raw.batch_events.unwrap_or(10_000),
        batch_attrs: raw.batch_attrs.unwrap_or(30_000),
        pool_size: raw.pool_size.unwrap_or(16),
        progress_id: raw.progress_id.unwrap_or_else(|| "default".to_string()),
        events_hash_modulus,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw(extra: serde_json::Value) -> IndexerConfigRaw {
        let mut base = serde_json::json!({
            "source": { "rpc_url": "http://localhost:26657" }
        });
        if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = resolve(minimal_raw(serde_json::json!({}))).unwrap();
        assert_eq!(cfg.source.rps, 150);
        assert_eq!(cfg.source.timeout_ms, 5000);
        assert_eq!(cfg.concurrency.concurrency, 48);
        assert_eq!(cfg.concurrency.case_mode, CaseMode::Snake);
        assert_eq!(cfg.range.first_block, 5_200_792);
        assert_eq!(cfg.sink.kind, SinkKind::Stdout);
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let raw: IndexerConfigRaw = serde_json::from_value(serde_json::json!({
            "source": { "rpc_url": "ftp://example.com" }
        }))
        .unwrap();
        assert!(matches!(resolve(raw), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_rejects_jitter_out_of_range() {
        let raw: IndexerConfigRaw = serde_json::from_value(serde_json::json!({
            "source": { "rpc_url": "http://localhost:26657", "backoff_jitter": 1.5 }
        }))
        .unwrap();
        assert!(matches!(
            resolve(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let raw = minimal_raw(serde_json::json!({
            "range": { "from": 100, "to": 50 }
        }));
        assert!(matches!(
            resolve(raw),
            Err(ConfigError::EmptyRange { from: 100, to: 50 })
        ));
    }

    #[test]
    fn test_to_latest_literal() {
        let cfg = resolve(minimal_raw(serde_json::json!({
            "range": { "from": 100, "to": "latest" }
        })))
        .unwrap();
        assert_eq!(cfg.range.to, Some(ToHeight::Latest));
    }

    #[test]
    fn test_rejects_clickhouse_sink() {
        let raw = minimal_raw(serde_json::json!({
            "sink": { "sink_kind": "clickhouse" }
        }));
        assert!(matches!(
            resolve(raw),
            Err(ConfigError::UnimplementedSink(_))
        ));
    }

    #[test]
    fn test_file_sink_requires_out_path() {
        let raw = minimal_raw(serde_json::json!({
            "sink": { "sink_kind": "file" }
        }));
        assert!(matches!(
            resolve(raw),
            Err(ConfigError::MissingSinkField { .. })
        ));
    }

    #[test]
    fn test_pg_defaults() {
        let cfg = resolve(minimal_raw(serde_json::json!({
            "sink": {
                "sink_kind": "postgres",
                "pg": { "host": "localhost", "user": "indexer", "database": "chain" }
            }
        })))
        .unwrap();
        let pg = cfg.sink.pg.unwrap();
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.mode, PgWriteMode::BatchInsert);
        assert_eq!(pg.batch_events, 10_000);
        assert_eq!(pg.pool_size, 16);
        assert_eq!(pg.progress_id, "default");
        assert_eq!(pg.events_hash_modulus, 16);
    }
}
