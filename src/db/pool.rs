use bytes::BytesMut;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use super::error::DbError;
use crate::types::config::PgConfig;

/// Hard cap on bind parameters per statement, below the protocol limit of
/// 65,535 with headroom for wide rows.
pub const MAX_PARAMS_PER_STATEMENT: usize = 30_000;

pub struct DbPool {
    pool: Pool,
}

impl DbPool {
    pub async fn connect(config: &PgConfig) -> Result<Self, DbError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.database);

        if config.ssl {
            tracing::warn!(
                "pg.ssl requested but this build connects without TLS; \
                 use a TLS-terminating proxy for encrypted links"
            );
        }

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()?;

        let _probe = pool.get().await?;
        tracing::info!(
            "Connected to postgres {}:{}/{} (pool size {})",
            config.host,
            config.port,
            config.database,
            config.pool_size
        );

        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<Object, DbError> {
        Ok(self.pool.get().await?)
    }
}

/// A bind parameter for the insert builders.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Text(String),
    Jsonb(JsonValue),
    Timestamptz(DateTime<Utc>),
}

impl SqlParam {
    pub fn opt_text(value: Option<String>) -> Self {
        match value {
            Some(v) => SqlParam::Text(v),
            None => SqlParam::Null,
        }
    }

    pub fn opt_jsonb(value: Option<JsonValue>) -> Self {
        match value {
            Some(v) => SqlParam::Jsonb(v),
            None => SqlParam::Null,
        }
    }

    pub fn opt_int64(value: Option<i64>) -> Self {
        match value {
            Some(v) => SqlParam::Int64(v),
            None => SqlParam::Null,
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(
        &self,
        ty: &tokio_postgres::types::Type,
        out: &mut BytesMut,
    ) -> Result<tokio_postgres::types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlParam::Null => Ok(tokio_postgres::types::IsNull::Yes),
            SqlParam::Bool(v) => v.to_sql(ty, out),
            SqlParam::Int32(v) => v.to_sql(ty, out),
            SqlParam::Int64(v) => v.to_sql(ty, out),
            SqlParam::Text(v) => v.to_sql(ty, out),
            SqlParam::Jsonb(v) => v.to_sql(ty, out),
            SqlParam::Timestamptz(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &tokio_postgres::types::Type) -> bool {
        <bool as ToSql>::accepts(ty)
            || <i32 as ToSql>::accepts(ty)
            || <i64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <JsonValue as ToSql>::accepts(ty)
            || <DateTime<Utc> as ToSql>::accepts(ty)
    }

    tokio_postgres::types::to_sql_checked!();
}

/// Build a multi-row `INSERT INTO t (cols) VALUES ($1,...),(...) <conflict>`
/// statement for `row_count` rows.
pub fn build_multi_insert_sql(
    table: &str,
    columns: &[&str],
    conflict_clause: &str,
    row_count: usize,
) -> String {
    let cols = columns.join(", ");
    let mut values = String::new();
    let mut param = 1;
    for row in 0..row_count {
        if row > 0 {
            values.push_str(", ");
        }
        values.push('(');
        for col in 0..columns.len() {
            if col > 0 {
                values.push_str(", ");
            }
            values.push('$');
            values.push_str(&param.to_string());
            param += 1;
        }
        values.push(')');
    }

    let mut sql = format!("INSERT INTO {} ({}) VALUES {}", table, cols, values);
    if !conflict_clause.is_empty() {
        sql.push(' ');
        sql.push_str(conflict_clause);
    }
    sql
}

/// Split rows into chunks bounded by both a per-statement row cap and the
/// global parameter cap.
pub fn chunk_rows<'a>(
    rows: &'a [Vec<SqlParam>],
    columns: usize,
    max_rows: usize,
) -> impl Iterator<Item = &'a [Vec<SqlParam>]> {
    let by_params = MAX_PARAMS_PER_STATEMENT / columns.max(1);
    let chunk = max_rows.min(by_params).max(1);
    rows.chunks(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_insert_sql_shape() {
        let sql = build_multi_insert_sql(
            "core.blocks",
            &["height", "block_hash"],
            "ON CONFLICT (height) DO NOTHING",
            2,
        );
        assert_eq!(
            sql,
            "INSERT INTO core.blocks (height, block_hash) VALUES ($1, $2), ($3, $4) \
             ON CONFLICT (height) DO NOTHING"
        );
    }

    #[test]
    fn test_multi_insert_sql_no_conflict_clause() {
        let sql = build_multi_insert_sql("t", &["a"], "", 1);
        assert_eq!(sql, "INSERT INTO t (a) VALUES ($1)");
    }

    #[test]
    fn test_chunk_rows_respects_row_cap() {
        let rows: Vec<Vec<SqlParam>> = (0..25).map(|i| vec![SqlParam::Int64(i)]).collect();
        let chunks: Vec<_> = chunk_rows(&rows, 1, 10).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn test_chunk_rows_respects_param_cap() {
        // 12 columns: 30_000 / 12 = 2_500 rows per statement even when the
        // row cap allows more.
        let rows: Vec<Vec<SqlParam>> = (0..6000).map(|i| vec![SqlParam::Int64(i)]).collect();
        let chunks: Vec<_> = chunk_rows(&rows, 12, 10_000).collect();
        assert_eq!(chunks[0].len(), 2500);
        assert_eq!(chunks.len(), 3);
    }

}
