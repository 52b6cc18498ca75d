pub mod error;
pub mod pool;

pub use error::DbError;
pub use pool::{build_multi_insert_sql, chunk_rows, DbPool, SqlParam};
