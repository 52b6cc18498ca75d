use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;

use super::registry::{DecodeError, DecodeRegistry};
use super::tx::decode_tx_bytes;
use crate::types::config::CaseMode;

/// Bounded parallel transaction decoder. At most `pool_size` decodes run
/// concurrently; callers block in `submit` once the pool is saturated. All
/// workers share one immutable registry.
pub struct DecoderPool {
    registry: Arc<DecodeRegistry>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    case_mode: CaseMode,
}

impl DecoderPool {
    pub fn new(registry: Arc<DecodeRegistry>, pool_size: usize, case_mode: CaseMode) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            case_mode,
        }
    }

    /// Decode one base64 transaction. Protobuf-level failures come back as
    /// the placeholder shape; only an invalid base64 payload or a closed
    /// pool is an error.
    pub async fn submit(&self, tx_base64: &str) -> Result<JsonValue, DecodeError> {
        let bytes = BASE64.decode(tx_base64)?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DecodeError::PoolClosed)?;

        let registry = Arc::clone(&self.registry);
        let case_mode = self.case_mode;
        let decoded = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            decode_tx_bytes(&registry, &bytes, case_mode)
        })
        .await
        .map_err(|e| DecodeError::TaskFailed(e.to_string()))?;

        Ok(decoded)
    }

    /// Wait for in-flight decodes to finish, then refuse further work.
    pub async fn close(&self) {
        if let Ok(all) = self.permits.acquire_many(self.pool_size as u32).await {
            all.forget();
        }
        self.permits.close();
    }
}
