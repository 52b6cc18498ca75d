use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::assemble::{assemble_block, AssembleError};
use crate::decode::{DecodeError, DecoderPool};
use crate::rpc::{CometClient, RpcError};
use crate::types::record::BlockRecord;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Step '{step}' timed out after {timeout:?}")]
    Timeout {
        step: &'static str,
        timeout: Duration,
    },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Assemble error: {0}")]
    Assemble(#[from] AssembleError),
}

/// Produces the assembled record for one height. The runner retries a
/// failing height up to its per-height budget regardless of which step
/// failed.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn fetch(&self, height: u64) -> Result<BlockRecord, BlockError>;
}

/// The production fetch path: block + block results over RPC, transactions
/// through the decoder pool, then assembly. Every step runs under the
/// per-step block timeout.
pub struct HeightFetcher {
    client: Arc<CometClient>,
    decoder: Arc<DecoderPool>,
    step_timeout: Duration,
}

impl HeightFetcher {
    pub fn new(client: Arc<CometClient>, decoder: Arc<DecoderPool>, step_timeout: Duration) -> Self {
        Self {
            client,
            decoder,
            step_timeout,
        }
    }

    async fn step<T, E>(
        &self,
        step: &'static str,
        fut: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T, BlockError>
    where
        BlockError: From<E>,
    {
        match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => result.map_err(BlockError::from),
            Err(_) => Err(BlockError::Timeout {
                step,
                timeout: self.step_timeout,
            }),
        }
    }
}

#[async_trait]
impl BlockFetcher for HeightFetcher {
    async fn fetch(&self, height: u64) -> Result<BlockRecord, BlockError> {
        let block = self.step("block", self.client.block(height)).await?;
        let results = self
            .step("block_results", self.client.block_results(height))
            .await?;

        let mut decoded = Vec::with_capacity(block.block.data.txs.len());
        for tx_base64 in &block.block.data.txs {
            let tx = self.step("decode", self.decoder.submit(tx_base64)).await?;
            decoded.push(tx);
        }

        Ok(assemble_block(block, results, decoded)?)
    }
}
